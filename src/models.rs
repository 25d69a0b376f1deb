use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field name to condition, as registered by a subscriber.
pub type ContentFilter = Map<String, Value>;

/// One (topic, subscriber) binding. Read-only from the dispatcher's point of view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub topic: String,
    pub subscriber_id: String,
    pub queue_ref: Option<String>,
    #[serde(default)]
    pub content_filter: ContentFilter,
    #[serde(default)]
    pub predicate_source: Option<String>,
}

/// Body of `POST /publish`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PublishRequest {
    pub topic: Option<String>,
    #[serde(rename = "sentAt")]
    pub sent_at: Option<f64>,
    pub data: Option<Value>,
}

/// A validated publish, alive for the duration of one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishEvent {
    pub topic: String,
    pub sent_at: f64,
    pub data: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub delivered: usize,
}

/// Message body written to a subscriber's queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryEnvelope {
    pub subscriber_id: String,
    pub topic: String,
    pub data: Map<String, Value>,
    pub sent_at: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    FilteredOut,
    EnqueueFailed,
}

/// Body of `POST /subscribe`.
#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub filters: Option<Value>,
    #[serde(default)]
    pub function: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeResponse {
    pub subscriber_id: String,
    pub queue_ref: String,
    pub topics: Vec<String>,
    pub filters: ContentFilter,
    pub function: String,
}

/// A message sitting in a subscriber queue.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    pub id: i64,
    pub group_key: String,
    pub body: String,
    pub enqueued_at_ms: i64,
}

/// Query parameters for draining a queue.
#[derive(Debug, Deserialize)]
pub struct ReceiveQuery {
    #[serde(default = "default_max")]
    pub max: i64,
}

fn default_max() -> i64 {
    10
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveResponse {
    pub queue_ref: String,
    pub messages: Vec<QueuedMessage>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
