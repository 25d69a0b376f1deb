use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;

use super::error_response;
use crate::models::{SubscribeRequest, SubscribeResponse, Subscription};
use crate::state::AppState;
use crate::validation::Validator;

/// POST /subscribe - Register a subscriber on one or more topics.
pub async fn subscribe(
    State(state): State<AppState>,
    payload: Result<Json<SubscribeRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!("Rejected subscribe body: {}", e);
            return error_response(StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };

    let registration = match Validator::validate_registration(&request) {
        Ok(r) => r,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let subscriber_id = Uuid::new_v4().to_string();
    let queue_ref = match state
        .queue
        .create_queue(&format!("subscriber-{}", subscriber_id))
        .await
    {
        Ok(q) => q,
        Err(e) => {
            tracing::error!("Failed to create queue: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Queue error");
        }
    };

    let subscriptions: Vec<Subscription> = registration
        .topics
        .iter()
        .map(|topic| Subscription {
            topic: topic.clone(),
            subscriber_id: subscriber_id.clone(),
            queue_ref: Some(queue_ref.clone()),
            content_filter: registration.filters.clone(),
            predicate_source: registration.function.clone(),
        })
        .collect();

    if let Err(e) = state.registry.register(&subscriptions).await {
        tracing::error!("Failed to register subscriber: {}", e);
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "Subscription registry unavailable");
    }

    tracing::info!(
        subscriber = %subscriber_id,
        topics = registration.topics.len(),
        "Registered subscriber"
    );

    Json(SubscribeResponse {
        subscriber_id,
        queue_ref,
        topics: registration.topics,
        filters: registration.filters,
        function: registration.function.unwrap_or_default(),
    })
    .into_response()
}
