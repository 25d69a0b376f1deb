//! Publish fan-out.
//!
//! One dispatch resolves the topic's subscribers, then runs every
//! subscriber's filter-then-enqueue sequence as its own task in a bounded
//! task group. The call returns once every task has finished or the
//! dispatch deadline passes, whichever comes first.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cache::SubscriberCache;
use crate::clock::Clock;
use crate::error::{DispatchError, QueueError, ValidationError};
use crate::filter;
use crate::models::{DeliveryEnvelope, DeliveryOutcome, PublishEvent, PublishRequest, Subscription};
use crate::predicate::CompiledPredicate;
use crate::queue::DeliveryQueue;
use crate::validation::MAX_TOPIC_LEN;

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Upper bound on concurrently running subscriber tasks.
    pub max_workers: usize,
    /// Bound on each enqueue call.
    pub enqueue_timeout: Duration,
    /// Bound on the whole fan-out.
    pub deadline: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_workers: 20,
            enqueue_timeout: Duration::from_secs(2),
            deadline: Duration::from_secs(10),
        }
    }
}

/// Tally of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub filtered_out: usize,
    pub failed: usize,
    /// Subscriber tasks still running when the deadline passed.
    pub abandoned: usize,
}

impl DispatchReport {
    fn record(&mut self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered => self.delivered += 1,
            DeliveryOutcome::FilteredOut => self.filtered_out += 1,
            DeliveryOutcome::EnqueueFailed => self.failed += 1,
        }
    }
}

pub struct Dispatcher {
    cache: SubscriberCache,
    queue: Arc<dyn DeliveryQueue>,
    clock: Arc<dyn Clock>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        cache: SubscriberCache,
        queue: Arc<dyn DeliveryQueue>,
        clock: Arc<dyn Clock>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            cache,
            queue,
            clock,
            settings,
        }
    }

    pub fn cache(&self) -> &SubscriberCache {
        &self.cache
    }

    /// Validate a raw publish and stamp it with the current time if the publisher did not.
    pub fn prepare(&self, request: PublishRequest) -> Result<PublishEvent, ValidationError> {
        let topic = request
            .topic
            .filter(|t| !t.is_empty())
            .ok_or(ValidationError::MissingTopicOrData)?;
        if topic.len() > MAX_TOPIC_LEN {
            return Err(ValidationError::InvalidTopic(format!(
                "topic must be 1-{} bytes",
                MAX_TOPIC_LEN
            )));
        }
        let data = match request.data {
            None | Some(Value::Null) => return Err(ValidationError::MissingTopicOrData),
            Some(Value::Object(data)) => data,
            Some(_) => return Err(ValidationError::DataNotObject),
        };
        let sent_at = request.sent_at.unwrap_or_else(|| self.clock.now_secs());

        Ok(PublishEvent {
            topic,
            sent_at,
            data,
        })
    }

    pub async fn dispatch(&self, request: PublishRequest) -> Result<DispatchReport, DispatchError> {
        let event = self.prepare(request)?;
        let entry = self.cache.resolve(&event.topic).await?;

        let mut report = DispatchReport::default();
        if entry.subscriptions.is_empty() {
            return Ok(report);
        }

        let width = self.settings.max_workers.min(entry.subscriptions.len()).max(1);
        let permits = Arc::new(Semaphore::new(width));
        let event = Arc::new(event);
        let mut tasks = JoinSet::new();

        for sub in entry.subscriptions.iter().cloned() {
            let predicate = entry.predicate_for(&sub.subscriber_id);
            let permits = permits.clone();
            let event = event.clone();
            let queue = self.queue.clone();
            let timeout = self.settings.enqueue_timeout;

            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                deliver(&sub, &predicate, &event, queue.as_ref(), timeout).await
            });
        }

        let deadline = tokio::time::Instant::now() + self.settings.deadline;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok(outcome))) => report.record(outcome),
                Ok(Some(Err(e))) => {
                    tracing::error!(topic = %event.topic, error = %e, "Subscriber task failed");
                    report.record(DeliveryOutcome::EnqueueFailed);
                }
                Ok(None) => break,
                Err(_) => {
                    report.abandoned = tasks.len();
                    tasks.abort_all();
                    tracing::warn!(
                        topic = %event.topic,
                        abandoned = report.abandoned,
                        "Dispatch deadline passed; abandoning remaining subscribers"
                    );
                    break;
                }
            }
        }

        tracing::debug!(
            topic = %event.topic,
            subscribers = entry.subscriptions.len(),
            delivered = report.delivered,
            filtered_out = report.filtered_out,
            failed = report.failed,
            abandoned = report.abandoned,
            "Dispatch complete"
        );
        Ok(report)
    }
}

/// Filter, then enqueue, for a single subscriber. Never fails the batch.
async fn deliver(
    sub: &Subscription,
    predicate: &CompiledPredicate,
    event: &PublishEvent,
    queue: &dyn DeliveryQueue,
    timeout: Duration,
) -> DeliveryOutcome {
    if !filter::matches(&event.data, &sub.content_filter) {
        tracing::trace!(subscriber = %sub.subscriber_id, "Content filter rejected event");
        return DeliveryOutcome::FilteredOut;
    }

    match predicate.admits(&event.data) {
        Ok(true) => {}
        Ok(false) => return DeliveryOutcome::FilteredOut,
        Err(e) => {
            tracing::debug!(subscriber = %sub.subscriber_id, error = %e, "Predicate rejected event");
            return DeliveryOutcome::FilteredOut;
        }
    }

    let Some(queue_ref) = sub.queue_ref.as_deref().filter(|q| !q.is_empty()) else {
        tracing::warn!(subscriber = %sub.subscriber_id, "Subscription has no queue; skipping");
        return DeliveryOutcome::EnqueueFailed;
    };

    let envelope = DeliveryEnvelope {
        subscriber_id: sub.subscriber_id.clone(),
        topic: event.topic.clone(),
        data: event.data.clone(),
        sent_at: event.sent_at,
    };
    let body = match serde_json::to_string(&envelope) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(subscriber = %sub.subscriber_id, error = %e, "Failed to encode envelope");
            return DeliveryOutcome::EnqueueFailed;
        }
    };

    let sent = tokio::time::timeout(timeout, queue.send(queue_ref, &sub.subscriber_id, &body))
        .await
        .unwrap_or(Err(QueueError::Timeout(timeout)));
    match sent {
        Ok(()) => DeliveryOutcome::Delivered,
        Err(e) => {
            tracing::warn!(subscriber = %sub.subscriber_id, error = %e, "Enqueue failed");
            DeliveryOutcome::EnqueueFailed
        }
    }
}
