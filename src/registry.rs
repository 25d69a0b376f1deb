//! Durable subscription registry: the authoritative topic → subscriptions index.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::clock::Clock;
use crate::error::RegistryError;
use crate::models::{ContentFilter, Subscription};

#[async_trait]
pub trait SubscriptionRegistry: Send + Sync {
    /// All subscriptions for `topic`, in registration order.
    async fn query(&self, topic: &str) -> Result<Vec<Subscription>, RegistryError>;

    /// Persist new subscription rows. Existing (topic, subscriber) rows are replaced.
    async fn register(&self, subscriptions: &[Subscription]) -> Result<(), RegistryError>;
}

/// SQLite-backed registry.
pub struct SqliteRegistry {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    topic: String,
    subscriber_id: String,
    queue_ref: Option<String>,
    content_filter: String,
    predicate_source: Option<String>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = RegistryError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let content_filter: ContentFilter =
            serde_json::from_str(&row.content_filter).map_err(|e| RegistryError::Corrupt {
                topic: row.topic.clone(),
                reason: format!("filter of {}: {}", row.subscriber_id, e),
            })?;

        Ok(Subscription {
            topic: row.topic,
            subscriber_id: row.subscriber_id,
            queue_ref: row.queue_ref,
            content_filter,
            predicate_source: row.predicate_source,
        })
    }
}

impl SqliteRegistry {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

#[async_trait]
impl SubscriptionRegistry for SqliteRegistry {
    async fn query(&self, topic: &str) -> Result<Vec<Subscription>, RegistryError> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT topic, subscriber_id, queue_ref, content_filter, predicate_source
            FROM subscriptions
            WHERE topic = ?
            ORDER BY created_at_ms ASC, rowid ASC
            "#,
        )
        .bind(topic)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    async fn register(&self, subscriptions: &[Subscription]) -> Result<(), RegistryError> {
        let now = self.clock.now_ms();
        let mut tx = self.pool.begin().await?;

        for sub in subscriptions {
            let filter = serde_json::Value::Object(sub.content_filter.clone()).to_string();
            sqlx::query(
                r#"
                INSERT INTO subscriptions
                    (topic, subscriber_id, queue_ref, content_filter, predicate_source, created_at_ms)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(topic, subscriber_id) DO UPDATE SET
                    queue_ref = excluded.queue_ref,
                    content_filter = excluded.content_filter,
                    predicate_source = excluded.predicate_source
                "#,
            )
            .bind(&sub.topic)
            .bind(&sub.subscriber_id)
            .bind(&sub.queue_ref)
            .bind(filter)
            .bind(&sub.predicate_source)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

/// Registry held in process memory.
#[derive(Default)]
pub struct InMemoryRegistry {
    topics: RwLock<HashMap<String, Vec<Subscription>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop one subscriber from a topic.
    pub fn remove(&self, topic: &str, subscriber_id: &str) {
        let mut topics = self.topics.write().unwrap_or_else(|e| e.into_inner());
        if let Some(subs) = topics.get_mut(topic) {
            subs.retain(|s| s.subscriber_id != subscriber_id);
        }
    }
}

#[async_trait]
impl SubscriptionRegistry for InMemoryRegistry {
    async fn query(&self, topic: &str) -> Result<Vec<Subscription>, RegistryError> {
        let topics = self.topics.read().unwrap_or_else(|e| e.into_inner());
        Ok(topics.get(topic).cloned().unwrap_or_default())
    }

    async fn register(&self, subscriptions: &[Subscription]) -> Result<(), RegistryError> {
        let mut topics = self.topics.write().unwrap_or_else(|e| e.into_inner());
        for sub in subscriptions {
            let subs = topics.entry(sub.topic.clone()).or_default();
            match subs
                .iter_mut()
                .find(|s| s.subscriber_id == sub.subscriber_id)
            {
                Some(existing) => *existing = sub.clone(),
                None => subs.push(sub.clone()),
            }
        }
        Ok(())
    }
}
