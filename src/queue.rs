//! Per-subscriber ordered delivery queues.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::clock::Clock;
use crate::error::QueueError;
use crate::models::QueuedMessage;

/// Identical bodies sent to the same queue within this window are stored once.
pub const DEDUP_WINDOW_MS: i64 = 5 * 60 * 1000;

/// Largest batch `receive` hands out.
pub const MAX_RECEIVE: i64 = 100;

#[async_trait]
pub trait DeliveryQueue: Send + Sync {
    /// Create a queue and return its reference. Creating an existing queue is a no-op.
    async fn create_queue(&self, name: &str) -> Result<String, QueueError>;

    /// Append `body`. Messages sharing a `group_key` are received in send order.
    async fn send(&self, queue_ref: &str, group_key: &str, body: &str) -> Result<(), QueueError>;

    /// Remove and return up to `max` of the oldest messages.
    async fn receive(&self, queue_ref: &str, max: i64) -> Result<Vec<QueuedMessage>, QueueError>;
}

pub struct SqliteQueue {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteQueue {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Delete received messages that have left the dedup window.
    pub async fn purge_received(&self) -> Result<u64, QueueError> {
        let result = sqlx::query(
            "DELETE FROM queue_messages WHERE received_at_ms IS NOT NULL AND enqueued_at_ms <= ?",
        )
        .bind(self.clock.now_ms() - DEDUP_WINDOW_MS)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn ensure_exists(&self, queue_ref: &str) -> Result<(), QueueError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM delivery_queues WHERE queue_ref = ?)")
                .bind(queue_ref)
                .fetch_one(&self.pool)
                .await?;
        if exists {
            Ok(())
        } else {
            Err(QueueError::UnknownQueue(queue_ref.to_string()))
        }
    }
}

#[async_trait]
impl DeliveryQueue for SqliteQueue {
    async fn create_queue(&self, name: &str) -> Result<String, QueueError> {
        sqlx::query(
            "INSERT INTO delivery_queues (queue_ref, created_at_ms) VALUES (?, ?) ON CONFLICT(queue_ref) DO NOTHING",
        )
        .bind(name)
        .bind(self.clock.now_ms())
        .execute(&self.pool)
        .await?;
        Ok(name.to_string())
    }

    async fn send(&self, queue_ref: &str, group_key: &str, body: &str) -> Result<(), QueueError> {
        self.ensure_exists(queue_ref).await?;

        let now = self.clock.now_ms();
        let result = sqlx::query(
            r#"
            INSERT INTO queue_messages (queue_ref, group_key, body, enqueued_at_ms)
            SELECT ?, ?, ?, ?
            WHERE NOT EXISTS (
                SELECT 1 FROM queue_messages
                WHERE queue_ref = ? AND body = ? AND enqueued_at_ms > ?
            )
            "#,
        )
        .bind(queue_ref)
        .bind(group_key)
        .bind(body)
        .bind(now)
        .bind(queue_ref)
        .bind(body)
        .bind(now - DEDUP_WINDOW_MS)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(queue_ref, "Duplicate message suppressed");
        }
        Ok(())
    }

    async fn receive(&self, queue_ref: &str, max: i64) -> Result<Vec<QueuedMessage>, QueueError> {
        self.ensure_exists(queue_ref).await?;
        let max = max.clamp(1, MAX_RECEIVE);

        let mut tx = self.pool.begin().await?;
        let messages = sqlx::query_as::<_, QueuedMessage>(
            r#"
            SELECT id, group_key, body, enqueued_at_ms
            FROM queue_messages
            WHERE queue_ref = ? AND received_at_ms IS NULL
            ORDER BY id ASC
            LIMIT ?
            "#,
        )
        .bind(queue_ref)
        .bind(max)
        .fetch_all(&mut *tx)
        .await?;

        // Received rows stay behind until the dedup window has passed.
        if let Some(last) = messages.last() {
            sqlx::query(
                "UPDATE queue_messages SET received_at_ms = ? WHERE queue_ref = ? AND received_at_ms IS NULL AND id <= ?",
            )
            .bind(self.clock.now_ms())
            .bind(queue_ref)
            .bind(last.id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(messages)
    }
}

#[derive(Default)]
struct MemoryQueue {
    next_id: i64,
    messages: VecDeque<QueuedMessage>,
    /// Receives remove messages, so dedup keeps its own record.
    recent: Vec<(String, i64)>,
}

/// Delivery queues held in process memory.
pub struct InMemoryQueue {
    queues: Mutex<HashMap<String, MemoryQueue>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of messages waiting in a queue.
    pub fn depth(&self, queue_ref: &str) -> usize {
        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.get(queue_ref).map_or(0, |q| q.messages.len())
    }
}

#[async_trait]
impl DeliveryQueue for InMemoryQueue {
    async fn create_queue(&self, name: &str) -> Result<String, QueueError> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.entry(name.to_string()).or_default();
        Ok(name.to_string())
    }

    async fn send(&self, queue_ref: &str, group_key: &str, body: &str) -> Result<(), QueueError> {
        let now = self.clock.now_ms();
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let queue = queues
            .get_mut(queue_ref)
            .ok_or_else(|| QueueError::UnknownQueue(queue_ref.to_string()))?;

        queue.recent.retain(|(_, at)| *at > now - DEDUP_WINDOW_MS);
        if queue.recent.iter().any(|(b, _)| b == body) {
            return Ok(());
        }
        queue.recent.push((body.to_string(), now));

        queue.next_id += 1;
        let id = queue.next_id;
        queue.messages.push_back(QueuedMessage {
            id,
            group_key: group_key.to_string(),
            body: body.to_string(),
            enqueued_at_ms: now,
        });
        Ok(())
    }

    async fn receive(&self, queue_ref: &str, max: i64) -> Result<Vec<QueuedMessage>, QueueError> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let queue = queues
            .get_mut(queue_ref)
            .ok_or_else(|| QueueError::UnknownQueue(queue_ref.to_string()))?;
        let take = (max.clamp(1, MAX_RECEIVE) as usize).min(queue.messages.len());
        Ok(queue.messages.drain(..take).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::setup_test_db;
    use std::time::Duration;

    async fn check_queue_semantics(queue: &dyn DeliveryQueue, clock: &ManualClock) {
        let q = queue.create_queue("subscriber-a").await.unwrap();
        assert_eq!(q, "subscriber-a");
        assert_eq!(queue.create_queue("subscriber-a").await.unwrap(), q);

        queue.send(&q, "a", "first").await.unwrap();
        queue.send(&q, "a", "second").await.unwrap();
        queue.send(&q, "a", "first").await.unwrap();

        let batch = queue.receive(&q, 10).await.unwrap();
        let bodies: Vec<&str> = batch.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["first", "second"]);
        assert!(batch.iter().all(|m| m.group_key == "a"));
        assert!(queue.receive(&q, 10).await.unwrap().is_empty());

        // Still deduplicated after being received.
        queue.send(&q, "a", "second").await.unwrap();
        assert!(queue.receive(&q, 10).await.unwrap().is_empty());

        clock.advance(Duration::from_millis(DEDUP_WINDOW_MS as u64 + 1));
        queue.send(&q, "a", "first").await.unwrap();
        assert_eq!(queue.receive(&q, 10).await.unwrap().len(), 1);

        assert!(matches!(
            queue.send("nope", "a", "x").await,
            Err(QueueError::UnknownQueue(_))
        ));
        assert!(matches!(
            queue.receive("nope", 1).await,
            Err(QueueError::UnknownQueue(_))
        ));
    }

    async fn check_receive_batches(queue: &dyn DeliveryQueue) {
        let q = queue.create_queue("subscriber-b").await.unwrap();
        for i in 0..5 {
            queue.send(&q, "b", &format!("m{}", i)).await.unwrap();
        }

        let first = queue.receive(&q, 2).await.unwrap();
        let rest = queue.receive(&q, 10).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].body, "m0");
        assert_eq!(rest.len(), 3);
        assert_eq!(rest[0].body, "m2");
        assert!(first[1].id < rest[0].id);
    }

    #[tokio::test]
    async fn test_sqlite_queue() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let queue = SqliteQueue::new(setup_test_db().await, clock.clone());
        check_queue_semantics(&queue, &clock).await;
        check_receive_batches(&queue).await;
    }

    #[tokio::test]
    async fn test_in_memory_queue() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let queue = InMemoryQueue::new(clock.clone());
        check_queue_semantics(&queue, &clock).await;
        check_receive_batches(&queue).await;
        assert_eq!(queue.depth("subscriber-b"), 0);
    }

    #[tokio::test]
    async fn test_sqlite_purge_received() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let queue = SqliteQueue::new(setup_test_db().await, clock.clone());
        let q = queue.create_queue("subscriber-c").await.unwrap();

        queue.send(&q, "c", "one").await.unwrap();
        queue.send(&q, "c", "two").await.unwrap();
        queue.receive(&q, 1).await.unwrap();

        clock.advance(Duration::from_millis(DEDUP_WINDOW_MS as u64));
        assert_eq!(queue.purge_received().await.unwrap(), 1);
        assert_eq!(queue.receive(&q, 10).await.unwrap()[0].body, "two");
    }
}
