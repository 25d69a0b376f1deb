//! Fault-injecting collaborators for unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{CacheError, QueueError, RegistryError};
use crate::models::{QueuedMessage, Subscription};
use crate::queue::DeliveryQueue;
use crate::registry::SubscriptionRegistry;
use crate::shared_cache::SharedCache;

pub fn subscription(topic: &str, id: &str) -> Subscription {
    Subscription {
        topic: topic.to_string(),
        subscriber_id: id.to_string(),
        queue_ref: Some(format!("subscriber-{}", id)),
        content_filter: Default::default(),
        predicate_source: None,
    }
}

/// Wraps a registry, counting queries and optionally failing them.
pub struct CountingRegistry<R> {
    inner: R,
    queries: AtomicUsize,
    unavailable: AtomicBool,
}

impl<R> CountingRegistry<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            queries: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl<R: SubscriptionRegistry> SubscriptionRegistry for CountingRegistry<R> {
    async fn query(&self, topic: &str) -> Result<Vec<Subscription>, RegistryError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RegistryError::Unavailable("injected".to_string()));
        }
        self.inner.query(topic).await
    }

    async fn register(&self, subscriptions: &[Subscription]) -> Result<(), RegistryError> {
        self.inner.register(subscriptions).await
    }
}

/// Registry that answers nothing until `delay` has passed.
pub struct SlowRegistry {
    delay: Duration,
}

impl SlowRegistry {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl SubscriptionRegistry for SlowRegistry {
    async fn query(&self, _topic: &str) -> Result<Vec<Subscription>, RegistryError> {
        tokio::time::sleep(self.delay).await;
        Ok(Vec::new())
    }

    async fn register(&self, _subscriptions: &[Subscription]) -> Result<(), RegistryError> {
        Ok(())
    }
}

/// Shared cache that either errors or never answers.
pub struct FlakySharedCache {
    hang: bool,
}

impl FlakySharedCache {
    pub fn failing() -> Self {
        Self { hang: false }
    }

    pub fn hanging() -> Self {
        Self { hang: true }
    }

    async fn fail<T>(&self) -> Result<T, CacheError> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        Err(CacheError::Backend("connection refused".to_string()))
    }
}

#[async_trait]
impl SharedCache for FlakySharedCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.fail().await
    }

    async fn set_with_ttl(
        &self,
        _key: &str,
        _value: &[u8],
        _ttl: Duration,
    ) -> Result<(), CacheError> {
        self.fail().await
    }
}

/// Queue that records sends and misbehaves for selected group keys.
#[derive(Default)]
pub struct ScriptedQueue {
    pub sent: Mutex<Vec<(String, String, String)>>,
    failing: HashSet<String>,
    slow: HashSet<String>,
    slow_delay: Duration,
}

impl ScriptedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(mut self, group_keys: &[&str]) -> Self {
        self.failing = group_keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn slow_for(mut self, group_keys: &[&str], delay: Duration) -> Self {
        self.slow = group_keys.iter().map(|k| k.to_string()).collect();
        self.slow_delay = delay;
        self
    }

    pub fn sends(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn bodies_for(&self, group_key: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, g, _)| g == group_key)
            .map(|(_, _, b)| b.clone())
            .collect()
    }
}

#[async_trait]
impl DeliveryQueue for ScriptedQueue {
    async fn create_queue(&self, name: &str) -> Result<String, QueueError> {
        Ok(name.to_string())
    }

    async fn send(&self, queue_ref: &str, group_key: &str, body: &str) -> Result<(), QueueError> {
        if self.slow.contains(group_key) {
            tokio::time::sleep(self.slow_delay).await;
        }
        if self.failing.contains(group_key) {
            return Err(QueueError::Backend("injected".to_string()));
        }
        self.sent.lock().unwrap().push((
            queue_ref.to_string(),
            group_key.to_string(),
            body.to_string(),
        ));
        Ok(())
    }

    async fn receive(&self, queue_ref: &str, _max: i64) -> Result<Vec<QueuedMessage>, QueueError> {
        Err(QueueError::UnknownQueue(queue_ref.to_string()))
    }
}
