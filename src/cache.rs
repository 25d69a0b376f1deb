//! Subscriber resolution through three tiers: a per-process snapshot, the
//! shared cache, and the durable registry.
//!
//! Each tier reports a [`TierOutcome`]; failures of the two cache tiers are
//! turned into misses here and never reach the caller. Only a registry
//! failure is surfaced. Snapshots are immutable and replaced wholesale, so
//! concurrent refreshes of one topic race harmlessly while other topics are
//! never blocked.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::clock::Clock;
use crate::error::{CacheError, RegistryError};
use crate::models::Subscription;
use crate::predicate::CompiledPredicate;
use crate::registry::SubscriptionRegistry;
use crate::shared_cache::SharedCache;

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub process_ttl: Duration,
    pub shared_ttl: Duration,
    /// Bound on each shared cache and registry call.
    pub call_timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            process_ttl: Duration::from_secs(10),
            shared_ttl: Duration::from_secs(30),
            call_timeout: Duration::from_secs(2),
        }
    }
}

/// Immutable snapshot of one topic's subscribers.
#[derive(Debug)]
pub struct CacheEntry {
    pub fetched_at_ms: i64,
    pub subscriptions: Vec<Subscription>,
    pub predicates: HashMap<String, CompiledPredicate>,
}

impl CacheEntry {
    /// Build a snapshot, compiling every subscriber's predicate once.
    pub fn build(topic: &str, subscriptions: Vec<Subscription>, fetched_at_ms: i64) -> Self {
        let predicates = subscriptions
            .iter()
            .map(|sub| {
                let compiled = CompiledPredicate::compile(sub.predicate_source.as_deref());
                if let CompiledPredicate::Invalid(e) = &compiled {
                    tracing::warn!(
                        topic,
                        subscriber = %sub.subscriber_id,
                        error = %e,
                        "Predicate failed to compile; subscriber will not match"
                    );
                }
                (sub.subscriber_id.clone(), compiled)
            })
            .collect();

        Self {
            fetched_at_ms,
            subscriptions,
            predicates,
        }
    }

    /// Compiled predicate for a subscriber. Unknown subscribers have none.
    pub fn predicate_for(&self, subscriber_id: &str) -> CompiledPredicate {
        self.predicates
            .get(subscriber_id)
            .cloned()
            .unwrap_or(CompiledPredicate::Absent)
    }
}

/// Result of asking one cache tier.
#[derive(Debug)]
pub enum TierOutcome<T> {
    Hit(T),
    Miss,
    TierError(CacheError),
}

pub struct SubscriberCache {
    registry: Arc<dyn SubscriptionRegistry>,
    shared: Arc<dyn SharedCache>,
    clock: Arc<dyn Clock>,
    settings: CacheSettings,
    local: DashMap<String, Arc<CacheEntry>>,
}

impl SubscriberCache {
    pub fn new(
        registry: Arc<dyn SubscriptionRegistry>,
        shared: Arc<dyn SharedCache>,
        clock: Arc<dyn Clock>,
        settings: CacheSettings,
    ) -> Self {
        Self {
            registry,
            shared,
            clock,
            settings,
            local: DashMap::new(),
        }
    }

    pub fn shared_key(topic: &str) -> String {
        format!("subs:{}", topic)
    }

    /// Subscribers and compiled predicates for `topic`.
    pub async fn resolve(&self, topic: &str) -> Result<Arc<CacheEntry>, RegistryError> {
        if let TierOutcome::Hit(entry) = self.local_tier(topic) {
            return Ok(entry);
        }

        let subscriptions = match self.shared_tier(topic).await {
            TierOutcome::Hit(subs) => {
                tracing::debug!(topic, count = subs.len(), "Shared cache hit");
                subs
            }
            TierOutcome::Miss => {
                tracing::debug!(topic, "Shared cache miss; querying registry");
                self.registry_tier(topic).await?
            }
            TierOutcome::TierError(e) => {
                tracing::warn!(topic, error = %e, "Shared cache unavailable; querying registry");
                self.registry_tier(topic).await?
            }
        };

        let entry = Arc::new(CacheEntry::build(
            topic,
            subscriptions,
            self.clock.now_ms(),
        ));
        self.local.insert(topic.to_string(), entry.clone());
        Ok(entry)
    }

    /// Drop process-tier snapshots older than the process TTL (call periodically).
    /// Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let ttl = self.settings.process_ttl.as_millis() as i64;
        let before = self.local.len();
        self.local.retain(|_, entry| now - entry.fetched_at_ms < ttl);
        before.saturating_sub(self.local.len())
    }

    fn local_tier(&self, topic: &str) -> TierOutcome<Arc<CacheEntry>> {
        let now = self.clock.now_ms();
        match self.local.get(topic) {
            Some(entry) if now - entry.fetched_at_ms < self.settings.process_ttl.as_millis() as i64 => {
                TierOutcome::Hit(entry.value().clone())
            }
            _ => TierOutcome::Miss,
        }
    }

    async fn shared_tier(&self, topic: &str) -> TierOutcome<Vec<Subscription>> {
        let key = Self::shared_key(topic);
        let bytes = match bounded(self.settings.call_timeout, self.shared.get(&key)).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return TierOutcome::Miss,
            Err(e) => return TierOutcome::TierError(e),
        };

        match serde_json::from_slice(&bytes) {
            Ok(subs) => TierOutcome::Hit(subs),
            Err(e) => TierOutcome::TierError(CacheError::Backend(format!(
                "undecodable entry {}: {}",
                key, e
            ))),
        }
    }

    /// Authoritative lookup, followed by a best-effort write-through.
    async fn registry_tier(&self, topic: &str) -> Result<Vec<Subscription>, RegistryError> {
        let timeout = self.settings.call_timeout;
        let subs = tokio::time::timeout(timeout, self.registry.query(topic))
            .await
            .map_err(|_| RegistryError::Timeout(timeout))??;

        let key = Self::shared_key(topic);
        let write = async {
            let bytes =
                serde_json::to_vec(&subs).map_err(|e| CacheError::Backend(e.to_string()))?;
            bounded(
                timeout,
                self.shared.set_with_ttl(&key, &bytes, self.settings.shared_ttl),
            )
            .await
        };
        match write.await {
            Ok(()) => tracing::debug!(topic, count = subs.len(), "Stored subscribers in shared cache"),
            Err(e) => tracing::warn!(topic, error = %e, "Shared cache write-through failed"),
        }

        Ok(subs)
    }
}

async fn bounded<T>(
    timeout: Duration,
    call: impl Future<Output = Result<T, CacheError>>,
) -> Result<T, CacheError> {
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or(Err(CacheError::Timeout(timeout)))
}
