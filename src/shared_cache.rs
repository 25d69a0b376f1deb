//! Shared TTL cache, reachable by every dispatcher instance.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::clock::Clock;
use crate::error::CacheError;

#[async_trait]
pub trait SharedCache: Send + Sync {
    /// Value stored under `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration)
        -> Result<(), CacheError>;
}

/// Shared cache stored in a SQLite table. Instances pointed at the same
/// database file see each other's entries.
pub struct SqliteSharedCache {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteSharedCache {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Delete expired rows. Returns how many were removed.
    pub async fn purge_expired(&self) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM shared_cache WHERE expires_at_ms <= ?")
            .bind(self.clock.now_ms())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SharedCache for SqliteSharedCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let value: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT value FROM shared_cache WHERE key = ? AND expires_at_ms > ?")
                .bind(key)
                .bind(self.clock.now_ms())
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let expires_at_ms = self.clock.now_ms() + ttl.as_millis() as i64;
        sqlx::query(
            r#"
            INSERT INTO shared_cache (key, value, expires_at_ms)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at_ms = excluded.expires_at_ms
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Shared cache held in process memory.
pub struct InMemorySharedCache {
    entries: RwLock<HashMap<String, (Vec<u8>, i64)>>,
    clock: Arc<dyn Clock>,
}

impl InMemorySharedCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }
}

#[async_trait]
impl SharedCache for InMemorySharedCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = self.clock.now_ms();
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(value, _)| value.clone()))
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let expires_at = self.clock.now_ms() + ttl.as_millis() as i64;
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), (value.to_vec(), expires_at));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::setup_test_db;

    async fn check_expiry(cache: &dyn SharedCache, clock: &ManualClock) {
        assert_eq!(cache.get("subs:t").await.unwrap(), None);

        cache
            .set_with_ttl("subs:t", b"[]", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(cache.get("subs:t").await.unwrap(), Some(b"[]".to_vec()));

        clock.advance(Duration::from_secs(29));
        assert!(cache.get("subs:t").await.unwrap().is_some());

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get("subs:t").await.unwrap(), None);

        cache
            .set_with_ttl("subs:t", b"[1]", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(cache.get("subs:t").await.unwrap(), Some(b"[1]".to_vec()));
    }

    #[tokio::test]
    async fn test_in_memory_expiry() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = InMemorySharedCache::new(clock.clone());
        check_expiry(&cache, &clock).await;
    }

    #[tokio::test]
    async fn test_sqlite_expiry() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = SqliteSharedCache::new(setup_test_db().await, clock.clone());
        check_expiry(&cache, &clock).await;
    }

    #[tokio::test]
    async fn test_sqlite_purge_expired() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = SqliteSharedCache::new(setup_test_db().await, clock.clone());

        cache
            .set_with_ttl("a", b"1", Duration::from_secs(1))
            .await
            .unwrap();
        cache
            .set_with_ttl("b", b"2", Duration::from_secs(60))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(2));

        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert!(cache.get("b").await.unwrap().is_some());
    }
}
