//! Deduplication store backends.

use async_trait::async_trait;
use redis_utils::RedisPool;
use resilience::with_timeout_result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{IdempotencyError, IdempotencyResult};

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(3);

/// Key-value store with expiring keys.
///
/// Abstracts the storage so the guard can be tested without Redis.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Whether `key` is currently present (not expired).
    async fn exists(&self, key: &str) -> IdempotencyResult<bool>;

    /// Write `key = value`, expiring after `ttl`.
    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration)
        -> IdempotencyResult<()>;
}

/// Redis-backed store using `EXISTS` / `SETEX`.
pub struct RedisDedupStore {
    pool: RedisPool,
    command_timeout: Duration,
}

impl RedisDedupStore {
    pub fn new(pool: RedisPool) -> Self {
        Self {
            pool,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_command_timeout(mut self, command_timeout: Duration) -> Self {
        self.command_timeout = command_timeout;
        self
    }
}

#[async_trait]
impl DedupStore for RedisDedupStore {
    async fn exists(&self, key: &str) -> IdempotencyResult<bool> {
        let mut conn = self.pool.manager().await?;

        let exists: bool = with_timeout_result(
            self.command_timeout,
            redis::cmd("EXISTS").arg(key).query_async(&mut conn),
        )
        .await?;

        Ok(exists)
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> IdempotencyResult<()> {
        let mut conn = self.pool.manager().await?;
        // SETEX rejects 0; sub-second TTLs round up to one second.
        let ttl_secs = ttl.as_secs().max(1);

        let _: () = with_timeout_result(
            self.command_timeout,
            redis::cmd("SETEX")
                .arg(key)
                .arg(ttl_secs)
                .arg(value)
                .query_async(&mut conn),
        )
        .await?;

        debug!(key = %key, ttl_secs, "Dedup key written");
        Ok(())
    }
}

/// In-process store with expiring keys, for tests and local runs without Redis.
#[derive(Default)]
pub struct InMemoryDedupStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    writes: AtomicUsize,
}

impl InMemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value stored under `key`, if present and not expired
    pub async fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(value, _)| value.clone())
    }

    /// Number of live keys
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|(_, exp)| *exp > now).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of `set_with_expiry` calls served
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DedupStore for InMemoryDedupStore {
    async fn exists(&self, key: &str) -> IdempotencyResult<bool> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((_, expires_at)) if *expires_at > Instant::now() => Ok(true),
            Some(_) => {
                entries.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> IdempotencyResult<()> {
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| IdempotencyError::Unavailable(format!("TTL too large: {:?}", ttl)))?;

        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value.to_string(), expires_at));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
