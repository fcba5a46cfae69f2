use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, instrument, warn};

use shared_config::AppConfig;
use shared_utils::clock::Clock;

use crate::models::{CacheEntry, CacheError, CacheHealth, CacheKey, CacheStats, OPERATION_TTLS};
use crate::services::backend::CacheBackend;
use crate::services::fingerprint::cache_key;
use crate::services::metrics::CacheMetrics;

/// Read-through cache for AI responses, keyed by operation and input
/// fingerprint. Backend failures never fail a caller: lookups degrade to a
/// miss and stores are logged and dropped.
pub struct AiCache {
    backend: Arc<dyn CacheBackend>,
    metrics: CacheMetrics,
    clock: Arc<dyn Clock>,
    prefix: String,
    default_ttl: Duration,
}

impl AiCache {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        clock: Arc<dyn Clock>,
        prefix: impl Into<String>,
        default_ttl: Duration,
    ) -> Self {
        Self {
            backend,
            metrics: CacheMetrics::new(),
            clock,
            prefix: prefix.into(),
            default_ttl,
        }
    }

    pub fn from_config(config: &AppConfig, backend: Arc<dyn CacheBackend>, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            backend,
            clock,
            config.cache_prefix.clone(),
            Duration::from_secs(config.cache_default_ttl_secs),
        )
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn ttl_for(&self, operation: &str) -> Duration {
        OPERATION_TTLS
            .iter()
            .find(|(op, _)| *op == operation)
            .map(|(_, ttl)| *ttl)
            .unwrap_or(self.default_ttl)
    }

    pub fn key(&self, operation: &str, input: &Value) -> CacheKey {
        cache_key(&self.prefix, operation, input)
    }

    /// Returns the cached value for an unexpired entry. Expired entries found
    /// here are deleted.
    pub async fn lookup(&self, operation: &str, input: &Value) -> Option<Value> {
        let key = self.key(operation, input);
        let started = Instant::now();

        let entry = match self.backend.get(&key.key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!("AI cache lookup failed for {}: {}", key.key, e);
                self.metrics.record_error(started.elapsed());
                return None;
            }
        };

        match entry {
            Some(entry) if entry.hash == key.hash && !entry.is_expired(self.clock.now()) => {
                self.metrics.record_hit(started.elapsed());
                debug!("AI cache hit for {}", key.key);
                Some(entry.data)
            }
            Some(_) => {
                self.metrics.record_miss(started.elapsed());
                self.remove(&key.key).await;
                None
            }
            None => {
                self.metrics.record_miss(started.elapsed());
                None
            }
        }
    }

    /// Writes `value` under the operation's TTL, or `ttl_override` when given.
    /// A zero TTL skips the write.
    pub async fn store(
        &self,
        operation: &str,
        input: &Value,
        value: Value,
        ttl_override: Option<Duration>,
    ) {
        let ttl = ttl_override.unwrap_or_else(|| self.ttl_for(operation));
        if ttl.is_zero() {
            debug!("Skipping AI cache store for {}: zero TTL", operation);
            return;
        }

        let key = self.key(operation, input);
        let now = self.clock.now();
        let expires_at = match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now + ttl,
            Err(e) => {
                warn!("AI cache TTL out of range for {}: {}", operation, e);
                return;
            }
        };
        let entry = CacheEntry {
            data: value,
            expires_at,
            created_at: now,
            hash: key.hash.clone(),
        };

        let started = Instant::now();
        match self.backend.set(&key.key, &entry, ttl).await {
            Ok(()) => self.metrics.record_set(started.elapsed()),
            Err(e) => {
                warn!("AI cache store failed for {}: {}", key.key, e);
                self.metrics.record_store_error(started.elapsed());
            }
        }
    }

    /// Deletes one entry. Absent entries are not an error.
    pub async fn invalidate(&self, operation: &str, input: &Value) -> Result<(), CacheError> {
        let key = self.key(operation, input);
        let started = Instant::now();
        self.backend.delete(&key.key).await?;
        self.metrics.record_delete(started.elapsed());
        Ok(())
    }

    /// Removes every entry under this cache's prefix.
    pub async fn clear(&self) -> Result<u64, CacheError> {
        let started = Instant::now();
        let removed = self.backend.clear(&self.prefix).await?;
        self.metrics.record_delete(started.elapsed());
        debug!("Cleared {} AI cache entries", removed);
        Ok(removed)
    }

    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot()
    }

    pub async fn health(&self) -> CacheHealth {
        let started = Instant::now();
        let result = self.backend.ping().await;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        CacheHealth {
            backend: self.backend.name(),
            healthy: result.is_ok(),
            latency_ms,
            error: result.err().map(|e| e.to_string()),
        }
    }

    /// Serves `(value, true)` from the cache, or runs `compute`, stores its
    /// result and returns `(value, false)`. Concurrent misses on one key each
    /// run `compute`; the last store wins.
    #[instrument(skip(self, input, compute))]
    pub async fn get_or_compute<F, Fut>(
        &self,
        operation: &str,
        input: &Value,
        ttl_override: Option<Duration>,
        compute: F,
    ) -> Result<(Value, bool), CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, CacheError>>,
    {
        if let Some(value) = self.lookup(operation, input).await {
            return Ok((value, true));
        }

        let value = compute().await?;
        self.store(operation, input, value.clone(), ttl_override).await;
        Ok((value, false))
    }

    async fn remove(&self, key: &str) {
        let started = Instant::now();
        match self.backend.delete(key).await {
            Ok(()) => self.metrics.record_delete(started.elapsed()),
            Err(e) => warn!("Failed to evict expired AI cache entry {}: {}", key, e),
        }
    }
}
