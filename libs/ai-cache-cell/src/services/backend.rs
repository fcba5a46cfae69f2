use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use shared_config::AppConfig;
use shared_utils::clock::Clock;

use crate::models::{CacheEntry, CacheError};
use crate::services::memory::MemoryBackend;
use crate::services::redis_backend::RedisBackend;

/// Bound on dialling the remote cache at start-up.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(3);
/// Bound on every individual backend call.
pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(2);

/// TTL-aware key/value store holding serialised cache entries.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    async fn set(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> Result<(), CacheError>;

    /// Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Removes every key under `prefix`, returning how many were removed.
    async fn clear(&self, prefix: &str) -> Result<u64, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

/// Dials Redis when configured and falls back to the in-process map when it
/// is absent or unreachable. The choice is fixed for the process lifetime.
pub async fn select_backend(config: &AppConfig, clock: Arc<dyn Clock>) -> Arc<dyn CacheBackend> {
    let Some(url) = config.redis_url.as_deref().filter(|url| !url.is_empty()) else {
        info!("AI cache backend: in-memory (REDIS_URL not set)");
        return Arc::new(MemoryBackend::new(clock));
    };

    match RedisBackend::connect(url, DIAL_TIMEOUT, OPERATION_TIMEOUT).await {
        Ok(backend) => {
            info!("AI cache backend: redis");
            Arc::new(backend)
        }
        Err(e) => {
            warn!("AI cache backend: in-memory (redis unavailable: {})", e);
            Arc::new(MemoryBackend::new(clock))
        }
    }
}
