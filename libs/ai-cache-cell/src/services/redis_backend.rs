use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use tracing::debug;

use crate::models::{CacheEntry, CacheError};
use crate::services::backend::CacheBackend;

const SCAN_BATCH: u64 = 100;

/// Remote backend. Entries are stored as JSON with a native `EX` so a restart
/// cannot resurrect anything past its TTL.
pub struct RedisBackend {
    pool: Pool,
    op_timeout: Duration,
}

impl RedisBackend {
    /// Builds the pool and proves it with a PING inside `dial_timeout`.
    pub async fn connect(
        url: &str,
        dial_timeout: Duration,
        op_timeout: Duration,
    ) -> Result<Self, CacheError> {
        let pool = Config::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::Unavailable(format!("Failed to create Redis pool: {}", e)))?;

        let backend = Self { pool, op_timeout };
        with_timeout(dial_timeout, backend.ping_once()).await?;
        Ok(backend)
    }

    async fn connection(&self) -> Result<Connection, CacheError> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::Unavailable(format!("Failed to get Redis connection: {}", e)))
    }

    async fn ping_once(&self) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn clear_once(&self, prefix: &str) -> Result<u64, CacheError> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}:*", prefix);
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let deleted: u64 = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
                removed += deleted;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!("Cleared {} redis keys under {}", removed, pattern);
        Ok(removed)
    }
}

async fn with_timeout<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, CacheError>>,
) -> Result<T, CacheError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| CacheError::Timeout(limit))?
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        with_timeout(self.op_timeout, async {
            let mut conn = self.connection().await?;
            let raw: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
            match raw {
                Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn set(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> Result<(), CacheError> {
        let payload = serde_json::to_string(entry)?;
        let seconds = ttl.as_secs().max(1);
        with_timeout(self.op_timeout, async {
            let mut conn = self.connection().await?;
            let _: () = redis::cmd("SET")
                .arg(key)
                .arg(payload)
                .arg("EX")
                .arg(seconds)
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        with_timeout(self.op_timeout, async {
            let mut conn = self.connection().await?;
            let _: u64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    async fn clear(&self, prefix: &str) -> Result<u64, CacheError> {
        // A full SCAN may take several round trips.
        with_timeout(self.op_timeout * 5, self.clear_once(prefix)).await
    }

    async fn ping(&self) -> Result<(), CacheError> {
        with_timeout(self.op_timeout, self.ping_once()).await
    }
}
