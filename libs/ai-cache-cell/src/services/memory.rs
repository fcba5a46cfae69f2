use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use shared_utils::clock::Clock;

use crate::models::{CacheEntry, CacheError};
use crate::services::backend::CacheBackend;

/// Inserts between expiry sweeps.
const SWEEP_EVERY: u64 = 100;

struct Slot {
    entry: CacheEntry,
    evict_at: DateTime<Utc>,
}

/// In-process fallback. Unbounded. Reads return expired entries as stored so
/// the caller can evict them; a sweep every hundred inserts drops the rest.
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, Slot>>,
    inserts: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl MemoryBackend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            inserts: AtomicU64::new(0),
            clock,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, slot| slot.evict_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Swept {} expired AI cache entries", removed);
        }
        removed
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).map(|slot| slot.entry.clone()))
    }

    async fn set(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> Result<(), CacheError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        let slot = Slot {
            entry: entry.clone(),
            evict_at: self.clock.now() + ttl,
        };
        self.entries.write().await.insert(key.to_string(), slot);

        let inserted = self.inserts.fetch_add(1, Ordering::Relaxed) + 1;
        if inserted % SWEEP_EVERY == 0 {
            self.sweep().await;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn clear(&self, prefix: &str) -> Result<u64, CacheError> {
        let scope = format!("{}:", prefix);
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(&scope));
        Ok((before - entries.len()) as u64)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
