#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use ai_cache_cell::{AiCache, CacheBackend, CacheError, LlmClient, MemoryBackend};
use shared_utils::clock::{Clock, MockClock};

/// LLM double that echoes its input and counts calls.
#[derive(Default)]
pub struct CountingLlm {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

impl CountingLlm {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for CountingLlm {
    async fn complete(&self, operation: &str, input: &Value) -> Result<Value, CacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(CacheError::LlmUnavailable("model offline".to_string()));
        }
        Ok(json!({ "operation": operation, "echo": input }))
    }
}

/// Backend whose every call fails, standing in for a dead Redis.
pub struct BrokenBackend;

#[async_trait]
impl CacheBackend for BrokenBackend {
    fn name(&self) -> &'static str {
        "broken"
    }

    async fn get(&self, _key: &str) -> Result<Option<ai_cache_cell::CacheEntry>, CacheError> {
        Err(CacheError::Timeout(Duration::from_secs(2)))
    }

    async fn set(
        &self,
        _key: &str,
        _entry: &ai_cache_cell::CacheEntry,
        _ttl: Duration,
    ) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection reset".to_string()))
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection reset".to_string()))
    }

    async fn clear(&self, _prefix: &str) -> Result<u64, CacheError> {
        Err(CacheError::Unavailable("connection reset".to_string()))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
}

pub struct CacheEnv {
    pub clock: MockClock,
    pub backend: Arc<MemoryBackend>,
    pub cache: Arc<AiCache>,
    pub llm: Arc<CountingLlm>,
}

impl CacheEnv {
    pub fn new() -> Self {
        let clock = MockClock::new(Utc.with_ymd_and_hms(2030, 1, 1, 8, 0, 0).unwrap());
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let backend = Arc::new(MemoryBackend::new(Arc::clone(&shared)));
        let cache = Arc::new(AiCache::new(
            backend.clone(),
            shared,
            "diagnostic_ai",
            Duration::from_secs(3600),
        ));

        Self {
            clock,
            backend,
            cache,
            llm: Arc::new(CountingLlm::default()),
        }
    }

    /// Runs `operation` through the cache with the counting LLM behind it.
    pub async fn ask(&self, operation: &str, input: &Value) -> Result<(Value, bool), CacheError> {
        let llm = Arc::clone(&self.llm);
        self.cache
            .get_or_compute(operation, input, None, || async move {
                llm.complete(operation, input).await
            })
            .await
    }
}

pub fn cbc_input() -> Value {
    json!({
        "test": "Full Blood Count",
        "results": { "haemoglobin": 13.5, "wbc": 6.2, "platelets": 250 }
    })
}
