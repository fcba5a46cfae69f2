pub mod backend;
pub mod cache;
pub mod fingerprint;
pub mod llm;
pub mod memory;
pub mod metrics;
pub mod redis_backend;

pub use backend::{select_backend, CacheBackend};
pub use cache::AiCache;
pub use fingerprint::{cache_key, canonical_json, fingerprint};
pub use llm::{LlmClient, OpenAiClient};
pub use memory::MemoryBackend;
pub use metrics::CacheMetrics;
pub use redis_backend::RedisBackend;
