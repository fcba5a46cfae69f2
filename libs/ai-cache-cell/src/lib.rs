// =====================================================================================
// AI CACHE CELL - FINGERPRINTED RESPONSE CACHE IN FRONT OF THE LLM
// =====================================================================================

pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use handlers::CacheState;
pub use models::*;
pub use router::{ai_routes, cache_routes};
pub use services::{
    select_backend, AiCache, CacheBackend, CacheMetrics, LlmClient, MemoryBackend, OpenAiClient,
    RedisBackend,
};
