// libs/ai-cache-cell/src/router.rs
use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, CacheState};

pub fn cache_routes(state: CacheState) -> Router {
    Router::new()
        .route("/stats", get(handlers::cache_stats))
        .route("/clear", post(handlers::clear_cache))
        .route("/invalidate", post(handlers::invalidate_entry))
        .route("/health", get(handlers::cache_health))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware))
        .with_state(state)
}

pub fn ai_routes(state: CacheState) -> Router {
    Router::new()
        .route("/{operation}", post(handlers::run_operation))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware))
        .with_state(state)
}
