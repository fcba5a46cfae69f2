// libs/ai-cache-cell/src/handlers.rs
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use serde_json::json;
use tracing::info;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_models::response::{envelope, ok, ApiResponse};

use crate::models::{
    is_known_operation, AiOperationRequest, AiOperationResponse, CacheError, ClearResult,
    InvalidateRequest,
};
use crate::services::{AiCache, LlmClient};

/// Shared state for cache administration and cached AI operations.
#[derive(Clone)]
pub struct CacheState {
    pub config: Arc<AppConfig>,
    pub cache: Arc<AiCache>,
    pub llm: Option<Arc<dyn LlmClient>>,
}

impl CacheState {
    pub fn new(config: Arc<AppConfig>, cache: Arc<AiCache>, llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self { config, cache, llm }
    }
}

// ==============================================================================
// CACHE ADMINISTRATION
// ==============================================================================

#[axum::debug_handler]
pub async fn cache_stats(
    State(state): State<CacheState>,
    Extension(user): Extension<User>,
) -> Result<ApiResponse, AppError> {
    require_staff(&user)?;
    Ok(ok(json!({
        "backend": state.cache.backend_name(),
        "stats": state.cache.stats(),
    })))
}

#[axum::debug_handler]
pub async fn clear_cache(
    State(state): State<CacheState>,
    Extension(user): Extension<User>,
) -> Result<ApiResponse, AppError> {
    if !user.is_admin() {
        return Err(AppError::Forbidden("Only admins can clear the AI cache".to_string()));
    }
    let removed = state.cache.clear().await?;
    info!("AI cache cleared by {}: {} entries removed", user.id, removed);
    Ok(ok(ClearResult { removed }))
}

#[axum::debug_handler]
pub async fn invalidate_entry(
    State(state): State<CacheState>,
    Extension(user): Extension<User>,
    Json(request): Json<InvalidateRequest>,
) -> Result<ApiResponse, AppError> {
    require_staff(&user)?;
    if request.operation.trim().is_empty() {
        return Err(AppError::ValidationError("operation is required".to_string()));
    }
    state.cache.invalidate(&request.operation, &request.input).await?;
    Ok(ok(json!({ "invalidated": true })))
}

#[axum::debug_handler]
pub async fn cache_health(
    State(state): State<CacheState>,
    Extension(_user): Extension<User>,
) -> Result<ApiResponse, AppError> {
    let health = state.cache.health().await;
    let status = if health.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok(envelope(status, health))
}

// ==============================================================================
// CACHED AI OPERATIONS
// ==============================================================================

#[axum::debug_handler]
pub async fn run_operation(
    State(state): State<CacheState>,
    Extension(_user): Extension<User>,
    Path(operation): Path<String>,
    Json(request): Json<AiOperationRequest>,
) -> Result<ApiResponse, AppError> {
    if !is_known_operation(&operation) {
        return Err(CacheError::UnknownOperation(operation).into());
    }
    let llm = state.llm.clone().ok_or(CacheError::LlmNotConfigured)?;
    let ttl_override = request.ttl_secs.map(Duration::from_secs);

    let input = &request.input;
    let op = operation.as_str();
    let (result, cached) = state
        .cache
        .get_or_compute(op, input, ttl_override, move || async move {
            llm.complete(op, input).await
        })
        .await?;

    Ok(ok(AiOperationResponse {
        operation,
        cached,
        result,
    }))
}

fn require_staff(user: &User) -> Result<(), AppError> {
    if user.is_staff() {
        Ok(())
    } else {
        Err(AppError::Forbidden("Cache administration requires a staff role".to_string()))
    }
}
