use std::sync::Arc;
use std::time::Duration;

use axum::{
    error_handling::HandleErrorLayer,
    http::{HeaderValue, StatusCode},
    response::IntoResponse,
    routing::get,
    BoxError, Json, Router,
};
use serde_json::json;
use tower::{buffer::BufferLayer, limit::RateLimitLayer, ServiceBuilder};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{self, TraceLayer};
use tracing::{warn, Level};

use ai_cache_cell::{ai_routes, cache_routes, CacheState};
use appointment_cell::{appointment_routes, payment_routes, AppointmentState};
use shared_config::AppConfig;

pub fn create_router(
    config: Arc<AppConfig>,
    appointments: AppointmentState,
    cache: CacheState,
) -> Router {
    let routes = Router::new()
        .route("/", get(|| async { "Diagnostic Centre API is running!" }))
        .nest("/v1/appointments", appointment_routes(appointments.clone()))
        .nest("/v1/payments", payment_routes(appointments))
        .nest("/v1/cache", cache_routes(cache.clone()))
        .nest("/v1/ai", ai_routes(cache));

    // One limiter for every route. Router::layer would build one per route.
    let limited = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(handle_middleware_error))
        .layer(BufferLayer::new(1024))
        .layer(RateLimitLayer::new(
            config.rate_limit_per_second.max(1),
            Duration::from_secs(1),
        ))
        .service(routes);

    Router::new()
        .fallback_service(limited)
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs.max(1))))
        .layer(cors_layer(&config))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if config.allow_origins.is_empty() || config.allow_origins.iter().any(|o| o == "*") {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .allow_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

// Only reached when the buffer worker has failed.
async fn handle_middleware_error(err: BoxError) -> impl IntoResponse {
    warn!("Request rejected by middleware: {}", err);
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "success": false,
            "error": { "code": "SERVICE_UNAVAILABLE", "message": "Service temporarily unavailable" }
        })),
    )
}
