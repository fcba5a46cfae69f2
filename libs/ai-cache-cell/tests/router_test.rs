mod common;

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use ai_cache_cell::{ai_routes, cache_routes, CacheState, LlmClient};
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

use common::{cbc_input, CacheEnv};

struct Harness {
    env: CacheEnv,
    config: TestConfig,
    app: Router,
}

fn harness(with_llm: bool) -> Harness {
    let env = CacheEnv::new();
    let config = TestConfig::default();
    let llm: Option<Arc<dyn LlmClient>> = if with_llm {
        Some(env.llm.clone() as Arc<dyn LlmClient>)
    } else {
        None
    };
    let state = CacheState::new(config.to_arc(), Arc::clone(&env.cache), llm);
    let app = Router::new()
        .nest("/v1/cache", cache_routes(state.clone()))
        .nest("/v1/ai", ai_routes(state));
    Harness { env, config, app }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post(uri: &str, auth: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("Authorization", auth)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str, auth: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("Authorization", auth)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn cache_routes_require_authentication() {
    let h = harness(true);
    let request = Request::builder().uri("/v1/cache/stats").body(Body::empty()).unwrap();
    let (status, _) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn ai_operation_reports_cache_hit_on_repeat() {
    let h = harness(true);
    let auth = JwtTestUtils::bearer(&TestUser::patient("ada@example.com"), &h.config);
    let body = json!({ "input": cbc_input() });

    let (status, first) = send(&h.app, post("/v1/ai/lab_interpretation", &auth, &body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["data"]["cached"], false);

    let (_, second) = send(&h.app, post("/v1/ai/lab_interpretation", &auth, &body)).await;
    assert_eq!(second["data"]["cached"], true);
    assert_eq!(second["data"]["result"], first["data"]["result"]);
    assert_eq!(h.env.llm.calls(), 1);
}

#[tokio::test]
async fn unknown_operation_is_not_found() {
    let h = harness(true);
    let auth = JwtTestUtils::bearer(&TestUser::patient("ada@example.com"), &h.config);
    let (status, body) = send(
        &h.app,
        post("/v1/ai/horoscope", &auth, &json!({ "input": {} })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(h.env.llm.calls(), 0);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn missing_llm_is_provider_unavailable() {
    let h = harness(false);
    let auth = JwtTestUtils::bearer(&TestUser::patient("ada@example.com"), &h.config);
    let (status, body) = send(
        &h.app,
        post("/v1/ai/report_summary", &auth, &json!({ "input": {} })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "PROVIDER_UNAVAILABLE");
}

#[tokio::test]
async fn clear_is_admin_only() {
    let h = harness(true);
    h.env
        .cache
        .store("report_summary", &json!({"id": 1}), json!("r"), None)
        .await;

    let owner = JwtTestUtils::bearer(&TestUser::centre_owner("owner@example.com"), &h.config);
    let (status, _) = send(&h.app, post("/v1/cache/clear", &owner, &json!({}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = JwtTestUtils::bearer(&TestUser::admin("admin@example.com"), &h.config);
    let (status, body) = send(&h.app, post("/v1/cache/clear", &admin, &json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["removed"], 1);
}

#[tokio::test]
async fn invalidate_and_stats() {
    let h = harness(true);
    let input = cbc_input();
    h.env.cache.store("report_summary", &input, json!("r"), None).await;

    let owner = JwtTestUtils::bearer(&TestUser::centre_owner("owner@example.com"), &h.config);
    let (status, _) = send(
        &h.app,
        post(
            "/v1/cache/invalidate",
            &owner,
            &json!({ "operation": "report_summary", "input": input }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.env.cache.lookup("report_summary", &cbc_input()).await, None);

    let (status, body) = send(&h.app, get("/v1/cache/stats", &owner)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["backend"], "memory");
    assert_eq!(body["data"]["stats"]["sets"], 1);
    assert_eq!(body["data"]["stats"]["deletes"], 1);

    let patient = JwtTestUtils::bearer(&TestUser::patient("ada@example.com"), &h.config);
    let (status, _) = send(&h.app, get("/v1/cache/stats", &patient)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn health_reports_backend() {
    let h = harness(true);
    let auth = JwtTestUtils::bearer(&TestUser::patient("ada@example.com"), &h.config);
    let (status, body) = send(&h.app, get("/v1/cache/health", &auth)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["backend"], "memory");
    assert_eq!(body["data"]["healthy"], true);
}
