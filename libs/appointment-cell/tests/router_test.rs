mod common;

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use appointment_cell::{appointment_routes, payment_routes, AppointmentState};
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

use common::{monday_at, webhook_body, TestEnv, WEBHOOK_SIGNATURE};

struct Harness {
    env: TestEnv,
    config: TestConfig,
    app: Router,
    patient: TestUser,
}

async fn harness() -> Harness {
    let env = TestEnv::new().await;
    let config = TestConfig::default();
    let state = AppointmentState::new(config.to_arc(), Arc::clone(&env.service));
    let app = Router::new()
        .nest("/v1/appointments", appointment_routes(state.clone()))
        .nest("/v1/payments", payment_routes(state));
    let patient = TestUser::with_id(env.patient.id, "ada@example.com", "patient");

    Harness {
        env,
        config,
        app,
        patient,
    }
}

fn booking_body(env: &TestEnv) -> Value {
    json!({
        "diagnostic_centre_id": env.centre.id,
        "schedule_id": env.schedule.id,
        "appointment_date": monday_at(9, 30),
        "time_slot": "09:30",
        "amount": 5000,
        "payment_provider": "PAYSTACK",
        "preferred_doctor": "Female"
    })
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post_json(uri: &str, auth: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(auth) = auth {
        builder = builder.header("Authorization", auth);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn booking_requires_authentication() {
    let h = harness().await;
    let (status, body) = send(&h.app, post_json("/v1/appointments", None, &booking_body(&h.env))).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn booking_returns_created_with_checkout() {
    let h = harness().await;
    let auth = JwtTestUtils::bearer(&h.patient, &h.config);

    let (status, body) = send(
        &h.app,
        post_json("/v1/appointments", Some(&auth), &booking_body(&h.env)),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["appointment"]["status"], "PENDING");
    assert_eq!(body["data"]["payment"]["amount_minor"], 500000);
    assert!(body["data"]["authorization_url"].as_str().unwrap().starts_with("https://"));
}

#[tokio::test]
async fn full_slot_maps_to_conflict() {
    let h = harness().await;
    h.env.book().await;
    let auth = JwtTestUtils::bearer(&h.patient, &h.config);

    let (status, body) = send(
        &h.app,
        post_json("/v1/appointments", Some(&auth), &booking_body(&h.env)),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "SLOT_FULL");
}

#[tokio::test]
async fn other_patients_cannot_read_appointment() {
    let h = harness().await;
    let booking = h.env.book().await;
    let stranger = TestUser::patient("stranger@example.com");
    let uri = format!("/v1/appointments/{}", booking.appointment.id);

    let request = Request::builder()
        .uri(&uri)
        .header("Authorization", JwtTestUtils::bearer(&stranger, &h.config))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let request = Request::builder()
        .uri(&uri)
        .header("Authorization", JwtTestUtils::bearer(&h.patient, &h.config))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["appointment"]["id"], booking.appointment.id.to_string());
    assert_eq!(body["data"]["payment"]["status"], "PENDING");
}

#[tokio::test]
async fn webhook_is_public_but_signed() {
    let h = harness().await;
    let booking = h.env.book().await;
    let payload = webhook_body("charge.success", &booking.payment.provider_reference);

    let unsigned = Request::builder()
        .method("POST")
        .uri("/v1/payments/webhook")
        .body(Body::from(payload.clone()))
        .unwrap();
    let (status, body) = send(&h.app, unsigned).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "SIGNATURE_MISMATCH");

    let signed = Request::builder()
        .method("POST")
        .uri("/v1/payments/webhook")
        .header("x-paystack-signature", WEBHOOK_SIGNATURE)
        .body(Body::from(payload))
        .unwrap();
    let (status, body) = send(&h.app, signed).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"]["outcome"], "confirmed");
}

#[tokio::test]
async fn cancelling_paid_appointment_is_accepted() {
    let h = harness().await;
    let booking = h.env.book_confirmed().await;
    let auth = JwtTestUtils::bearer(&h.patient, &h.config);

    let (status, body) = send(
        &h.app,
        post_json(
            &format!("/v1/appointments/{}/cancel", booking.appointment.id),
            Some(&auth),
            &json!({ "reason": "schedule conflict" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["appointment"]["status"], "CANCELLED");
    assert_eq!(body["data"]["refund"]["amount_minor"], 500000);
}

#[tokio::test]
async fn verify_endpoint_reports_settlement() {
    let h = harness().await;
    let booking = h.env.book().await;
    let auth = JwtTestUtils::bearer(&h.patient, &h.config);

    let request = Request::builder()
        .uri(format!("/v1/payments/verify/{}", booking.payment.provider_reference))
        .header("Authorization", auth)
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&h.app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["appointment"]["status"], "CONFIRMED");
    assert_eq!(body["data"]["outcome"]["outcome"], "confirmed");
}
