use assert_matches::assert_matches;
use serde_json::json;
use tokio_test::assert_ok;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use payment_cell::{
    compute_webhook_signature, InitializeTransaction, PaymentError, PaymentGateway,
    PaymentProvider, PaystackClient, ProviderTransactionStatus,
};
use shared_config::AppConfig;

const SECRET: &str = "sk_test_secret";

fn config(base_url: &str) -> AppConfig {
    AppConfig {
        paystack_secret_key: SECRET.to_string(),
        paystack_base_url: base_url.to_string(),
        ..AppConfig::default()
    }
}

fn init_request(reference: &str) -> InitializeTransaction {
    InitializeTransaction {
        email: "patient@example.com".to_string(),
        amount_minor: 500_000,
        reference: reference.to_string(),
        currency: "NGN".to_string(),
        metadata: json!({ "appointment_id": "a-1" }),
    }
}

#[test]
fn client_requires_secret_key() {
    let config = AppConfig::default();
    assert_matches!(PaystackClient::new(&config), Err(PaymentError::NotConfigured));
}

#[tokio::test]
async fn initialize_sends_minor_units_and_returns_checkout() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/transaction/initialize"))
        .and(header("authorization", format!("Bearer {}", SECRET).as_str()))
        .and(body_partial_json(json!({
            "amount": 500000,
            "reference": "DC-abc",
            "currency": "NGN"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": true,
            "message": "Authorization URL created",
            "data": {
                "authorization_url": "https://checkout.paystack.com/xyz",
                "access_code": "xyz",
                "reference": "DC-abc"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = PaystackClient::new(&config(&server.uri())).unwrap();
    assert_eq!(client.provider(), PaymentProvider::Paystack);

    let initialized = assert_ok!(client.initialize(&init_request("DC-abc")).await);
    assert_eq!(initialized.authorization_url, "https://checkout.paystack.com/xyz");
    assert_eq!(initialized.access_code, "xyz");
}

#[tokio::test]
async fn initialize_rejection_is_not_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/transaction/initialize"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "status": false,
            "message": "Invalid email"
        })))
        .mount(&server)
        .await;

    let client = PaystackClient::new(&config(&server.uri())).unwrap();
    let err = client.initialize(&init_request("DC-bad")).await.unwrap_err();
    assert_matches!(&err, PaymentError::Rejected(message) if message == "Invalid email");
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn initialize_server_error_is_unavailable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/transaction/initialize"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let client = PaystackClient::new(&config(&server.uri())).unwrap();
    let err = client.initialize(&init_request("DC-down")).await.unwrap_err();
    assert_matches!(err, PaymentError::Unavailable(_));
}

#[tokio::test]
async fn verify_parses_transaction() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/transaction/verify/DC-ok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": true,
            "message": "Verification successful",
            "data": {
                "reference": "DC-ok",
                "status": "success",
                "amount": 500000,
                "currency": "NGN",
                "channel": "card",
                "paid_at": "2026-03-01T10:00:00.000Z",
                "customer": { "email": "patient@example.com" }
            }
        })))
        .mount(&server)
        .await;

    let client = PaystackClient::new(&config(&server.uri())).unwrap();
    let verified = client.verify("DC-ok").await.unwrap();

    assert_eq!(verified.status, ProviderTransactionStatus::Success);
    assert_eq!(verified.amount_minor, 500_000);
    assert_eq!(verified.currency, "NGN");
    assert_eq!(verified.channel.as_deref(), Some("card"));
    assert_eq!(verified.customer_email.as_deref(), Some("patient@example.com"));
    assert!(verified.paid_at.is_some());
}

#[tokio::test]
async fn verify_retries_transient_failures() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/transaction/verify/DC-flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/transaction/verify/DC-flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": true,
            "message": "Verification successful",
            "data": {
                "reference": "DC-flaky",
                "status": "abandoned",
                "amount": 100,
                "currency": "NGN"
            }
        })))
        .mount(&server)
        .await;

    let client = PaystackClient::new(&config(&server.uri())).unwrap();
    let verified = client.verify("DC-flaky").await.unwrap();
    assert_eq!(verified.status, ProviderTransactionStatus::Abandoned);
    assert!(verified.paid_at.is_none());
}

#[tokio::test]
async fn verify_gives_up_after_repeated_outages() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/transaction/verify/DC-down"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let client = PaystackClient::new(&config(&server.uri())).unwrap();
    assert_matches!(client.verify("DC-down").await, Err(PaymentError::Unavailable(_)));
}

#[tokio::test]
async fn refund_posts_transaction_reference() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/refund"))
        .and(body_partial_json(json!({ "transaction": "DC-paid", "amount": 250000 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": true,
            "message": "Refund has been queued for processing",
            "data": { "amount": 250000, "status": "pending" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = PaystackClient::new(&config(&server.uri())).unwrap();
    let receipt = client.refund("DC-paid", 250_000).await.unwrap();
    assert_eq!(receipt.amount_minor, 250_000);
    assert_eq!(receipt.status, "pending");
}

#[test]
fn webhook_signature_uses_secret_key() {
    let client = PaystackClient::new(&config("http://localhost")).unwrap();
    let body = br#"{"event":"charge.success","data":{"reference":"DC-1"}}"#;

    let signature = compute_webhook_signature(SECRET, body);
    assert!(client.verify_webhook_signature(body, &signature));
    assert!(!client.verify_webhook_signature(body, &compute_webhook_signature("other", body)));
}
