// libs/payment-cell/src/services/paystack.rs
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use shared_config::AppConfig;

use crate::models::{
    InitializeTransaction, InitializedTransaction, PaymentError, PaymentProvider,
    ProviderTransactionStatus, RefundReceipt, VerifiedTransaction,
};
use crate::services::gateway::PaymentGateway;
use crate::services::signature::verify_webhook_signature;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(20);
const VERIFY_ATTEMPTS: u32 = 3;
const VERIFY_BACKOFF: Duration = Duration::from_millis(250);

/// Paystack transaction API client.
/// Initialise: POST /transaction/initialize, verify: GET /transaction/verify/{reference},
/// refund: POST /refund. Webhooks are signed with HMAC-SHA512 of the secret key.
pub struct PaystackClient {
    client: Client,
    secret_key: String,
    base_url: String,
}

impl std::fmt::Debug for PaystackClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaystackClient")
            .field("secret_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct PaystackEnvelope<T> {
    status: bool,
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    reference: String,
    status: String,
    amount: i64,
    currency: String,
    channel: Option<String>,
    paid_at: Option<String>,
    customer: Option<CustomerData>,
}

#[derive(Debug, Deserialize)]
struct CustomerData {
    email: Option<String>,
}

impl PaystackClient {
    pub fn new(config: &AppConfig) -> Result<Self, PaymentError> {
        if !config.is_payment_configured() {
            return Err(PaymentError::NotConfigured);
        }

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .build()
            .map_err(|e| PaymentError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            secret_key: config.paystack_secret_key.clone(),
            base_url: config.paystack_base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn send<T>(&self, request: reqwest::RequestBuilder, operation: &str) -> Result<T, PaymentError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let response = request
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| {
                warn!("Paystack {} request failed: {}", operation, e);
                PaymentError::Unavailable(e.to_string())
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PaymentError::Unavailable(e.to_string()))?;

        debug!("Paystack {} response: {}", operation, status);

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            error!("Paystack {} failed: {} - {}", operation, status, body);
            return Err(PaymentError::Unavailable(format!("HTTP {}", status)));
        }

        let envelope: PaystackEnvelope<T> = serde_json::from_str(&body).map_err(|e| {
            if status.is_success() {
                PaymentError::InvalidResponse(format!("failed to parse {} response: {}", operation, e))
            } else {
                PaymentError::Rejected(format!("HTTP {}", status))
            }
        })?;

        if !status.is_success() || !envelope.status {
            warn!("Paystack rejected {}: {} - {}", operation, status, envelope.message);
            return Err(PaymentError::Rejected(envelope.message));
        }

        envelope
            .data
            .ok_or_else(|| PaymentError::InvalidResponse(format!("{} response has no data", operation)))
    }

    async fn verify_once(&self, reference: &str) -> Result<VerifiedTransaction, PaymentError> {
        let url = format!("{}/transaction/verify/{}", self.base_url, reference);
        let data: VerifyData = self.send(self.client.get(&url), "verify").await?;

        let paid_at = data
            .paid_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|at| at.with_timezone(&Utc));

        Ok(VerifiedTransaction {
            reference: data.reference,
            status: ProviderTransactionStatus::parse(&data.status),
            amount_minor: data.amount,
            currency: data.currency,
            channel: data.channel,
            customer_email: data.customer.and_then(|c| c.email),
            paid_at,
        })
    }
}

#[async_trait]
impl PaymentGateway for PaystackClient {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Paystack
    }

    async fn initialize(
        &self,
        request: &InitializeTransaction,
    ) -> Result<InitializedTransaction, PaymentError> {
        info!("Initializing Paystack transaction {}", request.reference);

        let url = format!("{}/transaction/initialize", self.base_url);
        let body = json!({
            "email": request.email,
            "amount": request.amount_minor,
            "reference": request.reference,
            "currency": request.currency,
            "metadata": request.metadata,
        });

        let initialized: InitializedTransaction =
            self.send(self.client.post(&url).json(&body), "initialize").await?;

        if initialized.reference != request.reference {
            return Err(PaymentError::InvalidResponse(format!(
                "provider returned reference {} for {}",
                initialized.reference, request.reference
            )));
        }

        Ok(initialized)
    }

    /// Verification is idempotent, so transient failures are retried a few times.
    async fn verify(&self, reference: &str) -> Result<VerifiedTransaction, PaymentError> {
        let mut attempt = 1;
        loop {
            match self.verify_once(reference).await {
                Err(e) if e.is_retryable() && attempt < VERIFY_ATTEMPTS => {
                    warn!("Verify attempt {} for {} failed: {}", attempt, reference, e);
                    tokio::time::sleep(VERIFY_BACKOFF * attempt).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn refund(&self, reference: &str, amount_minor: i64) -> Result<RefundReceipt, PaymentError> {
        info!("Requesting Paystack refund of {} for {}", amount_minor, reference);

        let url = format!("{}/refund", self.base_url);
        let body = json!({
            "transaction": reference,
            "amount": amount_minor,
        });

        let data: Value = self.send(self.client.post(&url).json(&body), "refund").await?;

        Ok(RefundReceipt {
            reference: reference.to_string(),
            amount_minor: data["amount"].as_i64().unwrap_or(amount_minor),
            status: data["status"].as_str().unwrap_or("pending").to_string(),
        })
    }

    fn verify_webhook_signature(&self, raw_body: &[u8], signature: &str) -> bool {
        verify_webhook_signature(&self.secret_key, raw_body, signature)
    }
}
