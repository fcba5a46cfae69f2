// libs/payment-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// PAYMENT RECORD
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub diagnostic_centre_id: Uuid,
    /// Amount in minor units (kobo, cents).
    pub amount_minor: i64,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub provider: PaymentProvider,
    pub provider_reference: String,
    pub status: PaymentStatus,
    pub refund_amount_minor: i64,
    pub refund_reason: Option<String>,
    pub authorization_url: Option<String>,
    pub access_code: Option<String>,
    pub metadata: Value,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Applies a status change, enforcing the monotone transition order.
    pub fn transition(&mut self, to: PaymentStatus, at: DateTime<Utc>) -> Result<(), PaymentError> {
        if !self.status.can_transition_to(&to) {
            return Err(PaymentError::IllegalTransition {
                from: self.status,
                to,
            });
        }

        if to == PaymentStatus::Success {
            self.paid_at = Some(at);
        }
        self.status = to;
        self.updated_at = at;
        Ok(())
    }

    /// Records a completed refund. Only successful payments can be refunded,
    /// and never for more than was paid.
    pub fn record_refund(
        &mut self,
        amount_minor: i64,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<(), PaymentError> {
        if amount_minor <= 0 || amount_minor > self.amount_minor {
            return Err(PaymentError::InvalidRefund(format!(
                "refund of {} exceeds paid amount {}",
                amount_minor, self.amount_minor
            )));
        }

        self.transition(PaymentStatus::Refunded, at)?;
        self.refund_amount_minor = amount_minor;
        self.refund_reason = Some(reason.to_string());
        Ok(())
    }

    pub fn matches_amount(&self, amount_minor: i64, currency: &str) -> bool {
        self.amount_minor == amount_minor && self.currency.eq_ignore_ascii_case(currency)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
    Refunded,
    Cancelled,
}

impl PaymentStatus {
    pub fn can_transition_to(&self, to: &PaymentStatus) -> bool {
        matches!(
            (self, to),
            (PaymentStatus::Pending, PaymentStatus::Success)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
                | (PaymentStatus::Pending, PaymentStatus::Cancelled)
                | (PaymentStatus::Success, PaymentStatus::Refunded)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
            PaymentStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PENDING" => Some(PaymentStatus::Pending),
            "SUCCESS" => Some(PaymentStatus::Success),
            "FAILED" => Some(PaymentStatus::Failed),
            "REFUNDED" => Some(PaymentStatus::Refunded),
            "CANCELLED" => Some(PaymentStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Card,
    Transfer,
    Cash,
    Wallet,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::Transfer => "transfer",
            PaymentMethod::Cash => "cash",
            PaymentMethod::Wallet => "wallet",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "card" => Some(PaymentMethod::Card),
            "transfer" | "bank_transfer" | "bank" => Some(PaymentMethod::Transfer),
            "cash" => Some(PaymentMethod::Cash),
            "wallet" | "mobile_money" | "ussd" => Some(PaymentMethod::Wallet),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentProvider {
    Paystack,
    Flutterwave,
    Stripe,
    Monnify,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::Paystack => "PAYSTACK",
            PaymentProvider::Flutterwave => "FLUTTERWAVE",
            PaymentProvider::Stripe => "STRIPE",
            PaymentProvider::Monnify => "MONNIFY",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "PAYSTACK" => Some(PaymentProvider::Paystack),
            "FLUTTERWAVE" => Some(PaymentProvider::Flutterwave),
            "STRIPE" => Some(PaymentProvider::Stripe),
            "MONNIFY" => Some(PaymentProvider::Monnify),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==============================================================================
// PROVIDER CONTRACT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct InitializeTransaction {
    pub email: String,
    pub amount_minor: i64,
    pub reference: String,
    pub currency: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializedTransaction {
    pub authorization_url: String,
    pub access_code: String,
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderTransactionStatus {
    Success,
    Failed,
    Abandoned,
    /// Anything the provider still considers in flight (`ongoing`, `pending`, ...).
    Pending(String),
}

impl ProviderTransactionStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "success" => ProviderTransactionStatus::Success,
            "failed" | "reversed" => ProviderTransactionStatus::Failed,
            "abandoned" => ProviderTransactionStatus::Abandoned,
            other => ProviderTransactionStatus::Pending(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifiedTransaction {
    pub reference: String,
    pub status: ProviderTransactionStatus,
    pub amount_minor: i64,
    pub currency: String,
    pub channel: Option<String>,
    pub customer_email: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundReceipt {
    pub reference: String,
    pub amount_minor: i64,
    pub status: String,
}

/// Webhook body as delivered by the provider. Only the fields the core acts on
/// are modelled; the transaction is always re-verified before use.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub reference: String,
    pub status: Option<String>,
    pub amount: Option<i64>,
    pub currency: Option<String>,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum PaymentError {
    #[error("Payment provider is not configured")]
    NotConfigured,

    #[error("Payment provider unavailable: {0}")]
    Unavailable(String),

    #[error("Payment provider rejected the request: {0}")]
    Rejected(String),

    #[error("Unexpected payment provider response: {0}")]
    InvalidResponse(String),

    #[error("Webhook signature mismatch")]
    SignatureMismatch,

    #[error("Illegal payment transition from {from} to {to}")]
    IllegalTransition { from: PaymentStatus, to: PaymentStatus },

    #[error("Invalid refund: {0}")]
    InvalidRefund(String),
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PaymentError::Unavailable(_))
    }
}
