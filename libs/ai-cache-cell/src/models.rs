use std::time::Duration;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use shared_models::error::AppError;

// ==============================================================================
// OPERATIONS AND TTLS
// ==============================================================================

pub const LAB_INTERPRETATION: &str = "lab_interpretation";
pub const SYMPTOM_ANALYSIS: &str = "symptom_analysis";
pub const REPORT_SUMMARY: &str = "report_summary";
pub const IMAGE_ANALYSIS: &str = "image_analysis";
pub const ANOMALY_DETECTION: &str = "anomaly_detection";
pub const LAB_PACKAGE_ANALYSIS: &str = "lab_package_analysis";
pub const AUTOMATED_REPORT: &str = "automated_report";

/// Operations the AI endpoint serves, with their default TTLs.
pub const OPERATION_TTLS: [(&str, Duration); 7] = [
    (LAB_INTERPRETATION, Duration::from_secs(2 * 3600)),
    (SYMPTOM_ANALYSIS, Duration::from_secs(3600)),
    (REPORT_SUMMARY, Duration::from_secs(4 * 3600)),
    (IMAGE_ANALYSIS, Duration::from_secs(6 * 3600)),
    (ANOMALY_DETECTION, Duration::from_secs(30 * 60)),
    (LAB_PACKAGE_ANALYSIS, Duration::from_secs(3 * 3600)),
    (AUTOMATED_REPORT, Duration::from_secs(8 * 3600)),
];

pub fn is_known_operation(operation: &str) -> bool {
    OPERATION_TTLS.iter().any(|(op, _)| *op == operation)
}

// ==============================================================================
// CACHE ENTRIES
// ==============================================================================

/// Persisted envelope. The same JSON shape is written to every backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: Value,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub hash: String,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Fully qualified backend key plus the input fingerprint it embeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub key: String,
    pub hash: String,
}

// ==============================================================================
// STATS AND HEALTH
// ==============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub sets: u64,
    pub deletes: u64,
    pub operations: u64,
    pub total_response_time_us: u64,
    pub hit_rate: f64,
    pub average_response_time_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    pub backend: &'static str,
    pub healthy: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

// ==============================================================================
// REQUEST / RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct InvalidateRequest {
    pub operation: String,
    pub input: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiOperationRequest {
    pub input: Value,
    /// Overrides the operation's default TTL.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AiOperationResponse {
    pub operation: String,
    pub cached: bool,
    pub result: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearResult {
    pub removed: u64,
}

// ==============================================================================
// ERROR HANDLING
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("Cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cache entry could not be serialised: {0}")]
    Serialization(String),

    #[error("Unknown AI operation: {0}")]
    UnknownOperation(String),

    #[error("AI provider is not configured")]
    LlmNotConfigured,

    #[error("AI provider unavailable: {0}")]
    LlmUnavailable(String),

    #[error("AI provider returned an unusable response: {0}")]
    LlmInvalidResponse(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Unavailable(err.to_string())
    }
}

impl CacheError {
    pub fn code(&self) -> &'static str {
        match self {
            CacheError::Unavailable(_) | CacheError::Timeout(_) => "CACHE_UNAVAILABLE",
            CacheError::Serialization(_) => "INTERNAL",
            CacheError::UnknownOperation(_) => "NOT_FOUND",
            CacheError::LlmNotConfigured | CacheError::LlmUnavailable(_) => "PROVIDER_UNAVAILABLE",
            CacheError::LlmInvalidResponse(_) => "PROVIDER_REJECTED",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            CacheError::Unavailable(_)
            | CacheError::Timeout(_)
            | CacheError::LlmNotConfigured
            | CacheError::LlmUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CacheError::UnknownOperation(_) => StatusCode::NOT_FOUND,
            CacheError::LlmInvalidResponse(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Serialization(detail) => AppError::Internal(detail),
            other => AppError::domain(other.status_code(), other.code(), other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_operations_are_known() {
        assert!(is_known_operation("lab_interpretation"));
        assert!(is_known_operation("automated_report"));
        assert!(!is_known_operation("horoscope"));
    }

    #[test]
    fn cache_outages_map_to_service_unavailable() {
        let err: AppError = CacheError::Timeout(Duration::from_secs(2)).into();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code(), "CACHE_UNAVAILABLE");
    }

    #[test]
    fn entries_expire_at_their_deadline() {
        let now = Utc::now();
        let entry = CacheEntry {
            data: Value::Null,
            expires_at: now,
            created_at: now,
            hash: String::new(),
        };
        assert!(entry.is_expired(now));
        assert!(!entry.is_expired(now - chrono::Duration::seconds(1)));
    }
}
