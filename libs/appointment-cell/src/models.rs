// libs/appointment-cell/src/models.rs
use axum::http::StatusCode;
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use payment_cell::money::deserialize_major_amount;
use payment_cell::{Payment, PaymentError, PaymentMethod, PaymentProvider};
use shared_models::auth::{Role, User};
use shared_models::error::AppError;

pub const MAX_TEXT_LENGTH: usize = 500;
pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;
pub const DEFAULT_LIST_WINDOW_DAYS: i64 = 30;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub diagnostic_centre_id: Uuid,
    pub schedule_id: Uuid,
    pub appointment_date: DateTime<Utc>,
    pub time_slot: String,
    pub status: AppointmentStatus,
    pub payment_id: Option<Uuid>,
    pub preferred_doctor: Option<PreferredDoctor>,
    pub notes: Option<String>,
    pub previous_appointment_id: Option<Uuid>,
    pub reschedule_reason: Option<String>,
    pub rescheduled_by: Option<Uuid>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<Uuid>,
    pub reminder_sent: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Moves the appointment along the lifecycle, rejecting anything the state
    /// machine does not allow.
    pub fn transition(&mut self, to: AppointmentStatus, at: DateTime<Utc>) -> Result<(), AppointmentError> {
        if !self.status.can_transition_to(&to) {
            return Err(AppointmentError::IllegalTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = at;
        // A reminder flag only describes a live booking.
        if matches!(to, AppointmentStatus::Cancelled | AppointmentStatus::Rescheduled) {
            self.reminder_sent = false;
        }
        Ok(())
    }

    pub fn cancel(&mut self, reason: &str, actor: Uuid, at: DateTime<Utc>) -> Result<(), AppointmentError> {
        self.transition(AppointmentStatus::Cancelled, at)?;
        self.cancellation_reason = Some(reason.to_string());
        self.cancelled_by = Some(actor);
        Ok(())
    }

    /// Marks this appointment RESCHEDULED and returns the successor that takes
    /// over its status and payment.
    pub fn reschedule_into(
        &mut self,
        schedule_id: Uuid,
        appointment_date: DateTime<Utc>,
        time_slot: &str,
        reason: &str,
        actor: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        let prior_status = self.status;
        self.transition(AppointmentStatus::Rescheduled, at)?;
        self.reschedule_reason = Some(reason.to_string());
        self.rescheduled_by = Some(actor);

        Ok(Appointment {
            id: Uuid::new_v4(),
            patient_id: self.patient_id,
            diagnostic_centre_id: self.diagnostic_centre_id,
            schedule_id,
            appointment_date,
            time_slot: time_slot.to_string(),
            status: prior_status,
            payment_id: self.payment_id,
            preferred_doctor: self.preferred_doctor,
            notes: self.notes.clone(),
            previous_appointment_id: Some(self.id),
            reschedule_reason: Some(reason.to_string()),
            rescheduled_by: Some(actor),
            cancellation_reason: None,
            cancelled_by: None,
            reminder_sent: false,
            created_at: at,
            updated_at: at,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    Rescheduled,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 6] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        AppointmentStatus::InProgress,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::Rescheduled,
    ];

    pub fn can_transition_to(&self, to: &AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, to),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Pending, Rescheduled)
                | (Confirmed, InProgress)
                | (Confirmed, Cancelled)
                | (Confirmed, Rescheduled)
                | (InProgress, Completed)
        )
    }

    /// Statuses that hold a place on a schedule slot.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Pending | AppointmentStatus::Confirmed | AppointmentStatus::InProgress
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::Rescheduled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "PENDING",
            AppointmentStatus::Confirmed => "CONFIRMED",
            AppointmentStatus::InProgress => "IN_PROGRESS",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::Cancelled => "CANCELLED",
            AppointmentStatus::Rescheduled => "RESCHEDULED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(AppointmentStatus::Pending),
            "CONFIRMED" => Some(AppointmentStatus::Confirmed),
            "IN_PROGRESS" => Some(AppointmentStatus::InProgress),
            "COMPLETED" => Some(AppointmentStatus::Completed),
            "CANCELLED" => Some(AppointmentStatus::Cancelled),
            "RESCHEDULED" => Some(AppointmentStatus::Rescheduled),
            _ => None,
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PreferredDoctor {
    Male,
    Female,
}

impl PreferredDoctor {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreferredDoctor::Male => "Male",
            PreferredDoctor::Female => "Female",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Male" => Some(PreferredDoctor::Male),
            "Female" => Some(PreferredDoctor::Female),
            _ => None,
        }
    }
}

// ==============================================================================
// CENTRES, SCHEDULES AND PATIENTS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticCentre {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub manager_ids: Vec<Uuid>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub is_active: bool,
}

impl DiagnosticCentre {
    pub fn is_staff(&self, actor: &Actor) -> bool {
        actor.role == Role::Admin || self.owner_id == actor.id || self.manager_ids.contains(&actor.id)
    }
}

/// A weekly recurring window during which a centre accepts appointments.
/// Times are UTC; `day_of_week` counts from Sunday = 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSlot {
    pub id: Uuid,
    pub diagnostic_centre_id: Uuid,
    pub day_of_week: i16,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_duration_minutes: i32,
    pub break_minutes: i32,
    pub max_concurrent_appointments: i32,
    pub acceptance_status: AcceptanceStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AcceptanceStatus {
    Pending,
    Accepted,
    Rejected,
}

impl AcceptanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcceptanceStatus::Pending => "PENDING",
            AcceptanceStatus::Accepted => "ACCEPTED",
            AcceptanceStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PENDING" => Some(AcceptanceStatus::Pending),
            "ACCEPTED" => Some(AcceptanceStatus::Accepted),
            "REJECTED" => Some(AcceptanceStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientContact {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
}

impl PatientContact {
    pub fn display_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        let name = name.trim();
        if name.is_empty() {
            self.email.clone()
        } else {
            name.to_string()
        }
    }
}

// ==============================================================================
// RESCHEDULE AND REFUND LEDGER
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleRecord {
    pub id: Uuid,
    pub previous_appointment_id: Uuid,
    pub new_appointment_id: Uuid,
    pub reason: String,
    pub actor_id: Uuid,
    pub fee_minor: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleFee {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefundRequest {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub appointment_id: Uuid,
    pub amount_minor: i64,
    pub reason: String,
    pub status: RefundStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RefundRequest {
    /// Full refund of a successful payment.
    pub fn for_payment(payment: &Payment, reason: &str, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payment_id: payment.id,
            appointment_id: payment.appointment_id,
            amount_minor: payment.amount_minor,
            reason: reason.to_string(),
            status: RefundStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: at,
            updated_at: at,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    Pending,
    /// Claimed by a worker that is talking to the provider.
    Processing,
    Completed,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Pending => "PENDING",
            RefundStatus::Processing => "PROCESSING",
            RefundStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PENDING" => Some(RefundStatus::Pending),
            "PROCESSING" => Some(RefundStatus::Processing),
            "COMPLETED" => Some(RefundStatus::Completed),
            _ => None,
        }
    }
}

// ==============================================================================
// CALLERS AND FILTERS
// ==============================================================================

/// Authenticated caller as seen by the appointment core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self { id, role }
    }

    pub fn from_user(user: &User) -> Result<Self, AppointmentError> {
        let id = Uuid::parse_str(&user.id)
            .map_err(|_| AppointmentError::Unauthorized("Token subject is not a valid user id".to_string()))?;
        Ok(Self { id, role: user.role() })
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_staff(&self) -> bool {
        self.role.is_staff()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppointmentFilter {
    pub diagnostic_centre_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub statuses: Vec<AppointmentStatus>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub page: u32,
    pub page_size: u32,
}

impl AppointmentFilter {
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }

    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.diagnostic_centre_id.map_or(true, |id| appointment.diagnostic_centre_id == id)
            && self.patient_id.map_or(true, |id| appointment.patient_id == id)
            && (self.statuses.is_empty() || self.statuses.contains(&appointment.status))
            && appointment.appointment_date >= self.from
            && appointment.appointment_date <= self.to
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
}

// ==============================================================================
// REQUEST / RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAppointmentRequest {
    pub diagnostic_centre_id: Uuid,
    pub schedule_id: Uuid,
    pub appointment_date: DateTime<Utc>,
    pub time_slot: String,
    #[serde(deserialize_with = "deserialize_major_amount")]
    pub amount: i64,
    pub payment_provider: PaymentProvider,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub preferred_doctor: Option<PreferredDoctor>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub new_schedule_id: Uuid,
    pub new_date: DateTime<Utc>,
    pub new_time_slot: String,
    pub reschedule_reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmAppointmentRequest {
    pub appointment_id: Uuid,
    #[serde(deserialize_with = "deserialize_major_amount")]
    pub amount: i64,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub payment_provider: PaymentProvider,
    pub provider_reference: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetryPaymentRequest {
    #[serde(default)]
    pub payment_provider: Option<PaymentProvider>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListAppointmentsQuery {
    pub diagnostic_centre_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    /// Comma separated status list, e.g. `PENDING,CONFIRMED`.
    pub status: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingResponse {
    pub appointment: Appointment,
    pub payment: Payment,
    pub authorization_url: String,
    pub access_code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentConfirmation {
    pub appointment: Appointment,
    pub payment: Payment,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancellationResult {
    pub appointment: Appointment,
    pub refund: Option<RefundRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RescheduleResult {
    pub previous: Appointment,
    pub appointment: Appointment,
    pub fee: Option<RescheduleFee>,
}

/// What a verify-then-transition pass did to a payment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum SettlementOutcome {
    Confirmed,
    AlreadyConfirmed,
    Failed(String),
    Unsettled(String),
    Inactive(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct Settlement {
    pub appointment: Appointment,
    pub payment: Payment,
    pub outcome: SettlementOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookAck {
    pub event: String,
    pub reference: String,
    pub outcome: Option<SettlementOutcome>,
}

// ==============================================================================
// ERROR HANDLING
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum AppointmentError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Diagnostic centre not found")]
    CentreNotFound,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Appointment cannot move from {from} to {to}")]
    IllegalTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Payment cannot be processed: {0}")]
    IllegalPaymentState(String),

    #[error("Schedule slot is fully booked")]
    SlotFull,

    #[error("Schedule not accepted: {0}")]
    ScheduleNotAccepted(String),

    #[error("Invalid appointment date: {0}")]
    InvalidDate(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Payment provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Payment rejected: {0}")]
    ProviderRejected(String),

    #[error("Webhook signature mismatch")]
    SignatureMismatch,

    #[error("Operation exceeded its deadline")]
    DeadlineExceeded,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppointmentError {
    pub fn code(&self) -> &'static str {
        match self {
            AppointmentError::NotFound(_) => "NOT_FOUND",
            AppointmentError::CentreNotFound => "CENTRE_NOT_FOUND",
            AppointmentError::Forbidden(_) => "FORBIDDEN",
            AppointmentError::Unauthorized(_) => "UNAUTHORIZED",
            AppointmentError::Validation(_) => "VALIDATION",
            AppointmentError::IllegalTransition { .. } | AppointmentError::IllegalPaymentState(_) => {
                "ILLEGAL_TRANSITION"
            }
            AppointmentError::SlotFull => "SLOT_FULL",
            AppointmentError::ScheduleNotAccepted(_) => "SCHEDULE_NOT_ACCEPTED",
            AppointmentError::InvalidDate(_) => "INVALID_DATE",
            AppointmentError::Duplicate(_) => "DUPLICATE",
            AppointmentError::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            AppointmentError::ProviderRejected(_) => "PROVIDER_REJECTED",
            AppointmentError::SignatureMismatch => "SIGNATURE_MISMATCH",
            AppointmentError::DeadlineExceeded => "DEADLINE_EXCEEDED",
            AppointmentError::Internal(_) => "INTERNAL",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppointmentError::Unauthorized(_) | AppointmentError::SignatureMismatch => {
                StatusCode::UNAUTHORIZED
            }
            AppointmentError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppointmentError::NotFound(_) | AppointmentError::CentreNotFound => StatusCode::NOT_FOUND,
            AppointmentError::Validation(_)
            | AppointmentError::InvalidDate(_)
            | AppointmentError::ProviderRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppointmentError::IllegalTransition { .. }
            | AppointmentError::IllegalPaymentState(_)
            | AppointmentError::SlotFull
            | AppointmentError::ScheduleNotAccepted(_)
            | AppointmentError::Duplicate(_) => StatusCode::CONFLICT,
            AppointmentError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppointmentError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            AppointmentError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        match err {
            AppointmentError::Internal(detail) => AppError::Internal(detail),
            other => AppError::domain(other.status_code(), other.code(), other.to_string()),
        }
    }
}

impl From<PaymentError> for AppointmentError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::NotConfigured => {
                AppointmentError::Validation("Payment provider is not available".to_string())
            }
            PaymentError::Unavailable(detail) => AppointmentError::ProviderUnavailable(detail),
            PaymentError::Rejected(_) | PaymentError::InvalidResponse(_) => {
                AppointmentError::ProviderRejected("The payment provider declined the request".to_string())
            }
            PaymentError::SignatureMismatch => AppointmentError::SignatureMismatch,
            PaymentError::IllegalTransition { from, to } => {
                AppointmentError::IllegalPaymentState(format!("{} to {}", from, to))
            }
            PaymentError::InvalidRefund(detail) => AppointmentError::Validation(detail),
        }
    }
}
