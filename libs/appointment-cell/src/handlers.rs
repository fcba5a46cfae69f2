// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde_json::json;
use uuid::Uuid;

use payment_cell::PaymentProvider;
use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_models::response::{accepted, created, ok, ApiResponse};

use crate::models::{
    Actor, CancelAppointmentRequest, ConfirmAppointmentRequest, CreateAppointmentRequest,
    ListAppointmentsQuery, RescheduleAppointmentRequest, RetryPaymentRequest,
};
use crate::services::booking::AppointmentBookingService;

pub const PAYSTACK_SIGNATURE_HEADER: &str = "x-paystack-signature";

/// Shared state for appointment and payment routes.
#[derive(Clone)]
pub struct AppointmentState {
    pub config: Arc<AppConfig>,
    pub service: Arc<AppointmentBookingService>,
}

impl AppointmentState {
    pub fn new(config: Arc<AppConfig>, service: Arc<AppointmentBookingService>) -> Self {
        Self { config, service }
    }
}

// ==============================================================================
// APPOINTMENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<ApiResponse, AppError> {
    let actor = Actor::from_user(&user)?;
    let booking = state.service.create_appointment(&actor, request).await?;
    Ok(created(booking))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<ApiResponse, AppError> {
    let actor = Actor::from_user(&user)?;
    let (appointment, payment) = state
        .service
        .appointment_with_payment(&actor, appointment_id)
        .await?;
    Ok(ok(json!({
        "appointment": appointment,
        "payment": payment,
    })))
}

#[axum::debug_handler]
pub async fn list_appointments(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Query(query): Query<ListAppointmentsQuery>,
) -> Result<ApiResponse, AppError> {
    let actor = Actor::from_user(&user)?;
    let page = state.service.list_appointments(&actor, query).await?;
    Ok(ok(page))
}

/// 202 when a refund was queued, 200 otherwise.
#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<CancelAppointmentRequest>,
) -> Result<ApiResponse, AppError> {
    let actor = Actor::from_user(&user)?;
    let result = state
        .service
        .cancel_appointment(&actor, appointment_id, request)
        .await?;

    if result.refund.is_some() {
        Ok(accepted(result))
    } else {
        Ok(ok(result))
    }
}

#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<ApiResponse, AppError> {
    let actor = Actor::from_user(&user)?;
    let result = state
        .service
        .reschedule_appointment(&actor, appointment_id, request)
        .await?;
    Ok(created(result))
}

#[axum::debug_handler]
pub async fn confirm_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Json(request): Json<ConfirmAppointmentRequest>,
) -> Result<ApiResponse, AppError> {
    let actor = Actor::from_user(&user)?;
    let confirmation = state.service.confirm_appointment(&actor, request).await?;
    Ok(ok(confirmation))
}

#[axum::debug_handler]
pub async fn start_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<ApiResponse, AppError> {
    let actor = Actor::from_user(&user)?;
    let appointment = state.service.start_appointment(&actor, appointment_id).await?;
    Ok(ok(appointment))
}

#[axum::debug_handler]
pub async fn complete_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<ApiResponse, AppError> {
    let actor = Actor::from_user(&user)?;
    let appointment = state.service.complete_appointment(&actor, appointment_id).await?;
    Ok(ok(appointment))
}

#[axum::debug_handler]
pub async fn retry_payment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RetryPaymentRequest>,
) -> Result<ApiResponse, AppError> {
    let actor = Actor::from_user(&user)?;
    let booking = state
        .service
        .retry_payment(&actor, appointment_id, request)
        .await?;
    Ok(created(booking))
}

// ==============================================================================
// PAYMENT HANDLERS
// ==============================================================================

/// Provider callback. Authenticated by signature, not by bearer token; the raw
/// body is needed for the HMAC.
#[axum::debug_handler]
pub async fn paystack_webhook(
    State(state): State<AppointmentState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<ApiResponse, AppError> {
    let signature = headers
        .get(PAYSTACK_SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let ack = state
        .service
        .handle_webhook(PaymentProvider::Paystack, &body, signature)
        .await?;
    Ok(ok(ack))
}

#[axum::debug_handler]
pub async fn verify_payment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(reference): Path<String>,
) -> Result<ApiResponse, AppError> {
    let actor = Actor::from_user(&user)?;
    let settlement = state.service.verify_payment(&actor, &reference).await?;
    Ok(ok(settlement))
}
