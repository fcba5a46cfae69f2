// libs/appointment-cell/src/router.rs
use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, AppointmentState};

pub fn appointment_routes(state: AppointmentState) -> Router {
    // All appointment operations require authentication
    let protected_routes = Router::new()
        .route("/", post(handlers::create_appointment).get(handlers::list_appointments))
        .route("/confirm_appointment", post(handlers::confirm_appointment))
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/{appointment_id}/reschedule", post(handlers::reschedule_appointment))
        .route("/{appointment_id}/start", post(handlers::start_appointment))
        .route("/{appointment_id}/complete", post(handlers::complete_appointment))
        .route("/{appointment_id}/payment/retry", post(handlers::retry_payment))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}

pub fn payment_routes(state: AppointmentState) -> Router {
    let protected_routes = Router::new()
        .route("/verify/{reference}", get(handlers::verify_payment))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    // Signed by the provider instead of a bearer token
    let public_routes = Router::new().route("/webhook", post(handlers::paystack_webhook));

    Router::new()
        .merge(protected_routes)
        .merge(public_routes)
        .with_state(state)
}
