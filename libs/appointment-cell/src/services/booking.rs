// libs/appointment-cell/src/services/booking.rs
use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use payment_cell::money::is_currency_code;
use payment_cell::{
    InitializeTransaction, Payment, PaymentGateway, PaymentGateways, PaymentMethod, PaymentProvider,
    PaymentStatus,
};
use shared_config::AppConfig;
use shared_models::auth::Role;
use shared_utils::clock::Clock;

use crate::models::{
    Actor, Appointment, AppointmentError, AppointmentFilter, AppointmentStatus, BookingResponse,
    CancelAppointmentRequest, CancellationResult, CreateAppointmentRequest, DiagnosticCentre,
    ListAppointmentsQuery, Page, RefundRequest, RescheduleAppointmentRequest, RescheduleFee,
    RescheduleRecord, RescheduleResult, DEFAULT_LIST_WINDOW_DAYS, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
    MAX_TEXT_LENGTH,
};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::notification::{
    render, NotificationContext, NotificationError, NotificationKind, NotificationSender,
};
use crate::store::{AppointmentStore, StoreTransaction};

const REMINDER_BATCH_SIZE: i64 = 100;
const MAX_TIME_SLOT_LENGTH: usize = 50;

#[derive(Debug, Clone)]
pub struct BookingSettings {
    /// Zero disables reschedule fee rows.
    pub reschedule_fee_minor: i64,
    pub default_currency: String,
    /// Upper bound on a single operation, including provider calls. Nothing
    /// commits after it passes.
    pub operation_timeout: StdDuration,
}

impl BookingSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            reschedule_fee_minor: config.reschedule_fee_minor.max(0),
            default_currency: config.default_currency.to_ascii_uppercase(),
            operation_timeout: StdDuration::from_secs(config.request_timeout_secs.max(1)),
        }
    }
}

impl Default for BookingSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Appointment lifecycle with payment coordination.
pub struct AppointmentBookingService {
    pub(crate) store: Arc<dyn AppointmentStore>,
    pub(crate) gateways: PaymentGateways,
    pub(crate) notifier: Arc<dyn NotificationSender>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) lifecycle: AppointmentLifecycleService,
    pub(crate) settings: BookingSettings,
}

impl AppointmentBookingService {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        gateways: PaymentGateways,
        notifier: Arc<dyn NotificationSender>,
        clock: Arc<dyn Clock>,
        settings: BookingSettings,
    ) -> Self {
        Self {
            store,
            gateways,
            notifier,
            clock,
            lifecycle: AppointmentLifecycleService::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &BookingSettings {
        &self.settings
    }

    // ==============================================================================
    // BOOKING
    // ==============================================================================

    /// Books a PENDING appointment and initialises its payment. The appointment
    /// and payment rows only become visible if the provider accepted the
    /// transaction.
    #[instrument(skip(self, request), fields(patient_id = %actor.id, schedule_id = %request.schedule_id))]
    pub async fn create_appointment(
        &self,
        actor: &Actor,
        request: CreateAppointmentRequest,
    ) -> Result<BookingResponse, AppointmentError> {
        let deadline = self.deadline();
        let booking = self
            .run_with_deadline(deadline, self.create_inner(actor, request, deadline))
            .await?;

        info!(
            "Appointment {} booked with payment reference {}",
            booking.appointment.id, booking.payment.provider_reference
        );
        self.notify(NotificationKind::BookingCreated, &booking.appointment, Some(&booking.payment))
            .await;
        Ok(booking)
    }

    async fn create_inner(
        &self,
        actor: &Actor,
        request: CreateAppointmentRequest,
        deadline: Instant,
    ) -> Result<BookingResponse, AppointmentError> {
        let time_slot = validate_text("time_slot", &request.time_slot, MAX_TIME_SLOT_LENGTH)?;
        let notes = validate_optional_text("notes", request.notes.as_deref())?;
        if request.amount <= 0 {
            return Err(AppointmentError::Validation("amount must be greater than zero".to_string()));
        }
        let currency = self.resolve_currency(request.currency.as_deref())?;
        let gateway = self.gateways.get(request.payment_provider)?;

        let centre = self
            .store
            .get_centre(request.diagnostic_centre_id)
            .await?
            .filter(|c| c.is_active)
            .ok_or(AppointmentError::CentreNotFound)?;
        let patient = self
            .store
            .get_patient_contact(actor.id)
            .await?
            .ok_or_else(|| AppointmentError::NotFound("Patient".to_string()))?;

        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let schedule = tx
            .lock_schedule(request.schedule_id)
            .await?
            .ok_or_else(|| AppointmentError::NotFound("Schedule".to_string()))?;
        self.lifecycle
            .validate_slot(&schedule, centre.id, request.appointment_date, now)?;

        let active = tx
            .count_active_on_schedule(schedule.id, request.appointment_date.date_naive(), None)
            .await?;
        if active >= i64::from(schedule.max_concurrent_appointments) {
            debug!("Schedule {} has {} active appointments", schedule.id, active);
            return Err(AppointmentError::SlotFull);
        }

        let mut appointment = Appointment {
            id: Uuid::new_v4(),
            patient_id: actor.id,
            diagnostic_centre_id: centre.id,
            schedule_id: schedule.id,
            appointment_date: request.appointment_date,
            time_slot,
            status: AppointmentStatus::Pending,
            payment_id: None,
            preferred_doctor: request.preferred_doctor,
            notes,
            previous_appointment_id: None,
            reschedule_reason: None,
            rescheduled_by: None,
            cancellation_reason: None,
            cancelled_by: None,
            reminder_sent: false,
            created_at: now,
            updated_at: now,
        };
        let payment = new_payment(
            &appointment,
            request.amount,
            &currency,
            request.payment_method.unwrap_or(PaymentMethod::Card),
            request.payment_provider,
            now,
        );
        appointment.payment_id = Some(payment.id);

        tx.insert_appointment(&appointment).await?;
        tx.insert_payment(&payment).await?;

        let (payment, authorization_url, access_code) =
            initialize_payment(tx.as_mut(), gateway.as_ref(), payment, &patient.email).await?;

        commit_before(tx, deadline).await?;

        Ok(BookingResponse {
            appointment,
            payment,
            authorization_url,
            access_code,
        })
    }

    // ==============================================================================
    // READS
    // ==============================================================================

    pub async fn get_appointment(&self, actor: &Actor, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        let appointment = self.load_appointment(appointment_id).await?;
        self.authorize_participant(actor, &appointment).await?;
        Ok(appointment)
    }

    /// Non-staff callers only ever see their own appointments.
    #[instrument(skip(self, query), fields(actor_id = %actor.id))]
    pub async fn list_appointments(
        &self,
        actor: &Actor,
        query: ListAppointmentsQuery,
    ) -> Result<Page<Appointment>, AppointmentError> {
        let now = self.clock.now();
        let from = query.from_date.unwrap_or(now);
        let to = query
            .to_date
            .unwrap_or_else(|| from + Duration::days(DEFAULT_LIST_WINDOW_DAYS));
        if from > to {
            return Err(AppointmentError::Validation("from_date must not be after to_date".to_string()));
        }

        let statuses = parse_status_list(query.status.as_deref())?;
        let page = query.page.unwrap_or(1).max(1);
        let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

        let mut filter = AppointmentFilter {
            diagnostic_centre_id: query.diagnostic_centre_id,
            patient_id: query.patient_id,
            statuses,
            from,
            to,
            page,
            page_size,
        };

        match actor.role {
            Role::Admin => {}
            Role::CentreOwner | Role::CentreManager => {
                let centre_id = filter.diagnostic_centre_id.ok_or_else(|| {
                    AppointmentError::Validation("diagnostic_centre_id is required for centre staff".to_string())
                })?;
                let centre = self.load_centre(centre_id).await?;
                if !centre.is_staff(actor) {
                    return Err(AppointmentError::Forbidden(
                        "Not authorized to view appointments for this centre".to_string(),
                    ));
                }
            }
            Role::Patient => {
                filter.patient_id = Some(actor.id);
            }
        }

        Ok(self.store.list_appointments(&filter).await?)
    }

    // ==============================================================================
    // CANCELLATION
    // ==============================================================================

    /// Cancels a PENDING or CONFIRMED appointment. A successful payment gets a
    /// refund request in the same transaction; the provider refund itself is
    /// attempted afterwards and retried by the scheduler when it fails.
    #[instrument(skip(self, request), fields(actor_id = %actor.id))]
    pub async fn cancel_appointment(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        request: CancelAppointmentRequest,
    ) -> Result<CancellationResult, AppointmentError> {
        let reason = validate_text("reason", &request.reason, MAX_TEXT_LENGTH)?;
        let appointment = self.load_appointment(appointment_id).await?;
        self.authorize_participant(actor, &appointment).await?;

        let deadline = self.deadline();
        let (appointment, payment, refund) = self
            .run_with_deadline(deadline, self.cancel_inner(actor, appointment_id, &reason, deadline))
            .await?;

        info!("Appointment {} cancelled by {}", appointment.id, actor.id);
        let refunded_payment = payment.as_ref().filter(|_| refund.is_some());
        self.notify(NotificationKind::AppointmentCancelled, &appointment, refunded_payment)
            .await;

        let refund = match refund {
            Some(refund) => match self.process_refund(refund.clone()).await {
                Ok(updated) => Some(updated),
                Err(e) => {
                    warn!("Refund {} will be retried: {}", refund.id, e);
                    Some(refund)
                }
            },
            None => None,
        };

        Ok(CancellationResult { appointment, refund })
    }

    async fn cancel_inner(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        reason: &str,
        deadline: Instant,
    ) -> Result<(Appointment, Option<Payment>, Option<RefundRequest>), AppointmentError> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let mut appointment = tx
            .lock_appointment(appointment_id)
            .await?
            .ok_or_else(|| AppointmentError::NotFound("Appointment".to_string()))?;
        appointment.cancel(reason, actor.id, now)?;

        let mut refund = None;
        let mut payment = match appointment.payment_id {
            Some(payment_id) => tx.lock_payment(payment_id).await?,
            None => None,
        };

        if let Some(payment) = payment.as_mut() {
            match payment.status {
                PaymentStatus::Success => {
                    let request = RefundRequest::for_payment(payment, reason, now);
                    tx.insert_refund(&request).await?;
                    refund = Some(request);
                }
                PaymentStatus::Pending => {
                    payment.transition(PaymentStatus::Cancelled, now)?;
                    tx.update_payment(payment).await?;
                }
                _ => {}
            }
        }

        tx.update_appointment(&appointment).await?;
        commit_before(tx, deadline).await?;

        Ok((appointment, payment, refund))
    }

    // ==============================================================================
    // RESCHEDULING
    // ==============================================================================

    /// Retires the appointment as RESCHEDULED and books a successor on the new
    /// slot that keeps the prior status and payment.
    #[instrument(skip(self, request), fields(actor_id = %actor.id, new_schedule_id = %request.new_schedule_id))]
    pub async fn reschedule_appointment(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        request: RescheduleAppointmentRequest,
    ) -> Result<RescheduleResult, AppointmentError> {
        let reason = validate_text("reschedule_reason", &request.reschedule_reason, MAX_TEXT_LENGTH)?;
        let time_slot = validate_text("new_time_slot", &request.new_time_slot, MAX_TIME_SLOT_LENGTH)?;
        let appointment = self.load_appointment(appointment_id).await?;
        self.authorize_participant(actor, &appointment).await?;

        let deadline = self.deadline();
        let result = self
            .run_with_deadline(
                deadline,
                self.reschedule_inner(actor, appointment_id, &request, &reason, &time_slot, deadline),
            )
            .await?;

        info!(
            "Appointment {} rescheduled to {} as {}",
            result.previous.id, result.appointment.appointment_date, result.appointment.id
        );
        self.notify(NotificationKind::AppointmentRescheduled, &result.appointment, None)
            .await;
        Ok(result)
    }

    async fn reschedule_inner(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        request: &RescheduleAppointmentRequest,
        reason: &str,
        time_slot: &str,
        deadline: Instant,
    ) -> Result<RescheduleResult, AppointmentError> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let mut previous = tx
            .lock_appointment(appointment_id)
            .await?
            .ok_or_else(|| AppointmentError::NotFound("Appointment".to_string()))?;
        self.lifecycle
            .validate_status_transition(previous.status, AppointmentStatus::Rescheduled)?;

        let schedule = tx
            .lock_schedule(request.new_schedule_id)
            .await?
            .ok_or_else(|| AppointmentError::NotFound("Schedule".to_string()))?;
        self.lifecycle
            .validate_slot(&schedule, previous.diagnostic_centre_id, request.new_date, now)?;

        let active = tx
            .count_active_on_schedule(schedule.id, request.new_date.date_naive(), Some(previous.id))
            .await?;
        if active >= i64::from(schedule.max_concurrent_appointments) {
            return Err(AppointmentError::SlotFull);
        }

        let successor =
            previous.reschedule_into(schedule.id, request.new_date, time_slot, reason, actor.id, now)?;
        tx.update_appointment(&previous).await?;
        tx.insert_appointment(&successor).await?;

        let mut currency = self.settings.default_currency.clone();
        if let Some(payment_id) = successor.payment_id {
            if let Some(mut payment) = tx.lock_payment(payment_id).await? {
                payment.appointment_id = successor.id;
                payment.updated_at = now;
                currency = payment.currency.clone();
                tx.update_payment(&payment).await?;
            }
        }

        let fee_minor = self.settings.reschedule_fee_minor;
        tx.insert_reschedule_record(&RescheduleRecord {
            id: Uuid::new_v4(),
            previous_appointment_id: previous.id,
            new_appointment_id: successor.id,
            reason: reason.to_string(),
            actor_id: actor.id,
            fee_minor,
            created_at: now,
        })
        .await?;

        let fee = if fee_minor > 0 {
            let fee = RescheduleFee {
                id: Uuid::new_v4(),
                appointment_id: successor.id,
                amount_minor: fee_minor,
                currency,
                created_at: now,
            };
            tx.insert_reschedule_fee(&fee).await?;
            Some(fee)
        } else {
            None
        };

        commit_before(tx, deadline).await?;

        Ok(RescheduleResult {
            previous,
            appointment: successor,
            fee,
        })
    }

    // ==============================================================================
    // STAFF TRANSITIONS
    // ==============================================================================

    pub async fn start_appointment(&self, actor: &Actor, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.staff_transition(actor, appointment_id, AppointmentStatus::InProgress).await
    }

    pub async fn complete_appointment(&self, actor: &Actor, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.staff_transition(actor, appointment_id, AppointmentStatus::Completed).await
    }

    #[instrument(skip(self), fields(actor_id = %actor.id))]
    async fn staff_transition(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        to: AppointmentStatus,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.load_appointment(appointment_id).await?;
        let centre = self.load_centre(appointment.diagnostic_centre_id).await?;
        if !centre.is_staff(actor) {
            return Err(AppointmentError::Forbidden(
                "Only centre staff can update appointment progress".to_string(),
            ));
        }

        let deadline = self.deadline();
        let appointment = self
            .run_with_deadline(deadline, async {
                let now = self.clock.now();
                let mut tx = self.store.begin().await?;
                let mut appointment = tx
                    .lock_appointment(appointment_id)
                    .await?
                    .ok_or_else(|| AppointmentError::NotFound("Appointment".to_string()))?;

                self.lifecycle.validate_status_transition(appointment.status, to)?;
                if to == AppointmentStatus::InProgress
                    && !self
                        .lifecycle
                        .can_start_appointment(appointment.status, appointment.appointment_date, now)
                {
                    return Err(AppointmentError::Validation(format!(
                        "Appointment can start at most {} minutes before it is due",
                        self.lifecycle.rules().max_early_start_minutes
                    )));
                }

                appointment.transition(to, now)?;
                tx.update_appointment(&appointment).await?;
                commit_before(tx, deadline).await?;
                Ok(appointment)
            })
            .await?;

        info!("Appointment {} moved to {}", appointment.id, appointment.status);
        Ok(appointment)
    }

    // ==============================================================================
    // REMINDERS
    // ==============================================================================

    /// One page of appointments the reminder job should notify about at `now`,
    /// starting after the `(appointment_date, id)` of the previous page's last row.
    pub async fn due_reminders(
        &self,
        now: DateTime<Utc>,
        after: Option<(DateTime<Utc>, Uuid)>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let (from, to) = self.lifecycle.reminder_window(now);
        Ok(self
            .store
            .find_due_reminders(from, to, after, REMINDER_BATCH_SIZE)
            .await?)
    }

    pub async fn send_reminder(&self, appointment: &Appointment) -> Result<(), NotificationError> {
        let patient = self.store.get_patient_contact(appointment.patient_id).await.ok().flatten();
        let centre = self.store.get_centre(appointment.diagnostic_centre_id).await.ok().flatten();
        let ctx = NotificationContext::new(appointment)
            .with_patient(patient.as_ref())
            .with_centre(centre.as_ref());
        let notification = render(NotificationKind::AppointmentReminder, &ctx, self.clock.now());
        self.notifier.send(&notification).await
    }

    /// Records that a reminder went out. Setting it twice is a no-op.
    pub async fn mark_reminder_sent(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        let deadline = self.deadline();
        self.run_with_deadline(deadline, async {
            let mut tx = self.store.begin().await?;
            let mut appointment = tx
                .lock_appointment(appointment_id)
                .await?
                .ok_or_else(|| AppointmentError::NotFound("Appointment".to_string()))?;

            if appointment.reminder_sent {
                tx.rollback().await?;
                return Ok(appointment);
            }

            if !matches!(
                appointment.status,
                AppointmentStatus::Confirmed | AppointmentStatus::InProgress | AppointmentStatus::Completed
            ) {
                return Err(AppointmentError::Validation(format!(
                    "Reminders do not apply to {} appointments",
                    appointment.status
                )));
            }

            appointment.reminder_sent = true;
            appointment.updated_at = self.clock.now();
            tx.update_appointment(&appointment).await?;
            commit_before(tx, deadline).await?;
            Ok(appointment)
        })
        .await
    }

    // ==============================================================================
    // SHARED HELPERS
    // ==============================================================================

    pub(crate) fn deadline(&self) -> Instant {
        Instant::now() + self.settings.operation_timeout
    }

    pub(crate) async fn run_with_deadline<T, F>(&self, deadline: Instant, operation: F) -> Result<T, AppointmentError>
    where
        F: Future<Output = Result<T, AppointmentError>>,
    {
        match timeout_at(deadline, operation).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Operation abandoned at its deadline");
                Err(AppointmentError::DeadlineExceeded)
            }
        }
    }

    pub(crate) async fn load_appointment(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.store
            .get_appointment(appointment_id)
            .await?
            .ok_or_else(|| AppointmentError::NotFound("Appointment".to_string()))
    }

    pub(crate) async fn load_centre(&self, centre_id: Uuid) -> Result<DiagnosticCentre, AppointmentError> {
        self.store
            .get_centre(centre_id)
            .await?
            .ok_or(AppointmentError::CentreNotFound)
    }

    /// The booking patient or staff of the appointment's centre.
    pub(crate) async fn authorize_participant(
        &self,
        actor: &Actor,
        appointment: &Appointment,
    ) -> Result<(), AppointmentError> {
        if appointment.patient_id == actor.id || actor.is_admin() {
            return Ok(());
        }
        if actor.is_staff() {
            let centre = self.load_centre(appointment.diagnostic_centre_id).await?;
            if centre.is_staff(actor) {
                return Ok(());
            }
        }
        Err(AppointmentError::Forbidden("Not authorized to access this appointment".to_string()))
    }

    pub(crate) fn resolve_currency(&self, requested: Option<&str>) -> Result<String, AppointmentError> {
        let currency = requested
            .map(|c| c.trim().to_ascii_uppercase())
            .unwrap_or_else(|| self.settings.default_currency.clone());
        if !is_currency_code(&currency) {
            return Err(AppointmentError::Validation(format!("invalid currency code {:?}", currency)));
        }
        Ok(currency)
    }

    /// Best effort; a failed notification never fails the operation.
    pub(crate) async fn notify(&self, kind: NotificationKind, appointment: &Appointment, payment: Option<&Payment>) {
        let patient = self.store.get_patient_contact(appointment.patient_id).await.ok().flatten();
        let centre = self.store.get_centre(appointment.diagnostic_centre_id).await.ok().flatten();

        let mut ctx = NotificationContext::new(appointment)
            .with_patient(patient.as_ref())
            .with_centre(centre.as_ref());
        if let Some(payment) = payment {
            ctx = ctx.with_amount(payment.amount_minor, &payment.currency);
        }

        let notification = render(kind, &ctx, self.clock.now());
        if let Err(e) = self.notifier.send(&notification).await {
            warn!("Failed to send {:?} for appointment {}: {}", kind, appointment.id, e);
        }
    }
}

/// Fails with DEADLINE_EXCEEDED, rolling back, once the deadline has passed.
pub(crate) async fn commit_before(tx: Box<dyn StoreTransaction>, deadline: Instant) -> Result<(), AppointmentError> {
    if Instant::now() >= deadline {
        if let Err(e) = tx.rollback().await {
            warn!("Rollback after deadline failed: {}", e);
        }
        return Err(AppointmentError::DeadlineExceeded);
    }
    tx.commit().await?;
    Ok(())
}

pub(crate) fn new_payment(
    appointment: &Appointment,
    amount_minor: i64,
    currency: &str,
    method: PaymentMethod,
    provider: PaymentProvider,
    now: DateTime<Utc>,
) -> Payment {
    Payment {
        id: Uuid::new_v4(),
        appointment_id: appointment.id,
        patient_id: appointment.patient_id,
        diagnostic_centre_id: appointment.diagnostic_centre_id,
        amount_minor,
        currency: currency.to_string(),
        payment_method: method,
        provider,
        provider_reference: new_reference(),
        status: PaymentStatus::Pending,
        refund_amount_minor: 0,
        refund_reason: None,
        authorization_url: None,
        access_code: None,
        metadata: json!({}),
        paid_at: None,
        created_at: now,
        updated_at: now,
    }
}

pub(crate) fn new_reference() -> String {
    format!("DC-{}", Uuid::new_v4().simple())
}

/// Initialises the provider transaction for a freshly inserted payment and
/// stores the checkout details. On provider failure the transaction is rolled
/// back before the error is returned.
pub(crate) async fn initialize_payment(
    tx: &mut dyn StoreTransaction,
    gateway: &dyn PaymentGateway,
    mut payment: Payment,
    email: &str,
) -> Result<(Payment, String, String), AppointmentError> {
    let request = InitializeTransaction {
        email: email.to_string(),
        amount_minor: payment.amount_minor,
        reference: payment.provider_reference.clone(),
        currency: payment.currency.clone(),
        metadata: json!({
            "appointment_id": payment.appointment_id,
            "patient_id": payment.patient_id,
            "diagnostic_centre_id": payment.diagnostic_centre_id,
        }),
    };

    let initialized = gateway.initialize(&request).await.map_err(|e| {
        warn!("Provider rejected initialisation of {}: {}", payment.provider_reference, e);
        AppointmentError::from(e)
    })?;

    payment.authorization_url = Some(initialized.authorization_url.clone());
    payment.access_code = Some(initialized.access_code.clone());
    tx.update_payment(&payment).await?;

    Ok((payment, initialized.authorization_url, initialized.access_code))
}

fn validate_text(field: &str, value: &str, max_len: usize) -> Result<String, AppointmentError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppointmentError::Validation(format!("{} is required", field)));
    }
    if trimmed.chars().count() > max_len {
        return Err(AppointmentError::Validation(format!(
            "{} must be at most {} characters",
            field, max_len
        )));
    }
    Ok(trimmed.to_string())
}

fn validate_optional_text(field: &str, value: Option<&str>) -> Result<Option<String>, AppointmentError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => validate_text(field, v, MAX_TEXT_LENGTH).map(Some),
        None => Ok(None),
    }
}

fn parse_status_list(raw: Option<&str>) -> Result<Vec<AppointmentStatus>, AppointmentError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            AppointmentStatus::parse(s)
                .ok_or_else(|| AppointmentError::Validation(format!("unknown status {:?}", s)))
        })
        .collect()
}
