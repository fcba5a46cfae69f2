#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use uuid::Uuid;

use appointment_cell::{
    AcceptanceStatus, Actor, AppointmentBookingService, BookingResponse, BookingSettings,
    CreateAppointmentRequest, DiagnosticCentre, MemoryAppointmentStore, Notification,
    NotificationError, NotificationKind, NotificationSender, PatientContact, ScheduleSlot,
};
use payment_cell::{
    InitializeTransaction, InitializedTransaction, PaymentError, PaymentGateway, PaymentGateways,
    PaymentProvider, ProviderTransactionStatus, RefundReceipt, VerifiedTransaction,
};
use shared_models::auth::Role;
use shared_utils::clock::MockClock;

pub const WEBHOOK_SIGNATURE: &str = "valid-signature";
pub const BOOKING_AMOUNT: i64 = 500_000;

/// 2030-01-01 is a Tuesday; the schedule runs on Mondays.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 1, 8, 0, 0).unwrap()
}

pub fn monday_at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 7, hour, minute, 0).unwrap()
}

// ==============================================================================
// FAKE PAYMENT PROVIDER
// ==============================================================================

/// Scriptable provider. Unless told otherwise every initialised transaction
/// verifies as a success for the amount it was initialised with.
#[derive(Default)]
pub struct FakeGateway {
    initialized: Mutex<HashMap<String, InitializeTransaction>>,
    verify_overrides: Mutex<HashMap<String, VerifiedTransaction>>,
    pub fail_initialize: AtomicBool,
    pub fail_verify: AtomicBool,
    pub fail_refund: AtomicBool,
    pub initialize_delay: Mutex<Option<StdDuration>>,
    pub verify_delay: Mutex<Option<StdDuration>>,
    pub refund_delay: Mutex<Option<StdDuration>>,
    pub verify_calls: AtomicUsize,
    pub refund_calls: AtomicUsize,
}

impl FakeGateway {
    pub fn set_verified(&self, reference: &str, status: ProviderTransactionStatus, amount_minor: i64, currency: &str) {
        self.verify_overrides.lock().unwrap().insert(
            reference.to_string(),
            VerifiedTransaction {
                reference: reference.to_string(),
                status,
                amount_minor,
                currency: currency.to_string(),
                channel: Some("card".to_string()),
                customer_email: None,
                paid_at: None,
            },
        );
    }

    pub fn initialized_count(&self) -> usize {
        self.initialized.lock().unwrap().len()
    }

    pub fn verify_count(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn refund_count(&self) -> usize {
        self.refund_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Paystack
    }

    async fn initialize(&self, request: &InitializeTransaction) -> Result<InitializedTransaction, PaymentError> {
        let delay = *self.initialize_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_initialize.load(Ordering::SeqCst) {
            return Err(PaymentError::Rejected("Invalid amount".to_string()));
        }

        self.initialized
            .lock()
            .unwrap()
            .insert(request.reference.clone(), request.clone());
        Ok(InitializedTransaction {
            authorization_url: format!("https://checkout.example.com/{}", request.reference),
            access_code: format!("ac_{}", request.reference),
            reference: request.reference.clone(),
        })
    }

    async fn verify(&self, reference: &str) -> Result<VerifiedTransaction, PaymentError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.verify_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_verify.load(Ordering::SeqCst) {
            return Err(PaymentError::Unavailable("status 503".to_string()));
        }

        if let Some(verified) = self.verify_overrides.lock().unwrap().get(reference) {
            return Ok(verified.clone());
        }

        let initialized = self.initialized.lock().unwrap();
        let request = initialized
            .get(reference)
            .ok_or_else(|| PaymentError::Rejected("Transaction reference not found".to_string()))?;
        Ok(VerifiedTransaction {
            reference: reference.to_string(),
            status: ProviderTransactionStatus::Success,
            amount_minor: request.amount_minor,
            currency: request.currency.clone(),
            channel: Some("card".to_string()),
            customer_email: Some(request.email.clone()),
            paid_at: None,
        })
    }

    async fn refund(&self, reference: &str, amount_minor: i64) -> Result<RefundReceipt, PaymentError> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.refund_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_refund.load(Ordering::SeqCst) {
            return Err(PaymentError::Unavailable("status 502".to_string()));
        }
        Ok(RefundReceipt {
            reference: reference.to_string(),
            amount_minor,
            status: "processed".to_string(),
        })
    }

    fn verify_webhook_signature(&self, _raw_body: &[u8], signature: &str) -> bool {
        signature == WEBHOOK_SIGNATURE
    }
}

// ==============================================================================
// RECORDING NOTIFIER
// ==============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    pub fail: AtomicBool,
    /// Appointments whose notifications always fail.
    pub fail_for: Mutex<HashSet<Uuid>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.sent.lock().unwrap().iter().filter(|n| n.kind == kind).count()
    }
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        if self.fail.load(Ordering::SeqCst)
            || self.fail_for.lock().unwrap().contains(&notification.appointment_id)
        {
            return Err(NotificationError::Delivery("smtp unavailable".to_string()));
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

// ==============================================================================
// FIXTURE
// ==============================================================================

pub struct TestEnv {
    pub store: MemoryAppointmentStore,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: MockClock,
    pub service: Arc<AppointmentBookingService>,
    pub patient: Actor,
    pub owner: Actor,
    pub centre: DiagnosticCentre,
    pub schedule: ScheduleSlot,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_settings(BookingSettings {
            reschedule_fee_minor: 0,
            default_currency: "NGN".to_string(),
            operation_timeout: StdDuration::from_secs(5),
        })
        .await
    }

    pub async fn with_settings(settings: BookingSettings) -> Self {
        let store = MemoryAppointmentStore::new();
        let gateway = Arc::new(FakeGateway::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = MockClock::new(now());

        let patient = Actor::new(Uuid::new_v4(), Role::Patient);
        let owner = Actor::new(Uuid::new_v4(), Role::CentreOwner);

        store
            .add_patient(PatientContact {
                id: patient.id,
                email: "ada@example.com".to_string(),
                first_name: "Ada".to_string(),
                last_name: "Obi".to_string(),
                phone: None,
            })
            .await;

        let centre = DiagnosticCentre {
            id: Uuid::new_v4(),
            name: "Lekki Diagnostics".to_string(),
            owner_id: owner.id,
            manager_ids: Vec::new(),
            email: Some("desk@lekki.example.com".to_string()),
            phone: None,
            is_active: true,
        };
        store.add_centre(centre.clone()).await;

        let schedule = schedule_for(centre.id, 1);
        store.add_schedule(schedule.clone()).await;

        let service = Arc::new(AppointmentBookingService::new(
            Arc::new(store.clone()),
            PaymentGateways::new().with(gateway.clone()),
            notifier.clone(),
            Arc::new(clock.clone()),
            settings,
        ));

        Self {
            store,
            gateway,
            notifier,
            clock,
            service,
            patient,
            owner,
            centre,
            schedule,
        }
    }

    /// Registers another patient with a contact record.
    pub async fn add_patient(&self, email: &str) -> Actor {
        let actor = Actor::new(Uuid::new_v4(), Role::Patient);
        self.store
            .add_patient(PatientContact {
                id: actor.id,
                email: email.to_string(),
                first_name: "Test".to_string(),
                last_name: "Patient".to_string(),
                phone: None,
            })
            .await;
        actor
    }

    pub async fn add_schedule(&self, max_concurrent: i32) -> ScheduleSlot {
        let schedule = schedule_for(self.centre.id, max_concurrent);
        self.store.add_schedule(schedule.clone()).await;
        schedule
    }

    pub fn request_at(&self, schedule: &ScheduleSlot, date: DateTime<Utc>) -> CreateAppointmentRequest {
        CreateAppointmentRequest {
            diagnostic_centre_id: self.centre.id,
            schedule_id: schedule.id,
            appointment_date: date,
            time_slot: format!("{}", date.format("%H:%M")),
            amount: BOOKING_AMOUNT,
            payment_provider: PaymentProvider::Paystack,
            payment_method: None,
            currency: Some("NGN".to_string()),
            preferred_doctor: None,
            notes: None,
        }
    }

    pub async fn book(&self) -> BookingResponse {
        self.service
            .create_appointment(&self.patient, self.request_at(&self.schedule, monday_at(9, 30)))
            .await
            .expect("booking should succeed")
    }

    /// Books and confirms through the webhook path.
    pub async fn book_confirmed(&self) -> BookingResponse {
        let booking = self.book().await;
        self.confirm(&booking).await;
        booking
    }

    /// Books `schedule` at `date` for the default patient and confirms it.
    pub async fn book_confirmed_at(&self, schedule: &ScheduleSlot, date: DateTime<Utc>) -> BookingResponse {
        let booking = self
            .service
            .create_appointment(&self.patient, self.request_at(schedule, date))
            .await
            .expect("booking should succeed");
        self.confirm(&booking).await;
        booking
    }

    async fn confirm(&self, booking: &BookingResponse) {
        self.service
            .handle_webhook(
                PaymentProvider::Paystack,
                &webhook_body("charge.success", &booking.payment.provider_reference),
                Some(WEBHOOK_SIGNATURE),
            )
            .await
            .expect("webhook should settle");
    }
}

pub fn schedule_for(centre_id: Uuid, max_concurrent: i32) -> ScheduleSlot {
    ScheduleSlot {
        id: Uuid::new_v4(),
        diagnostic_centre_id: centre_id,
        day_of_week: 1,
        start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        end_time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
        slot_duration_minutes: 30,
        break_minutes: 0,
        max_concurrent_appointments: max_concurrent,
        acceptance_status: AcceptanceStatus::Accepted,
    }
}

pub fn webhook_body(event: &str, reference: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "event": event,
        "data": {
            "reference": reference,
            "status": "success",
            "amount": BOOKING_AMOUNT,
            "currency": "NGN"
        }
    }))
    .unwrap()
}
