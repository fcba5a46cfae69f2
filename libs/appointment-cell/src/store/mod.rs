// libs/appointment-cell/src/store/mod.rs
//! Persistence façade for the appointment core.
//!
//! Plain reads go straight to the store. Anything that changes state runs
//! inside a [`StoreTransaction`]; rows read through its `lock_*` methods stay
//! locked until commit or rollback, and dropping an uncommitted transaction
//! discards its writes.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use payment_cell::Payment;

use crate::models::{
    Appointment, AppointmentError, AppointmentFilter, DiagnosticCentre, Page, PatientContact,
    RefundRequest, RescheduleFee, RescheduleRecord, ScheduleSlot,
};

pub use memory::MemoryAppointmentStore;
pub use postgres::PgAppointmentStore;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    Duplicate(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<StoreError> for AppointmentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(what) => AppointmentError::Duplicate(what),
            other => AppointmentError::Internal(other.to_string()),
        }
    }
}

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn get_centre(&self, id: Uuid) -> Result<Option<DiagnosticCentre>, StoreError>;

    async fn get_patient_contact(&self, id: Uuid) -> Result<Option<PatientContact>, StoreError>;

    async fn get_schedule(&self, id: Uuid) -> Result<Option<ScheduleSlot>, StoreError>;

    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>, StoreError>;

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, StoreError>;

    async fn get_payment_by_reference(&self, reference: &str) -> Result<Option<Payment>, StoreError>;

    /// Ordered by appointment date, then id.
    async fn list_appointments(&self, filter: &AppointmentFilter) -> Result<Page<Appointment>, StoreError>;

    /// CONFIRMED appointments in `[from, to]` that have not had a reminder yet,
    /// ordered by date then id and starting strictly after the `after` key.
    async fn find_due_reminders(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        after: Option<(DateTime<Utc>, Uuid)>,
        limit: i64,
    ) -> Result<Vec<Appointment>, StoreError>;

    /// PENDING refunds plus PROCESSING ones whose claim was last touched
    /// before `claimed_before`, oldest first.
    async fn pending_refunds(
        &self,
        claimed_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<RefundRequest>, StoreError>;

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;
}

#[async_trait]
pub trait StoreTransaction: Send {
    async fn lock_schedule(&mut self, id: Uuid) -> Result<Option<ScheduleSlot>, StoreError>;

    async fn lock_appointment(&mut self, id: Uuid) -> Result<Option<Appointment>, StoreError>;

    async fn lock_payment(&mut self, id: Uuid) -> Result<Option<Payment>, StoreError>;

    async fn lock_payment_by_reference(&mut self, reference: &str) -> Result<Option<Payment>, StoreError>;

    async fn lock_refund(&mut self, id: Uuid) -> Result<Option<RefundRequest>, StoreError>;

    /// Active appointments on `schedule_id` whose date falls on `date` (UTC).
    async fn count_active_on_schedule(
        &mut self,
        schedule_id: Uuid,
        date: NaiveDate,
        exclude: Option<Uuid>,
    ) -> Result<i64, StoreError>;

    async fn insert_appointment(&mut self, appointment: &Appointment) -> Result<(), StoreError>;

    async fn update_appointment(&mut self, appointment: &Appointment) -> Result<(), StoreError>;

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), StoreError>;

    async fn update_payment(&mut self, payment: &Payment) -> Result<(), StoreError>;

    async fn insert_reschedule_record(&mut self, record: &RescheduleRecord) -> Result<(), StoreError>;

    async fn insert_reschedule_fee(&mut self, fee: &RescheduleFee) -> Result<(), StoreError>;

    async fn insert_refund(&mut self, refund: &RefundRequest) -> Result<(), StoreError>;

    async fn update_refund(&mut self, refund: &RefundRequest) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
