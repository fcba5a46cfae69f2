// libs/appointment-cell/src/store/memory.rs
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;
use uuid::Uuid;

use payment_cell::Payment;

use crate::models::{
    Appointment, AppointmentFilter, AppointmentStatus, DiagnosticCentre, Page, PatientContact,
    RefundRequest, RefundStatus, RescheduleFee, RescheduleRecord, ScheduleSlot,
};
use crate::store::{AppointmentStore, StoreError, StoreTransaction};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    patients: HashMap<Uuid, PatientContact>,
    centres: HashMap<Uuid, DiagnosticCentre>,
    schedules: HashMap<Uuid, ScheduleSlot>,
    appointments: HashMap<Uuid, Appointment>,
    payments: HashMap<Uuid, Payment>,
    reschedules: Vec<RescheduleRecord>,
    reschedule_fees: Vec<RescheduleFee>,
    refunds: HashMap<Uuid, RefundRequest>,
}

/// In-process store for development and tests.
///
/// Transactions run one at a time behind `writer` and stage their changes on
/// a copy, so the history is serialisable. A transaction keeps that slot for
/// as long as it is open, including any provider call made before commit.
/// Plain reads go to the committed state and never wait for it.
#[derive(Clone, Default)]
pub struct MemoryAppointmentStore {
    state: Arc<RwLock<MemoryState>>,
    writer: Arc<Mutex<()>>,
}

impl MemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_patient(&self, patient: PatientContact) {
        let _writer = self.writer.lock().await;
        self.state.write().await.patients.insert(patient.id, patient);
    }

    pub async fn add_centre(&self, centre: DiagnosticCentre) {
        let _writer = self.writer.lock().await;
        self.state.write().await.centres.insert(centre.id, centre);
    }

    pub async fn add_schedule(&self, schedule: ScheduleSlot) {
        let _writer = self.writer.lock().await;
        self.state.write().await.schedules.insert(schedule.id, schedule);
    }

    pub async fn appointments(&self) -> Vec<Appointment> {
        let mut all: Vec<Appointment> = self.state.read().await.appointments.values().cloned().collect();
        all.sort_by_key(|a| (a.appointment_date, a.id));
        all
    }

    pub async fn payments(&self) -> Vec<Payment> {
        self.state.read().await.payments.values().cloned().collect()
    }

    pub async fn refunds(&self) -> Vec<RefundRequest> {
        self.state.read().await.refunds.values().cloned().collect()
    }

    pub async fn reschedule_records(&self) -> Vec<RescheduleRecord> {
        self.state.read().await.reschedules.clone()
    }

    pub async fn reschedule_fees(&self) -> Vec<RescheduleFee> {
        self.state.read().await.reschedule_fees.clone()
    }
}

#[async_trait]
impl AppointmentStore for MemoryAppointmentStore {
    async fn get_centre(&self, id: Uuid) -> Result<Option<DiagnosticCentre>, StoreError> {
        Ok(self.state.read().await.centres.get(&id).cloned())
    }

    async fn get_patient_contact(&self, id: Uuid) -> Result<Option<PatientContact>, StoreError> {
        Ok(self.state.read().await.patients.get(&id).cloned())
    }

    async fn get_schedule(&self, id: Uuid) -> Result<Option<ScheduleSlot>, StoreError> {
        Ok(self.state.read().await.schedules.get(&id).cloned())
    }

    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.state.read().await.appointments.get(&id).cloned())
    }

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        Ok(self.state.read().await.payments.get(&id).cloned())
    }

    async fn get_payment_by_reference(&self, reference: &str) -> Result<Option<Payment>, StoreError> {
        Ok(self.state.read().await.find_payment_by_reference(reference).cloned())
    }

    async fn list_appointments(&self, filter: &AppointmentFilter) -> Result<Page<Appointment>, StoreError> {
        let state = self.state.read().await;
        let mut matching: Vec<&Appointment> = state
            .appointments
            .values()
            .filter(|a| filter.matches(a))
            .collect();
        matching.sort_by_key(|a| (a.appointment_date, a.id));

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.page_size as usize)
            .cloned()
            .collect();

        Ok(Page {
            items,
            page: filter.page,
            page_size: filter.page_size,
            total,
        })
    }

    async fn find_due_reminders(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        after: Option<(DateTime<Utc>, Uuid)>,
        limit: i64,
    ) -> Result<Vec<Appointment>, StoreError> {
        let state = self.state.read().await;
        let mut due: Vec<Appointment> = state
            .appointments
            .values()
            .filter(|a| {
                a.status == AppointmentStatus::Confirmed
                    && !a.reminder_sent
                    && a.appointment_date >= from
                    && a.appointment_date <= to
                    && after.map_or(true, |key| (a.appointment_date, a.id) > key)
            })
            .cloned()
            .collect();
        due.sort_by_key(|a| (a.appointment_date, a.id));
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn pending_refunds(
        &self,
        claimed_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<RefundRequest>, StoreError> {
        let state = self.state.read().await;
        let mut pending: Vec<RefundRequest> = state
            .refunds
            .values()
            .filter(|r| match r.status {
                RefundStatus::Pending => true,
                RefundStatus::Processing => r.updated_at < claimed_before,
                RefundStatus::Completed => false,
            })
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let writer = Arc::clone(&self.writer).lock_owned().await;
        let staged = self.state.read().await.clone();
        Ok(Box::new(MemoryTransaction {
            writer,
            committed: Arc::clone(&self.state),
            staged,
        }))
    }
}

impl MemoryState {
    fn find_payment_by_reference(&self, reference: &str) -> Option<&Payment> {
        self.payments.values().find(|p| p.provider_reference == reference)
    }
}

/// Holds the writer slot for its whole lifetime and writes to a staged copy
/// that replaces the committed state on commit.
struct MemoryTransaction {
    writer: OwnedMutexGuard<()>,
    committed: Arc<RwLock<MemoryState>>,
    staged: MemoryState,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn lock_schedule(&mut self, id: Uuid) -> Result<Option<ScheduleSlot>, StoreError> {
        Ok(self.staged.schedules.get(&id).cloned())
    }

    async fn lock_appointment(&mut self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.staged.appointments.get(&id).cloned())
    }

    async fn lock_payment(&mut self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        Ok(self.staged.payments.get(&id).cloned())
    }

    async fn lock_payment_by_reference(&mut self, reference: &str) -> Result<Option<Payment>, StoreError> {
        Ok(self.staged.find_payment_by_reference(reference).cloned())
    }

    async fn lock_refund(&mut self, id: Uuid) -> Result<Option<RefundRequest>, StoreError> {
        Ok(self.staged.refunds.get(&id).cloned())
    }

    async fn count_active_on_schedule(
        &mut self,
        schedule_id: Uuid,
        date: NaiveDate,
        exclude: Option<Uuid>,
    ) -> Result<i64, StoreError> {
        let count = self
            .staged
            .appointments
            .values()
            .filter(|a| {
                a.schedule_id == schedule_id
                    && a.status.is_active()
                    && a.appointment_date.date_naive() == date
                    && Some(a.id) != exclude
            })
            .count();
        Ok(count as i64)
    }

    async fn insert_appointment(&mut self, appointment: &Appointment) -> Result<(), StoreError> {
        if self.staged.appointments.contains_key(&appointment.id) {
            return Err(StoreError::Duplicate(format!("appointment {}", appointment.id)));
        }
        self.staged.appointments.insert(appointment.id, appointment.clone());
        Ok(())
    }

    async fn update_appointment(&mut self, appointment: &Appointment) -> Result<(), StoreError> {
        match self.staged.appointments.get_mut(&appointment.id) {
            Some(existing) => {
                *existing = appointment.clone();
                Ok(())
            }
            None => Err(StoreError::Database(format!("appointment {} does not exist", appointment.id))),
        }
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        if self.staged.find_payment_by_reference(&payment.provider_reference).is_some() {
            return Err(StoreError::Duplicate(format!(
                "provider reference {}",
                payment.provider_reference
            )));
        }
        if !self.staged.appointments.contains_key(&payment.appointment_id) {
            return Err(StoreError::Database(format!(
                "payment references missing appointment {}",
                payment.appointment_id
            )));
        }
        self.staged.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        if payment.refund_amount_minor < 0 || payment.refund_amount_minor > payment.amount_minor {
            return Err(StoreError::Database("refund amount out of range".to_string()));
        }
        match self.staged.payments.get_mut(&payment.id) {
            Some(existing) => {
                *existing = payment.clone();
                Ok(())
            }
            None => Err(StoreError::Database(format!("payment {} does not exist", payment.id))),
        }
    }

    async fn insert_reschedule_record(&mut self, record: &RescheduleRecord) -> Result<(), StoreError> {
        self.staged.reschedules.push(record.clone());
        Ok(())
    }

    async fn insert_reschedule_fee(&mut self, fee: &RescheduleFee) -> Result<(), StoreError> {
        if fee.amount_minor <= 0 {
            return Err(StoreError::Database("reschedule fee must be positive".to_string()));
        }
        self.staged.reschedule_fees.push(fee.clone());
        Ok(())
    }

    async fn insert_refund(&mut self, refund: &RefundRequest) -> Result<(), StoreError> {
        self.staged.refunds.insert(refund.id, refund.clone());
        Ok(())
    }

    async fn update_refund(&mut self, refund: &RefundRequest) -> Result<(), StoreError> {
        match self.staged.refunds.get_mut(&refund.id) {
            Some(existing) => {
                *existing = refund.clone();
                Ok(())
            }
            None => Err(StoreError::Database(format!("refund {} does not exist", refund.id))),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction {
            writer,
            committed,
            staged,
        } = *self;
        *committed.write().await = staged;
        drop(writer);
        debug!("Memory transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        debug!("Memory transaction rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    fn refund() -> RefundRequest {
        let now = Utc::now();
        RefundRequest {
            id: Uuid::new_v4(),
            payment_id: Uuid::new_v4(),
            appointment_id: Uuid::new_v4(),
            amount_minor: 500_000,
            reason: "cancelled".to_string(),
            status: RefundStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn reads_do_not_wait_for_open_transactions() {
        let store = MemoryAppointmentStore::new();
        let centre = DiagnosticCentre {
            id: Uuid::new_v4(),
            name: "Ikeja Imaging".to_string(),
            owner_id: Uuid::new_v4(),
            manager_ids: Vec::new(),
            email: None,
            phone: None,
            is_active: true,
        };
        store.add_centre(centre.clone()).await;

        let mut tx = store.begin().await.unwrap();
        tx.insert_refund(&refund()).await.unwrap();

        let read = tokio::time::timeout(Duration::from_millis(100), store.get_centre(centre.id)).await;
        assert!(matches!(read, Ok(Ok(Some(_)))));
        assert!(store.refunds().await.is_empty());

        tx.commit().await.unwrap();
        assert_eq!(store.refunds().await.len(), 1);
    }

    #[tokio::test]
    async fn transactions_run_one_at_a_time() {
        let store = MemoryAppointmentStore::new();
        let tx = store.begin().await.unwrap();

        let second = tokio::time::timeout(Duration::from_millis(50), store.begin()).await;
        assert!(second.is_err());

        tx.rollback().await.unwrap();
        assert!(store.begin().await.is_ok());
    }
}
