// libs/appointment-cell/src/store/postgres.rs
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

use payment_cell::{Payment, PaymentMethod, PaymentProvider, PaymentStatus};

use crate::models::{
    AcceptanceStatus, Appointment, AppointmentFilter, AppointmentStatus, DiagnosticCentre, Page,
    PatientContact, PreferredDoctor, RefundRequest, RefundStatus, RescheduleFee, RescheduleRecord,
    ScheduleSlot,
};
use crate::store::{AppointmentStore, StoreError, StoreTransaction};

const APPOINTMENT_COLUMNS: &str = "id, patient_id, diagnostic_centre_id, schedule_id, appointment_date, \
     time_slot, status, payment_id, preferred_doctor, notes, previous_appointment_id, reschedule_reason, \
     rescheduled_by, cancellation_reason, cancelled_by, reminder_sent, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, appointment_id, patient_id, diagnostic_centre_id, amount_minor, currency, \
     payment_method, provider, provider_reference, status, refund_amount_minor, refund_reason, \
     authorization_url, access_code, metadata, paid_at, created_at, updated_at";

const SCHEDULE_COLUMNS: &str = "id, diagnostic_centre_id, day_of_week, start_time, end_time, \
     slot_duration_minutes, break_minutes, max_concurrent_appointments, acceptance_status";

const REFUND_COLUMNS: &str = "id, payment_id, appointment_id, amount_minor, reason, status, attempts, \
     last_error, created_at, updated_at";

const ACTIVE_STATUSES: &str = "('PENDING', 'CONFIRMED', 'IN_PROGRESS')";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return StoreError::Duplicate(
                    db_err.constraint().unwrap_or("unique constraint").to_string(),
                );
            }
        }
        StoreError::Database(err.to_string())
    }
}

/// Postgres-backed store. Mutations run in a database transaction and use
/// `SELECT ... FOR UPDATE` for every row they intend to change.
#[derive(Clone)]
pub struct PgAppointmentStore {
    pool: PgPool,
}

impl PgAppointmentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AppointmentStore for PgAppointmentStore {
    async fn get_centre(&self, id: Uuid) -> Result<Option<DiagnosticCentre>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, owner_id, email, phone, is_active FROM diagnostic_centres WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let manager_ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT user_id FROM diagnostic_centre_managers WHERE diagnostic_centre_id = $1",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(DiagnosticCentre {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            owner_id: row.try_get("owner_id")?,
            manager_ids,
            email: row.try_get("email")?,
            phone: row.try_get("phone")?,
            is_active: row.try_get("is_active")?,
        }))
    }

    async fn get_patient_contact(&self, id: Uuid) -> Result<Option<PatientContact>, StoreError> {
        let row = sqlx::query("SELECT id, email, first_name, last_name, phone FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| -> Result<PatientContact, StoreError> {
            Ok(PatientContact {
                id: row.try_get("id")?,
                email: row.try_get("email")?,
                first_name: row.try_get("first_name")?,
                last_name: row.try_get("last_name")?,
                phone: row.try_get("phone")?,
            })
        })
        .transpose()
    }

    async fn get_schedule(&self, id: Uuid) -> Result<Option<ScheduleSlot>, StoreError> {
        let sql = format!("SELECT {} FROM diagnostic_centre_schedules WHERE id = $1", SCHEDULE_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(schedule_from_row).transpose()
    }

    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        let sql = format!("SELECT {} FROM appointments WHERE id = $1", APPOINTMENT_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(appointment_from_row).transpose()
    }

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        let sql = format!("SELECT {} FROM payments WHERE id = $1", PAYMENT_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn get_payment_by_reference(&self, reference: &str) -> Result<Option<Payment>, StoreError> {
        let sql = format!("SELECT {} FROM payments WHERE provider_reference = $1", PAYMENT_COLUMNS);
        let row = sqlx::query(&sql).bind(reference).fetch_optional(&self.pool).await?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn list_appointments(&self, filter: &AppointmentFilter) -> Result<Page<Appointment>, StoreError> {
        let statuses: Vec<String> = filter.statuses.iter().map(|s| s.as_str().to_string()).collect();
        let predicate = "($1::uuid IS NULL OR diagnostic_centre_id = $1) \
             AND ($2::uuid IS NULL OR patient_id = $2) \
             AND (cardinality($3::text[]) = 0 OR status = ANY($3)) \
             AND appointment_date >= $4 AND appointment_date <= $5";

        let count_sql = format!("SELECT COUNT(*) FROM appointments WHERE {}", predicate);
        let total: i64 = sqlx::query_scalar(&count_sql)
            .bind(filter.diagnostic_centre_id)
            .bind(filter.patient_id)
            .bind(&statuses)
            .bind(filter.from)
            .bind(filter.to)
            .fetch_one(&self.pool)
            .await?;

        let page_sql = format!(
            "SELECT {} FROM appointments WHERE {} ORDER BY appointment_date ASC, id ASC LIMIT $6 OFFSET $7",
            APPOINTMENT_COLUMNS, predicate
        );
        let rows = sqlx::query(&page_sql)
            .bind(filter.diagnostic_centre_id)
            .bind(filter.patient_id)
            .bind(&statuses)
            .bind(filter.from)
            .bind(filter.to)
            .bind(i64::from(filter.page_size))
            .bind(filter.offset() as i64)
            .fetch_all(&self.pool)
            .await?;

        let items = rows.iter().map(appointment_from_row).collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items,
            page: filter.page,
            page_size: filter.page_size,
            total: total.max(0) as u64,
        })
    }

    async fn find_due_reminders(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        after: Option<(DateTime<Utc>, Uuid)>,
        limit: i64,
    ) -> Result<Vec<Appointment>, StoreError> {
        let sql = format!(
            "SELECT {} FROM appointments \
             WHERE status = 'CONFIRMED' AND reminder_sent = FALSE \
             AND appointment_date >= $1 AND appointment_date <= $2 \
             AND ($3::timestamptz IS NULL OR (appointment_date, id) > ($3, $4)) \
             ORDER BY appointment_date ASC, id ASC LIMIT $5",
            APPOINTMENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(from)
            .bind(to)
            .bind(after.map(|(date, _)| date))
            .bind(after.map(|(_, id)| id))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(appointment_from_row).collect()
    }

    async fn pending_refunds(
        &self,
        claimed_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<RefundRequest>, StoreError> {
        let sql = format!(
            "SELECT {} FROM refund_requests \
             WHERE status = 'PENDING' OR (status = 'PROCESSING' AND updated_at < $1) \
             ORDER BY created_at ASC LIMIT $2",
            REFUND_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(claimed_before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(refund_from_row).collect()
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTransaction { tx }))
    }
}

struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn lock_schedule(&mut self, id: Uuid) -> Result<Option<ScheduleSlot>, StoreError> {
        let sql = format!(
            "SELECT {} FROM diagnostic_centre_schedules WHERE id = $1 FOR UPDATE",
            SCHEDULE_COLUMNS
        );
        let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *self.tx).await?;
        row.as_ref().map(schedule_from_row).transpose()
    }

    async fn lock_appointment(&mut self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        let sql = format!("SELECT {} FROM appointments WHERE id = $1 FOR UPDATE", APPOINTMENT_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *self.tx).await?;
        row.as_ref().map(appointment_from_row).transpose()
    }

    async fn lock_payment(&mut self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        let sql = format!("SELECT {} FROM payments WHERE id = $1 FOR UPDATE", PAYMENT_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *self.tx).await?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn lock_payment_by_reference(&mut self, reference: &str) -> Result<Option<Payment>, StoreError> {
        let sql = format!(
            "SELECT {} FROM payments WHERE provider_reference = $1 FOR UPDATE",
            PAYMENT_COLUMNS
        );
        let row = sqlx::query(&sql).bind(reference).fetch_optional(&mut *self.tx).await?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn lock_refund(&mut self, id: Uuid) -> Result<Option<RefundRequest>, StoreError> {
        let sql = format!("SELECT {} FROM refund_requests WHERE id = $1 FOR UPDATE", REFUND_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *self.tx).await?;
        row.as_ref().map(refund_from_row).transpose()
    }

    async fn count_active_on_schedule(
        &mut self,
        schedule_id: Uuid,
        date: NaiveDate,
        exclude: Option<Uuid>,
    ) -> Result<i64, StoreError> {
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| StoreError::Corrupt(format!("invalid date {}", date)))?;
        let day_start = Utc.from_utc_datetime(&midnight);
        let day_end = day_start + Duration::days(1);

        let sql = format!(
            "SELECT COUNT(*) FROM appointments \
             WHERE schedule_id = $1 AND status IN {} \
             AND appointment_date >= $2 AND appointment_date < $3 \
             AND ($4::uuid IS NULL OR id <> $4)",
            ACTIVE_STATUSES
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(schedule_id)
            .bind(day_start)
            .bind(day_end)
            .bind(exclude)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count)
    }

    async fn insert_appointment(&mut self, a: &Appointment) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO appointments ({}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
            APPOINTMENT_COLUMNS
        );
        sqlx::query(&sql)
            .bind(a.id)
            .bind(a.patient_id)
            .bind(a.diagnostic_centre_id)
            .bind(a.schedule_id)
            .bind(a.appointment_date)
            .bind(&a.time_slot)
            .bind(a.status.as_str())
            .bind(a.payment_id)
            .bind(a.preferred_doctor.map(|d| d.as_str()))
            .bind(&a.notes)
            .bind(a.previous_appointment_id)
            .bind(&a.reschedule_reason)
            .bind(a.rescheduled_by)
            .bind(&a.cancellation_reason)
            .bind(a.cancelled_by)
            .bind(a.reminder_sent)
            .bind(a.created_at)
            .bind(a.updated_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn update_appointment(&mut self, a: &Appointment) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE appointments SET schedule_id = $2, appointment_date = $3, time_slot = $4, status = $5, \
             payment_id = $6, notes = $7, reschedule_reason = $8, rescheduled_by = $9, \
             cancellation_reason = $10, cancelled_by = $11, reminder_sent = $12, updated_at = $13 \
             WHERE id = $1",
        )
        .bind(a.id)
        .bind(a.schedule_id)
        .bind(a.appointment_date)
        .bind(&a.time_slot)
        .bind(a.status.as_str())
        .bind(a.payment_id)
        .bind(&a.notes)
        .bind(&a.reschedule_reason)
        .bind(a.rescheduled_by)
        .bind(&a.cancellation_reason)
        .bind(a.cancelled_by)
        .bind(a.reminder_sent)
        .bind(a.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Database(format!("appointment {} does not exist", a.id)));
        }
        Ok(())
    }

    async fn insert_payment(&mut self, p: &Payment) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO payments ({}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
            PAYMENT_COLUMNS
        );
        sqlx::query(&sql)
            .bind(p.id)
            .bind(p.appointment_id)
            .bind(p.patient_id)
            .bind(p.diagnostic_centre_id)
            .bind(p.amount_minor)
            .bind(&p.currency)
            .bind(p.payment_method.as_str())
            .bind(p.provider.as_str())
            .bind(&p.provider_reference)
            .bind(p.status.as_str())
            .bind(p.refund_amount_minor)
            .bind(&p.refund_reason)
            .bind(&p.authorization_url)
            .bind(&p.access_code)
            .bind(&p.metadata)
            .bind(p.paid_at)
            .bind(p.created_at)
            .bind(p.updated_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn update_payment(&mut self, p: &Payment) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE payments SET appointment_id = $2, status = $3, refund_amount_minor = $4, \
             refund_reason = $5, authorization_url = $6, access_code = $7, metadata = $8, \
             paid_at = $9, updated_at = $10 WHERE id = $1",
        )
        .bind(p.id)
        .bind(p.appointment_id)
        .bind(p.status.as_str())
        .bind(p.refund_amount_minor)
        .bind(&p.refund_reason)
        .bind(&p.authorization_url)
        .bind(&p.access_code)
        .bind(&p.metadata)
        .bind(p.paid_at)
        .bind(p.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Database(format!("payment {} does not exist", p.id)));
        }
        Ok(())
    }

    async fn insert_reschedule_record(&mut self, r: &RescheduleRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO appointment_reschedules \
             (id, previous_appointment_id, new_appointment_id, reason, actor_id, fee_minor, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(r.id)
        .bind(r.previous_appointment_id)
        .bind(r.new_appointment_id)
        .bind(&r.reason)
        .bind(r.actor_id)
        .bind(r.fee_minor)
        .bind(r.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_reschedule_fee(&mut self, fee: &RescheduleFee) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO reschedule_fees (id, appointment_id, amount_minor, currency, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(fee.id)
        .bind(fee.appointment_id)
        .bind(fee.amount_minor)
        .bind(&fee.currency)
        .bind(fee.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_refund(&mut self, r: &RefundRequest) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO refund_requests ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            REFUND_COLUMNS
        );
        sqlx::query(&sql)
            .bind(r.id)
            .bind(r.payment_id)
            .bind(r.appointment_id)
            .bind(r.amount_minor)
            .bind(&r.reason)
            .bind(r.status.as_str())
            .bind(r.attempts)
            .bind(&r.last_error)
            .bind(r.created_at)
            .bind(r.updated_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn update_refund(&mut self, r: &RefundRequest) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE refund_requests SET status = $2, attempts = $3, last_error = $4, updated_at = $5 \
             WHERE id = $1",
        )
        .bind(r.id)
        .bind(r.status.as_str())
        .bind(r.attempts)
        .bind(&r.last_error)
        .bind(r.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        debug!("Transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        if let Err(e) = self.tx.rollback().await {
            warn!("Rollback failed: {}", e);
            return Err(e.into());
        }
        Ok(())
    }
}

// ==============================================================================
// ROW MAPPING
// ==============================================================================

fn parse_column<T>(raw: &str, column: &str, parse: impl Fn(&str) -> Option<T>) -> Result<T, StoreError> {
    parse(raw).ok_or_else(|| StoreError::Corrupt(format!("unexpected {} value {:?}", column, raw)))
}

fn appointment_from_row(row: &PgRow) -> Result<Appointment, StoreError> {
    let status: String = row.try_get("status")?;
    let preferred_doctor: Option<String> = row.try_get("preferred_doctor")?;

    Ok(Appointment {
        id: row.try_get("id")?,
        patient_id: row.try_get("patient_id")?,
        diagnostic_centre_id: row.try_get("diagnostic_centre_id")?,
        schedule_id: row.try_get("schedule_id")?,
        appointment_date: row.try_get("appointment_date")?,
        time_slot: row.try_get("time_slot")?,
        status: parse_column(&status, "status", AppointmentStatus::parse)?,
        payment_id: row.try_get("payment_id")?,
        preferred_doctor: preferred_doctor.as_deref().and_then(PreferredDoctor::parse),
        notes: row.try_get("notes")?,
        previous_appointment_id: row.try_get("previous_appointment_id")?,
        reschedule_reason: row.try_get("reschedule_reason")?,
        rescheduled_by: row.try_get("rescheduled_by")?,
        cancellation_reason: row.try_get("cancellation_reason")?,
        cancelled_by: row.try_get("cancelled_by")?,
        reminder_sent: row.try_get("reminder_sent")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn payment_from_row(row: &PgRow) -> Result<Payment, StoreError> {
    let method: String = row.try_get("payment_method")?;
    let provider: String = row.try_get("provider")?;
    let status: String = row.try_get("status")?;
    let currency: String = row.try_get("currency")?;

    Ok(Payment {
        id: row.try_get("id")?,
        appointment_id: row.try_get("appointment_id")?,
        patient_id: row.try_get("patient_id")?,
        diagnostic_centre_id: row.try_get("diagnostic_centre_id")?,
        amount_minor: row.try_get("amount_minor")?,
        currency: currency.trim().to_string(),
        payment_method: parse_column(&method, "payment_method", PaymentMethod::parse)?,
        provider: parse_column(&provider, "provider", PaymentProvider::parse)?,
        provider_reference: row.try_get("provider_reference")?,
        status: parse_column(&status, "payment status", PaymentStatus::parse)?,
        refund_amount_minor: row.try_get("refund_amount_minor")?,
        refund_reason: row.try_get("refund_reason")?,
        authorization_url: row.try_get("authorization_url")?,
        access_code: row.try_get("access_code")?,
        metadata: row.try_get("metadata")?,
        paid_at: row.try_get("paid_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn schedule_from_row(row: &PgRow) -> Result<ScheduleSlot, StoreError> {
    let acceptance: String = row.try_get("acceptance_status")?;

    Ok(ScheduleSlot {
        id: row.try_get("id")?,
        diagnostic_centre_id: row.try_get("diagnostic_centre_id")?,
        day_of_week: row.try_get("day_of_week")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        slot_duration_minutes: row.try_get("slot_duration_minutes")?,
        break_minutes: row.try_get("break_minutes")?,
        max_concurrent_appointments: row.try_get("max_concurrent_appointments")?,
        acceptance_status: parse_column(&acceptance, "acceptance_status", AcceptanceStatus::parse)?,
    })
}

fn refund_from_row(row: &PgRow) -> Result<RefundRequest, StoreError> {
    let status: String = row.try_get("status")?;

    Ok(RefundRequest {
        id: row.try_get("id")?,
        payment_id: row.try_get("payment_id")?,
        appointment_id: row.try_get("appointment_id")?,
        amount_minor: row.try_get("amount_minor")?,
        reason: row.try_get("reason")?,
        status: parse_column(&status, "refund status", RefundStatus::parse)?,
        attempts: row.try_get("attempts")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
