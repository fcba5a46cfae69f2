// libs/appointment-cell/src/services/notification.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use payment_cell::money::format_major;

use crate::models::{Appointment, DiagnosticCentre, PatientContact};

pub type NotificationReceiver = broadcast::Receiver<String>;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BookingCreated,
    PaymentConfirmed,
    AppointmentCancelled,
    AppointmentRescheduled,
    AppointmentReminder,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub appointment_id: Uuid,
    pub recipient: Option<String>,
    pub subject: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Failed to serialise notification: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// Delivery channel for rendered notifications (email, SMS, push, ...).
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// What a template may reference.
pub struct NotificationContext<'a> {
    pub appointment: &'a Appointment,
    pub patient: Option<&'a PatientContact>,
    pub centre: Option<&'a DiagnosticCentre>,
    pub amount_minor: Option<i64>,
    pub currency: Option<&'a str>,
}

impl<'a> NotificationContext<'a> {
    pub fn new(appointment: &'a Appointment) -> Self {
        Self {
            appointment,
            patient: None,
            centre: None,
            amount_minor: None,
            currency: None,
        }
    }

    pub fn with_patient(mut self, patient: Option<&'a PatientContact>) -> Self {
        self.patient = patient;
        self
    }

    pub fn with_centre(mut self, centre: Option<&'a DiagnosticCentre>) -> Self {
        self.centre = centre;
        self
    }

    pub fn with_amount(mut self, amount_minor: i64, currency: &'a str) -> Self {
        self.amount_minor = Some(amount_minor);
        self.currency = Some(currency);
        self
    }
}

/// Renders the template for `kind`. Every body carries the appointment id so a
/// duplicate delivery can be recognised by the recipient.
pub fn render(kind: NotificationKind, ctx: &NotificationContext<'_>, at: DateTime<Utc>) -> Notification {
    let appointment = ctx.appointment;
    let greeting = ctx
        .patient
        .map(|p| format!("Hello {},", p.display_name()))
        .unwrap_or_else(|| "Hello,".to_string());
    let centre = ctx.centre.map(|c| c.name.as_str()).unwrap_or("the diagnostic centre");
    let when = format!(
        "{} ({})",
        appointment.appointment_date.format("%A %d %B %Y %H:%M UTC"),
        appointment.time_slot
    );
    let amount = match (ctx.amount_minor, ctx.currency) {
        (Some(minor), Some(currency)) => format!(" {} {}", currency, format_major(minor)),
        _ => String::new(),
    };

    let (subject, detail) = match kind {
        NotificationKind::BookingCreated => (
            "Appointment booked".to_string(),
            format!(
                "Your appointment at {} on {} has been booked. Complete payment{} to confirm it.",
                centre, when, amount
            ),
        ),
        NotificationKind::PaymentConfirmed => (
            "Appointment confirmed".to_string(),
            format!("We received your payment{}. Your appointment at {} on {} is confirmed.", amount, centre, when),
        ),
        NotificationKind::AppointmentCancelled => (
            "Appointment cancelled".to_string(),
            format!(
                "Your appointment at {} on {} was cancelled. Reason: {}.{}",
                centre,
                when,
                appointment.cancellation_reason.as_deref().unwrap_or("not given"),
                if amount.is_empty() {
                    String::new()
                } else {
                    format!(" A refund of{} is being processed.", amount)
                }
            ),
        ),
        NotificationKind::AppointmentRescheduled => (
            "Appointment rescheduled".to_string(),
            format!("Your appointment at {} has been moved to {}.", centre, when),
        ),
        NotificationKind::AppointmentReminder => (
            "Appointment reminder".to_string(),
            format!("This is a reminder of your appointment at {} on {}.", centre, when),
        ),
    };

    Notification {
        kind,
        appointment_id: appointment.id,
        recipient: ctx.patient.map(|p| p.email.clone()),
        subject,
        body: format!("{}\n\n{}\n\nAppointment reference: {}", greeting, detail, appointment.id),
        created_at: at,
    }
}

/// Publishes every notification on one broadcast stream. The composition
/// root subscribes a logger; mail or push relays subscribe the same way.
pub struct BroadcastNotificationSender {
    global_sender: broadcast::Sender<String>,
}

impl Default for BroadcastNotificationSender {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastNotificationSender {
    pub fn new() -> Self {
        let (global_sender, _) = broadcast::channel(1000);
        Self { global_sender }
    }

    pub fn subscribe_global(&self) -> NotificationReceiver {
        self.global_sender.subscribe()
    }
}

#[async_trait]
impl NotificationSender for BroadcastNotificationSender {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        let message = serde_json::to_string(notification)?;

        // Having no listeners is normal; the log line is the delivery of record.
        if self.global_sender.send(message).is_err() {
            debug!("No subscribers for appointment {}", notification.appointment_id);
        }

        info!(
            "Notification {:?} for appointment {} to {}",
            notification.kind,
            notification.appointment_id,
            notification.recipient.as_deref().unwrap_or("<unknown>")
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AppointmentStatus;
    use chrono::TimeZone;

    fn appointment() -> Appointment {
        let at = Utc.with_ymd_and_hms(2030, 1, 7, 9, 30, 0).unwrap();
        Appointment {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            diagnostic_centre_id: Uuid::new_v4(),
            schedule_id: Uuid::new_v4(),
            appointment_date: at,
            time_slot: "09:30-10:00".to_string(),
            status: AppointmentStatus::Confirmed,
            payment_id: None,
            preferred_doctor: None,
            notes: None,
            previous_appointment_id: None,
            reschedule_reason: None,
            rescheduled_by: None,
            cancellation_reason: Some("schedule conflict".to_string()),
            cancelled_by: None,
            reminder_sent: false,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn templates_carry_appointment_reference() {
        let appt = appointment();
        let patient = PatientContact {
            id: appt.patient_id,
            email: "ada@example.com".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Obi".to_string(),
            phone: None,
        };
        let ctx = NotificationContext::new(&appt)
            .with_patient(Some(&patient))
            .with_amount(500_000, "NGN");

        let reminder = render(NotificationKind::AppointmentReminder, &ctx, Utc::now());
        assert_eq!(reminder.recipient.as_deref(), Some("ada@example.com"));
        assert!(reminder.body.starts_with("Hello Ada Obi,"));
        assert!(reminder.body.contains(&appt.id.to_string()));

        let cancelled = render(NotificationKind::AppointmentCancelled, &ctx, Utc::now());
        assert!(cancelled.body.contains("schedule conflict"));
        assert!(cancelled.body.contains("NGN 5000.00"));
    }

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let sender = BroadcastNotificationSender::new();
        let appt = appointment();
        let mut logger = sender.subscribe_global();
        let mut relay = sender.subscribe_global();

        let notification = render(NotificationKind::PaymentConfirmed, &NotificationContext::new(&appt), Utc::now());
        sender.send(&notification).await.unwrap();

        assert!(logger.recv().await.unwrap().contains("payment_confirmed"));
        assert!(relay.recv().await.unwrap().contains(&appt.id.to_string()));
    }

    #[tokio::test]
    async fn sending_without_subscribers_succeeds() {
        let sender = BroadcastNotificationSender::new();
        let appt = appointment();
        let notification = render(NotificationKind::BookingCreated, &NotificationContext::new(&appt), Utc::now());
        assert!(sender.send(&notification).await.is_ok());
    }
}
