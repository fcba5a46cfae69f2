// libs/appointment-cell/src/services/lifecycle.rs
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{AcceptanceStatus, AppointmentError, AppointmentStatus, ScheduleSlot};

/// Rules that decide whether an appointment may move or be placed on a slot.
/// Holds no state; every check is a pure function of its inputs.
#[derive(Debug, Clone, Default)]
pub struct AppointmentLifecycleService {
    rules: AppointmentLifecycleRules,
}

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rules(&self) -> &AppointmentLifecycleRules {
        &self.rules
    }

    /// Validate that a status transition is allowed
    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        if !current_status.can_transition_to(&new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(AppointmentError::IllegalTransition {
                from: current_status,
                to: new_status,
            });
        }
        Ok(())
    }

    /// Staff may open an appointment up to `max_early_start_minutes` before it is due.
    pub fn can_start_appointment(
        &self,
        current_status: AppointmentStatus,
        scheduled_start_time: DateTime<Utc>,
        current_time: DateTime<Utc>,
    ) -> bool {
        current_status == AppointmentStatus::Confirmed
            && current_time >= scheduled_start_time - Duration::minutes(self.rules.max_early_start_minutes)
    }

    /// Checks that `date` may be booked on `schedule` for `centre_id`.
    pub fn validate_slot(
        &self,
        schedule: &ScheduleSlot,
        centre_id: Uuid,
        date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), AppointmentError> {
        debug!("Validating schedule {} for {}", schedule.id, date);

        if schedule.diagnostic_centre_id != centre_id {
            return Err(AppointmentError::ScheduleNotAccepted(
                "Schedule belongs to a different diagnostic centre".to_string(),
            ));
        }

        if schedule.acceptance_status != AcceptanceStatus::Accepted {
            return Err(AppointmentError::ScheduleNotAccepted(format!(
                "Schedule is {}",
                schedule.acceptance_status.as_str()
            )));
        }

        if date <= now {
            return Err(AppointmentError::InvalidDate(
                "Appointment must be scheduled for a future time".to_string(),
            ));
        }

        if !self.falls_within_window(schedule, date) {
            return Err(AppointmentError::InvalidDate(format!(
                "Requested time is outside the schedule window {}-{} on day {}",
                schedule.start_time.format("%H:%M"),
                schedule.end_time.format("%H:%M"),
                schedule.day_of_week
            )));
        }

        Ok(())
    }

    /// The slot starting at `date` must fit entirely inside the window.
    pub fn falls_within_window(&self, schedule: &ScheduleSlot, date: DateTime<Utc>) -> bool {
        let weekday = date.weekday().num_days_from_sunday() as i16;
        if weekday != schedule.day_of_week {
            return false;
        }

        let start = i64::from(schedule.start_time.num_seconds_from_midnight());
        let end = i64::from(schedule.end_time.num_seconds_from_midnight());
        let at = i64::from(date.time().num_seconds_from_midnight());
        let duration = i64::from(schedule.slot_duration_minutes.max(1)) * 60;

        at >= start && at + duration <= end
    }

    /// Appointments starting within the lead time are due a reminder.
    pub fn reminder_window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now, now + Duration::hours(self.rules.reminder_lead_hours))
    }
}

/// Business rules for appointment lifecycle management
#[derive(Debug, Clone)]
pub struct AppointmentLifecycleRules {
    pub max_early_start_minutes: i64,
    pub reminder_lead_hours: i64,
}

impl Default for AppointmentLifecycleRules {
    fn default() -> Self {
        Self {
            max_early_start_minutes: 15,
            reminder_lead_hours: 24,
        }
    }
}
