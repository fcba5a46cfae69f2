pub mod booking;
pub mod lifecycle;
pub mod notification;
pub mod reminder;
pub mod settlement;

pub use booking::{AppointmentBookingService, BookingSettings};
pub use lifecycle::{AppointmentLifecycleRules, AppointmentLifecycleService};
pub use notification::{
    BroadcastNotificationSender, Notification, NotificationError, NotificationKind, NotificationSender,
};
pub use reminder::{ReminderScheduler, TickReport};
