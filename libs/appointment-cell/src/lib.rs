pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod store;

pub use handlers::AppointmentState;
pub use models::*;
pub use router::{appointment_routes, payment_routes};
pub use services::*;
pub use store::{AppointmentStore, MemoryAppointmentStore, PgAppointmentStore, StoreError, StoreTransaction};
