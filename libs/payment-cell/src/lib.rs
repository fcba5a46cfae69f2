// =====================================================================================
// PAYMENT CELL - PAYMENT PROVIDER ADAPTER
// =====================================================================================

pub mod models;
pub mod money;
pub mod services;

pub use models::*;
pub use services::*;
