pub mod gateway;
pub mod paystack;
pub mod signature;

pub use gateway::*;
pub use paystack::*;
pub use signature::*;
