pub mod pool;

pub use pool::{connect, run_migrations, DatabaseError};
pub use sqlx::PgPool;
