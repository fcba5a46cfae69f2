use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, warn};

use shared_config::AppConfig;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database is not configured")]
    NotConfigured,

    #[error("Failed to connect to database: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Builds the shared connection pool. Acquisition waits at most the request
/// timeout so a saturated pool surfaces as an error instead of hanging.
pub async fn connect(config: &AppConfig) -> Result<PgPool, DatabaseError> {
    if !config.uses_database() {
        return Err(DatabaseError::NotConfigured);
    }

    let pool_size = config.db_pool_size.max(1);
    let pool = PgPoolOptions::new()
        .max_connections(pool_size)
        .acquire_timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
        .connect(&config.database_url)
        .await
        .map_err(|e| {
            warn!("Database connection failed: {}", e);
            DatabaseError::Connection(e)
        })?;

    info!("Database pool ready ({} connections)", pool_size);
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), DatabaseError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_without_url_is_not_configured() {
        let config = AppConfig::default();
        let result = connect(&config).await;
        assert!(matches!(result, Err(DatabaseError::NotConfigured)));
    }
}
