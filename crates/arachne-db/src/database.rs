use std::time::Duration;

use arachne_core::AppError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::broker::PgBroker;
use crate::config::DatabaseConfig;

/// Owns the connection pool, runs migrations and vends brokers.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL with the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.url)
            .await
            .map_err(|e| AppError::BrokerError(format!("Failed to connect: {e}")))?;

        Ok(Self { pool })
    }

    /// Create a `Database` from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::BrokerError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// A [`PgBroker`] sharing this pool.
    pub fn broker(&self) -> PgBroker {
        PgBroker::new(self.pool.clone())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
