//! Database connection pool module
//!
//! Provides PostgreSQL connection pool configuration and initialization for
//! both the primary (accounts/devices/attestations) database and the
//! write-only samples database (§6: "two databases (main + samples)").

use crate::config::Config;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Creates a PostgreSQL connection pool against the primary database.
///
/// # Pool Configuration
/// - `max_connections`: Maximum number of connections (default: 10)
/// - `min_connections`: Minimum connections to keep warm (default: 2)
/// - `acquire_timeout`: Time to wait for a connection (default: 30s)
/// - `idle_timeout`: Time before idle connections are closed (default: 10min)
pub async fn create_pool(config: &Config) -> Result<PgPool, sqlx::Error> {
    pool_options(config).connect(&config.database_url).await
}

/// Creates a PostgreSQL connection pool against the samples database.
pub async fn create_samples_pool(config: &Config) -> Result<PgPool, sqlx::Error> {
    pool_options(config)
        .connect(&config.samples_database_url)
        .await
}

fn pool_options(config: &Config) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .min_connections(config.db_min_connections)
        .acquire_timeout(Duration::from_secs(config.db_acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.db_idle_timeout_secs))
}

/// Runs pending migrations against the primary database.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Runs pending migrations against the samples database.
pub async fn run_samples_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations_samples").run(pool).await
}
