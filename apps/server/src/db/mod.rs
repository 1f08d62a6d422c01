//! Database access layer
//!
//! Repository structs own a `PgPool` clone and speak raw SQL with bind
//! parameters. Transient failures surface as `Error::Database`; repositories
//! never retry; the caller decides.

pub mod audit;
pub mod mappings;
pub mod source_codes;
pub mod target_codes;

pub use audit::AuditLogRepository;
pub use mappings::{ListFilters, MappingRepository};
pub use source_codes::SourceCodeRepository;
pub use target_codes::TargetCodeRepository;

use crate::config::DatabaseConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

pub async fn create_pool(config: &DatabaseConfig) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .min_connections(config.pool_min_size)
        .max_connections(config.pool_max_size)
        .acquire_timeout(Duration::from_secs(config.pool_timeout_seconds))
        .connect(&config.url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
