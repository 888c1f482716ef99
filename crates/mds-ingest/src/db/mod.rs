//! PostgreSQL pool, migrations, and stores

pub mod checkpoints;
pub mod market_data;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use thiserror::Error;

use crate::models::{CensusDemographic, Employment, FairMarketRent};

pub use checkpoints::PgCheckpointStore;
pub use market_data::PgMarketDataStore;

/// Embedded schema migrations
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

/// Failure to write market data
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// The store cannot take any more writes; stops the run
    #[error("Database unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid record: {0}")]
    Invalid(String),
}

impl PersistError {
    /// Whether the whole run should stop rather than just this item
    pub fn is_fatal(&self) -> bool {
        matches!(self, PersistError::Unavailable(_))
    }
}

impl From<sqlx::Error> for PersistError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolClosed => PersistError::Unavailable(err.to_string()),
            other => PersistError::Database(other),
        }
    }
}

/// Idempotent writes for market data. A second write with the same natural
/// key updates the existing row.
#[async_trait]
pub trait MarketDataStore: Send + Sync {
    /// Keyed by `(entity_code, fiscal_year)`
    async fn upsert_fair_market_rent(&self, record: &FairMarketRent) -> Result<(), PersistError>;

    async fn upsert_fair_market_rents(
        &self,
        records: &[FairMarketRent],
    ) -> Result<u64, PersistError>;

    /// Keyed by `(geo_id, survey_year)`
    async fn upsert_census_demographic(
        &self,
        record: &CensusDemographic,
    ) -> Result<(), PersistError>;

    async fn upsert_census_demographics(
        &self,
        records: &[CensusDemographic],
    ) -> Result<u64, PersistError>;

    /// Keyed by `(area_code, year, month)`
    async fn upsert_employment(&self, record: &Employment) -> Result<(), PersistError>;

    async fn upsert_employment_batch(&self, records: &[Employment]) -> Result<u64, PersistError>;
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: Option<u64>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 2,
            connect_timeout_secs: 30,
            idle_timeout_secs: Some(600),
        }
    }
}

pub async fn create_pool(config: &DbConfig) -> Result<PgPool, sqlx::Error> {
    let mut options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs));

    if let Some(idle_timeout) = config.idle_timeout_secs {
        options = options.idle_timeout(Duration::from_secs(idle_timeout));
    }

    let pool = options.connect(&config.url).await?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    MIGRATOR.run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}
