//! Market data sync
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Pulls reference market data from three rate-limited providers and upserts
//! it into PostgreSQL:
//!
//! - **HUD FMR**: Fair Market Rents for every metro area and non-metro county
//!   of a state
//! - **Census ACS**: 5-year demographic estimates per Texas county
//! - **BLS LAUS**: monthly labor force and unemployment per Texas county
//!
//! The [`sync`] module holds the orchestrator that fans county work out under
//! a concurrency cap, retries transient failures, stops early on a provider
//! quota, and checkpoints BLS progress so a stopped run can be resumed.

pub mod config;
pub mod db;
pub mod models;
pub mod sources;
pub mod sync;

pub use config::Config;
pub use models::{CensusDemographic, Employment, FairMarketRent, SyncSource};
pub use sync::{SyncError, SyncOptions, SyncOrchestrator, SyncRequest, SyncResult};
