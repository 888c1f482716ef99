//! Sync orchestration
//!
//! Turns a list of per-county (or per-record) fetches into a bounded,
//! retrying, optionally checkpointed batch job. See [`SyncOrchestrator`].

pub mod checkpoint;
pub mod memory;
pub mod orchestrator;
pub mod result;
pub mod retry;
pub mod runner;
pub mod tracker;
pub mod work_items;

use std::time::Duration;
use thiserror::Error;

use crate::db::PersistError;
use crate::models::SyncSource;
use checkpoint::{CheckpointError, CheckpointStatus};

pub use checkpoint::{CheckpointManager, CheckpointStore, SyncCheckpoint};
pub use memory::InMemoryCheckpointStore;
pub use orchestrator::{Sources, SyncOrchestrator};
pub use result::{SyncOutcome, SyncResult};
pub use retry::RetryPolicy;
pub use work_items::{texas_counties, WorkItem, COUNTY_LIST_VERSION};

/// Hard failures of a sync run. Item-level failures are reported in
/// [`SyncResult::errors`] instead.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("{provider} fetch failed: {message}")]
    UpstreamFetch {
        provider: SyncSource,
        message: String,
    },

    #[error("{provider} rate limit reached: {message}")]
    RateLimited {
        provider: SyncSource,
        message: String,
    },

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Cannot resume session '{session_id}': {reason}")]
    UnresolvableCheckpoint { session_id: String, reason: String },

    #[error("Session '{session_id}' is {status} and cannot be resumed")]
    CheckpointNotResumable {
        session_id: String,
        status: CheckpointStatus,
    },

    #[error("Session '{session_id}' belongs to {actual}, not {expected}")]
    SourceMismatch {
        session_id: String,
        expected: SyncSource,
        actual: SyncSource,
    },

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistError),

    #[error("Configuration error: {0}")]
    Config(#[from] mds_common::MdsError),
}

/// Run-wide knobs shared by every source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Items in flight at once; 0 is treated as 1
    pub max_concurrent: usize,
    /// Retries per BLS county after the first attempt
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    /// Fetch and count, but write nothing
    pub dry_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            max_retries: retry::DEFAULT_MAX_RETRIES,
            retry_base_delay: retry::DEFAULT_BASE_DELAY,
            dry_run: false,
        }
    }
}

/// Per-source parameters. `None` picks the source's default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRequest {
    /// HUD state code, `TX` by default
    pub state: Option<String>,
    /// ACS survey year, last year by default
    pub census_year: Option<i32>,
    pub bls_start_year: Option<i32>,
    pub bls_end_year: Option<i32>,
    /// BLS session to continue
    pub resume: Option<String>,
}

/// A multi-source run that stopped at a hard failure, with the results of
/// the sources that finished before it
#[derive(Error, Debug)]
#[error("{failed} sync failed: {error}")]
pub struct SyncAllError {
    pub failed: SyncSource,
    pub completed: Vec<SyncResult>,
    #[source]
    pub error: SyncError,
}
