//! Durable progress records for resumable syncs
//!
//! A checkpoint row is created when a session starts, advanced after each
//! persisted county, and finalized once with a terminal status. Statuses move
//! only along the edges allowed by [`CheckpointStatus::can_transition_to`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use super::work_items::{resume_index, WorkItem};
use super::SyncError;
use crate::models::SyncSource;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("No checkpoint found for session '{0}'")]
    NotFound(String),

    #[error("A checkpoint already exists for session '{0}'")]
    AlreadyExists(String),

    #[error("Session '{0}' has no in-progress checkpoint to update")]
    NoActiveCheckpoint(String),

    #[error("Illegal checkpoint transition {from} -> {to}")]
    IllegalTransition {
        from: CheckpointStatus,
        to: CheckpointStatus,
    },

    #[error("Record delta must not be negative, got {0}")]
    InvalidDelta(i64),

    #[error("Corrupt checkpoint row: {0}")]
    Corrupt(String),
}

/// Lifecycle of a sync session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    InProgress,
    Completed,
    RateLimited,
    Failed,
}

impl CheckpointStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckpointStatus::InProgress => "in_progress",
            CheckpointStatus::Completed => "completed",
            CheckpointStatus::RateLimited => "rate_limited",
            CheckpointStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        self != CheckpointStatus::InProgress
    }

    /// `in_progress` may end in any terminal status. `rate_limited` and
    /// `failed` may go back to `in_progress` when resumed. `completed` is final.
    pub fn can_transition_to(self, next: CheckpointStatus) -> bool {
        use CheckpointStatus::*;
        matches!(
            (self, next),
            (InProgress, Completed | RateLimited | Failed) | (RateLimited | Failed, InProgress)
        )
    }

    pub fn check_transition(self, next: CheckpointStatus) -> Result<(), CheckpointError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(CheckpointError::IllegalTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl std::fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CheckpointStatus {
    type Err = CheckpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(CheckpointStatus::InProgress),
            "completed" => Ok(CheckpointStatus::Completed),
            "rate_limited" => Ok(CheckpointStatus::RateLimited),
            "failed" => Ok(CheckpointStatus::Failed),
            other => Err(CheckpointError::Corrupt(format!("unknown status '{}'", other))),
        }
    }
}

/// One row of `sync_checkpoints`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub id: String,
    pub session_id: String,
    pub source: SyncSource,
    pub work_list_version: String,
    pub last_completed_entity: Option<String>,
    pub total_records_synced: i64,
    pub status: CheckpointStatus,
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl SyncCheckpoint {
    pub fn new(session_id: &str, source: SyncSource, work_list_version: &str) -> Self {
        let now = Utc::now();
        Self {
            id: format!("chk_{}", uuid::Uuid::new_v4()),
            session_id: session_id.to_string(),
            source,
            work_list_version: work_list_version.to_string(),
            last_completed_entity: None,
            total_records_synced: 0,
            status: CheckpointStatus::InProgress,
            started_at: now,
            last_updated_at: now,
        }
    }
}

/// Storage for checkpoints
///
/// `advance` and `finalize` only touch rows that are `in_progress`, so a
/// finished session cannot be rewritten.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn create(
        &self,
        session_id: &str,
        source: SyncSource,
        work_list_version: &str,
    ) -> Result<SyncCheckpoint, CheckpointError>;

    /// Record `entity_key` as the last completed item and add `records_delta`
    /// to the running total
    async fn advance(
        &self,
        session_id: &str,
        entity_key: &str,
        records_delta: i64,
    ) -> Result<(), CheckpointError>;

    /// Move an in-progress checkpoint to a terminal status
    async fn finalize(
        &self,
        session_id: &str,
        status: CheckpointStatus,
    ) -> Result<(), CheckpointError>;

    /// Move a `rate_limited` or `failed` checkpoint back to `in_progress`
    async fn reopen(&self, session_id: &str) -> Result<SyncCheckpoint, CheckpointError>;

    async fn load_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<SyncCheckpoint>, CheckpointError>;

    /// Most recently started checkpoint for `source`
    async fn load_latest_for_source(
        &self,
        source: SyncSource,
    ) -> Result<Option<SyncCheckpoint>, CheckpointError>;
}

/// Where a resumed session picks up
#[derive(Debug, Clone)]
pub struct ResumePoint {
    pub checkpoint: SyncCheckpoint,
    /// First item index to dispatch
    pub start_index: usize,
}

/// Checkpoint operations as the orchestrator uses them.
///
/// Starting and resuming are strict. Progress writes during a run are best
/// effort: a failed write is logged and the run carries on.
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store }
    }

    pub async fn begin(
        &self,
        session_id: &str,
        source: SyncSource,
        work_list_version: &str,
    ) -> Result<SyncCheckpoint, CheckpointError> {
        let checkpoint = self.store.create(session_id, source, work_list_version).await?;
        info!(session_id, source = %source, "Created sync checkpoint");
        Ok(checkpoint)
    }

    /// Load `session_id` and work out where to continue in `items` without
    /// writing anything.
    ///
    /// A checkpoint whose list version or last key does not match `items` is
    /// an error rather than a silent restart.
    pub async fn plan_resume(
        &self,
        session_id: &str,
        source: SyncSource,
        items: &[WorkItem],
        work_list_version: &str,
    ) -> Result<ResumePoint, SyncError> {
        let checkpoint = self
            .store
            .load_by_session(session_id)
            .await?
            .ok_or_else(|| CheckpointError::NotFound(session_id.to_string()))?;

        if checkpoint.source != source {
            return Err(SyncError::SourceMismatch {
                session_id: session_id.to_string(),
                expected: source,
                actual: checkpoint.source,
            });
        }

        if checkpoint.status == CheckpointStatus::Completed {
            return Err(SyncError::CheckpointNotResumable {
                session_id: session_id.to_string(),
                status: checkpoint.status,
            });
        }

        if checkpoint.work_list_version != work_list_version {
            return Err(SyncError::UnresolvableCheckpoint {
                session_id: session_id.to_string(),
                reason: format!(
                    "work list version '{}' does not match current '{}'",
                    checkpoint.work_list_version, work_list_version
                ),
            });
        }

        let last = checkpoint.last_completed_entity.as_deref();
        let start_index =
            resume_index(items, last).ok_or_else(|| SyncError::UnresolvableCheckpoint {
                session_id: session_id.to_string(),
                reason: format!("last completed key '{}' is not in the work list", last.unwrap_or_default()),
            })?;

        Ok(ResumePoint {
            checkpoint,
            start_index,
        })
    }

    /// [`plan_resume`](Self::plan_resume), then reopen a `rate_limited` or
    /// `failed` checkpoint so the run can advance it again
    pub async fn resume(
        &self,
        session_id: &str,
        source: SyncSource,
        items: &[WorkItem],
        work_list_version: &str,
    ) -> Result<ResumePoint, SyncError> {
        let mut point = self.plan_resume(session_id, source, items, work_list_version).await?;

        if point.checkpoint.status.is_terminal() {
            point.checkpoint = self.store.reopen(session_id).await?;
        }

        info!(
            session_id,
            last_completed = ?point.checkpoint.last_completed_entity,
            start_index = point.start_index,
            total = items.len(),
            records_so_far = point.checkpoint.total_records_synced,
            "Resuming sync from checkpoint"
        );

        Ok(point)
    }

    /// Returns whether the write landed
    pub async fn advance(&self, session_id: &str, entity_key: &str, records_delta: i64) -> bool {
        match self.store.advance(session_id, entity_key, records_delta).await {
            Ok(()) => true,
            Err(e) => {
                warn!(session_id, entity = entity_key, error = %e, "Failed to update checkpoint");
                false
            },
        }
    }

    /// Returns whether the write landed
    pub async fn finalize(&self, session_id: &str, status: CheckpointStatus) -> bool {
        match self.store.finalize(session_id, status).await {
            Ok(()) => {
                info!(session_id, status = %status, "Finalized sync checkpoint");
                true
            },
            Err(e) => {
                warn!(session_id, status = %status, error = %e, "Failed to finalize checkpoint");
                false
            },
        }
    }

    pub async fn load(&self, session_id: &str) -> Result<Option<SyncCheckpoint>, CheckpointError> {
        self.store.load_by_session(session_id).await
    }

    pub async fn latest(
        &self,
        source: SyncSource,
    ) -> Result<Option<SyncCheckpoint>, CheckpointError> {
        self.store.load_latest_for_source(source).await
    }
}
