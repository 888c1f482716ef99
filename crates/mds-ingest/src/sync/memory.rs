//! In-process checkpoint store
//!
//! Same rules as the Postgres store, held in a map. Used by tests and by
//! callers that embed the orchestrator without a database.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::checkpoint::{CheckpointError, CheckpointStatus, CheckpointStore, SyncCheckpoint};
use crate::models::SyncSource;

#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    rows: Mutex<HashMap<String, SyncCheckpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> MutexGuard<'_, HashMap<String, SyncCheckpoint>> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of every stored checkpoint
    pub fn all(&self) -> Vec<SyncCheckpoint> {
        self.rows().values().cloned().collect()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn create(
        &self,
        session_id: &str,
        source: SyncSource,
        work_list_version: &str,
    ) -> Result<SyncCheckpoint, CheckpointError> {
        let mut rows = self.rows();
        if rows.contains_key(session_id) {
            return Err(CheckpointError::AlreadyExists(session_id.to_string()));
        }
        let checkpoint = SyncCheckpoint::new(session_id, source, work_list_version);
        rows.insert(session_id.to_string(), checkpoint.clone());
        Ok(checkpoint)
    }

    async fn advance(
        &self,
        session_id: &str,
        entity_key: &str,
        records_delta: i64,
    ) -> Result<(), CheckpointError> {
        if records_delta < 0 {
            return Err(CheckpointError::InvalidDelta(records_delta));
        }
        let mut rows = self.rows();
        let row = rows
            .get_mut(session_id)
            .filter(|row| row.status == CheckpointStatus::InProgress)
            .ok_or_else(|| CheckpointError::NoActiveCheckpoint(session_id.to_string()))?;

        row.last_completed_entity = Some(entity_key.to_string());
        row.total_records_synced += records_delta;
        row.last_updated_at = Utc::now();
        Ok(())
    }

    async fn finalize(
        &self,
        session_id: &str,
        status: CheckpointStatus,
    ) -> Result<(), CheckpointError> {
        let mut rows = self.rows();
        let row = rows
            .get_mut(session_id)
            .ok_or_else(|| CheckpointError::NotFound(session_id.to_string()))?;

        if !status.is_terminal() {
            return Err(CheckpointError::IllegalTransition {
                from: row.status,
                to: status,
            });
        }
        row.status.check_transition(status)?;
        row.status = status;
        row.last_updated_at = Utc::now();
        Ok(())
    }

    async fn reopen(&self, session_id: &str) -> Result<SyncCheckpoint, CheckpointError> {
        let mut rows = self.rows();
        let row = rows
            .get_mut(session_id)
            .ok_or_else(|| CheckpointError::NotFound(session_id.to_string()))?;

        row.status.check_transition(CheckpointStatus::InProgress)?;
        row.status = CheckpointStatus::InProgress;
        row.last_updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn load_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<SyncCheckpoint>, CheckpointError> {
        Ok(self.rows().get(session_id).cloned())
    }

    async fn load_latest_for_source(
        &self,
        source: SyncSource,
    ) -> Result<Option<SyncCheckpoint>, CheckpointError> {
        Ok(self
            .rows()
            .values()
            .filter(|row| row.source == source)
            .max_by_key(|row| row.started_at)
            .cloned())
    }
}
