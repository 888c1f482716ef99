//! Postgres-backed checkpoint store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::models::SyncSource;
use crate::sync::checkpoint::{CheckpointError, CheckpointStatus, CheckpointStore, SyncCheckpoint};

const COLUMNS: &str = "id, sync_session_id, source, work_list_version, \
    last_completed_entity, total_records_synced, status, started_at, last_updated_at";

#[derive(Debug, Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn from_row(row: &PgRow) -> Result<SyncCheckpoint, CheckpointError> {
    let source: String = row.try_get("source")?;
    let status: String = row.try_get("status")?;

    Ok(SyncCheckpoint {
        id: row.try_get("id")?,
        session_id: row.try_get("sync_session_id")?,
        source: source
            .parse::<SyncSource>()
            .map_err(|e| CheckpointError::Corrupt(e.to_string()))?,
        work_list_version: row.try_get("work_list_version")?,
        last_completed_entity: row.try_get("last_completed_entity")?,
        total_records_synced: row.try_get("total_records_synced")?,
        status: status.parse()?,
        started_at: row.try_get::<DateTime<Utc>, _>("started_at")?,
        last_updated_at: row.try_get::<DateTime<Utc>, _>("last_updated_at")?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn create(
        &self,
        session_id: &str,
        source: SyncSource,
        work_list_version: &str,
    ) -> Result<SyncCheckpoint, CheckpointError> {
        let checkpoint = SyncCheckpoint::new(session_id, source, work_list_version);

        let result = sqlx::query(
            "INSERT INTO sync_checkpoints \
             (id, sync_session_id, source, work_list_version, total_records_synced, \
              status, started_at, last_updated_at) \
             VALUES ($1, $2, $3, $4, 0, $5, $6, $7)",
        )
        .bind(&checkpoint.id)
        .bind(&checkpoint.session_id)
        .bind(source.as_str())
        .bind(&checkpoint.work_list_version)
        .bind(checkpoint.status.as_str())
        .bind(checkpoint.started_at)
        .bind(checkpoint.last_updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(checkpoint),
            Err(e) if is_unique_violation(&e) => {
                Err(CheckpointError::AlreadyExists(session_id.to_string()))
            },
            Err(e) => Err(e.into()),
        }
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

        let result = sqlx::query(
            "UPDATE sync_checkpoints \
             SET last_completed_entity = $2, \
                 total_records_synced = total_records_synced + $3, \
                 last_updated_at = NOW() \
             WHERE sync_session_id = $1 AND status = 'in_progress'",
        )
        .bind(session_id)
        .bind(entity_key)
        .bind(records_delta)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CheckpointError::NoActiveCheckpoint(session_id.to_string()));
        }
        Ok(())
    }

    async fn finalize(
        &self,
        session_id: &str,
        status: CheckpointStatus,
    ) -> Result<(), CheckpointError> {
        if !status.is_terminal() {
            let current = self
                .load_by_session(session_id)
                .await?
                .ok_or_else(|| CheckpointError::NotFound(session_id.to_string()))?;
            return Err(CheckpointError::IllegalTransition {
                from: current.status,
                to: status,
            });
        }

        let result = sqlx::query(
            "UPDATE sync_checkpoints \
             SET status = $2, last_updated_at = NOW() \
             WHERE sync_session_id = $1 AND status = 'in_progress'",
        )
        .bind(session_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        match self.load_by_session(session_id).await? {
            None => Err(CheckpointError::NotFound(session_id.to_string())),
            Some(current) => Err(CheckpointError::IllegalTransition {
                from: current.status,
                to: status,
            }),
        }
    }

    async fn reopen(&self, session_id: &str) -> Result<SyncCheckpoint, CheckpointError> {
        let row = sqlx::query(&format!(
            "UPDATE sync_checkpoints \
             SET status = 'in_progress', last_updated_at = NOW() \
             WHERE sync_session_id = $1 AND status IN ('rate_limited', 'failed') \
             RETURNING {}",
            COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return from_row(&row);
        }

        match self.load_by_session(session_id).await? {
            None => Err(CheckpointError::NotFound(session_id.to_string())),
            Some(current) => Err(CheckpointError::IllegalTransition {
                from: current.status,
                to: CheckpointStatus::InProgress,
            }),
        }
    }

    async fn load_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<SyncCheckpoint>, CheckpointError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM sync_checkpoints WHERE sync_session_id = $1",
            COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(from_row).transpose()
    }

    async fn load_latest_for_source(
        &self,
        source: SyncSource,
    ) -> Result<Option<SyncCheckpoint>, CheckpointError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM sync_checkpoints WHERE source = $1 \
             ORDER BY started_at DESC LIMIT 1",
            COLUMNS
        ))
        .bind(source.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(from_row).transpose()
    }
}
