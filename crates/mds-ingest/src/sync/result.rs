//! Per-source sync summaries

use serde::Serialize;
use std::fmt::Write as _;
use std::time::Duration;

use crate::models::SyncSource;

/// Errors shown by [`SyncResult::summary`] when no limit is given
pub const DEFAULT_ERROR_DISPLAY_LIMIT: usize = 10;

/// How a sync run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncOutcome {
    Completed,
    /// Stopped early by the provider quota; resumable with `session_id`
    /// when a checkpoint backs the run
    RateLimited { session_id: Option<String> },
    /// Stopped by the caller before all items ran
    Cancelled,
}

/// What one source sync accomplished
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub source: SyncSource,
    /// Work items persisted, or counted in a dry run
    pub successful: usize,
    /// Normalized records written
    pub records_synced: usize,
    /// Work items that failed after retries
    pub failed: usize,
    /// Work items never run or interrupted
    pub skipped: usize,
    pub duration: Duration,
    /// Item errors in work-list order; a resume hint, if any, comes last
    pub errors: Vec<String>,
    pub outcome: SyncOutcome,
    pub session_id: Option<String>,
}

impl SyncResult {
    pub fn new(source: SyncSource) -> Self {
        Self {
            source,
            successful: 0,
            records_synced: 0,
            failed: 0,
            skipped: 0,
            duration: Duration::ZERO,
            errors: Vec::new(),
            outcome: SyncOutcome::Completed,
            session_id: None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self.outcome, SyncOutcome::RateLimited { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        self.outcome == SyncOutcome::Cancelled
    }

    /// Multi-line report with at most `limit` error lines
    pub fn summary(&self, limit: usize) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{} sync {}", self.source, self.outcome_label());
        let _ = writeln!(out, "  Successful: {}", self.successful);
        let _ = writeln!(out, "  Records:    {}", self.records_synced);
        let _ = writeln!(out, "  Failed:     {}", self.failed);
        if self.skipped > 0 {
            let _ = writeln!(out, "  Skipped:    {}", self.skipped);
        }
        let _ = writeln!(out, "  Duration:   {:.1}s", self.duration.as_secs_f64());
        if let Some(session) = &self.session_id {
            let _ = writeln!(out, "  Session:    {}", session);
        }

        if !self.errors.is_empty() {
            let shown = self.errors.len().min(limit);
            let _ = writeln!(out, "  First {} errors (of {}):", shown, self.errors.len());
            for err in self.errors.iter().take(shown) {
                let _ = writeln!(out, "    - {}", err);
            }
            if self.errors.len() > shown {
                let _ = writeln!(out, "    ... and {} more", self.errors.len() - shown);
            }
        }

        out
    }

    fn outcome_label(&self) -> &'static str {
        match self.outcome {
            SyncOutcome::Completed => "completed",
            SyncOutcome::RateLimited { .. } => "stopped by rate limit",
            SyncOutcome::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SyncResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.summary(DEFAULT_ERROR_DISPLAY_LIMIT))
    }
}
