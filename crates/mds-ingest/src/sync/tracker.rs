//! Single writer for checkpoint progress
//!
//! Workers report settled items over a channel; one task turns those reports
//! into checkpoint writes. The checkpoint only ever names an item once every
//! item before it has settled, so a resumed run cannot skip work that was
//! still in flight when the previous run stopped.

use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::checkpoint::CheckpointManager;

/// A work item that reached a final outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settled {
    pub index: usize,
    /// Records persisted, or `None` for an item-level failure
    pub records: Option<usize>,
}

/// Cloneable sending side handed to workers
#[derive(Debug, Clone)]
pub struct TrackerHandle {
    tx: mpsc::UnboundedSender<Settled>,
}

impl TrackerHandle {
    pub fn succeeded(&self, index: usize, records: usize) {
        self.send(Settled {
            index,
            records: Some(records),
        });
    }

    pub fn failed(&self, index: usize) {
        self.send(Settled {
            index,
            records: None,
        });
    }

    fn send(&self, settled: Settled) {
        if self.tx.send(settled).is_err() {
            warn!(index = settled.index, "Checkpoint tracker stopped; progress not recorded");
        }
    }
}

/// Final tracker state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerSummary {
    /// Index of the first item that has not settled
    pub watermark: usize,
    /// Key written by the last successful checkpoint update
    pub last_written: Option<String>,
}

pub struct CheckpointTracker {
    handle: TrackerHandle,
    task: JoinHandle<TrackerSummary>,
}

impl CheckpointTracker {
    /// Start tracking `session_id` over `keys`, beginning at `start`
    pub fn spawn(
        manager: CheckpointManager,
        session_id: String,
        keys: Vec<String>,
        start: usize,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(track(manager, session_id, keys, start, rx));
        Self {
            handle: TrackerHandle { tx },
            task,
        }
    }

    pub fn handle(&self) -> TrackerHandle {
        self.handle.clone()
    }

    /// Wait for every reported item to be written. All handles must have been
    /// dropped, otherwise this waits for them.
    pub async fn finish(self) -> TrackerSummary {
        drop(self.handle);
        match self.task.await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, "Checkpoint tracker task failed");
                TrackerSummary::default()
            },
        }
    }
}

async fn track(
    manager: CheckpointManager,
    session_id: String,
    keys: Vec<String>,
    start: usize,
    mut rx: mpsc::UnboundedReceiver<Settled>,
) -> TrackerSummary {
    let mut pending: BTreeMap<usize, Option<usize>> = BTreeMap::new();
    let mut summary = TrackerSummary {
        watermark: start,
        last_written: None,
    };
    let mut unwritten_records: i64 = 0;

    while let Some(settled) = rx.recv().await {
        pending.insert(settled.index, settled.records);

        let mut saw_success = false;
        while let Some(records) = pending.remove(&summary.watermark) {
            if let Some(n) = records {
                unwritten_records += n as i64;
                saw_success = true;
            }
            summary.watermark += 1;
        }

        if !saw_success {
            continue;
        }

        let Some(key) = summary.watermark.checked_sub(1).and_then(|i| keys.get(i)) else {
            continue;
        };

        if manager.advance(&session_id, key, unwritten_records).await {
            debug!(session_id = %session_id, last_completed = %key, records = unwritten_records, "Checkpoint advanced");
            unwritten_records = 0;
            summary.last_written = Some(key.clone());
        }
    }

    if !pending.is_empty() {
        debug!(
            session_id = %session_id,
            watermark = summary.watermark,
            held = pending.len(),
            "Items settled past an unsettled item were not checkpointed"
        );
    }

    summary
}
