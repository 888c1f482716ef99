//! Bounded-concurrency execution of per-item work
//!
//! [`run_bounded`] spawns one task per item, never more than `limit` at a
//! time. Each task hands its outcome back through the join set and the runner
//! merges them into a [`RunReport`] once, so no counters are shared between
//! tasks.
//!
//! A [`StepError::Fatal`] outcome cancels a child token: no further items are
//! dispatched and in-flight items observe the same token.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Why a single item did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepError<E> {
    /// Recorded against the item; the run continues
    Item(String),
    /// Stops the whole run
    Fatal(E),
    /// Interrupted by cancellation; neither success nor failure
    Cancelled,
}

pub type StepResult<T, E> = Result<T, StepError<E>>;

/// Merged outcome of a run. Indices are positions in the input.
#[derive(Debug)]
pub struct RunReport<T, E> {
    /// Successful items, sorted by index
    pub succeeded: Vec<(usize, T)>,
    /// Item-level failures, sorted by index
    pub failed: Vec<(usize, String)>,
    /// Items that were started but cancelled, sorted by index
    pub interrupted: Vec<usize>,
    /// Items never dispatched because the run was aborted or cancelled
    pub not_started: usize,
    /// First fatal error observed
    pub fatal: Option<(usize, E)>,
    /// The caller's token fired during the run
    pub cancelled: bool,
}

impl<T, E> Default for RunReport<T, E> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
            interrupted: Vec::new(),
            not_started: 0,
            fatal: None,
            cancelled: false,
        }
    }
}

impl<T, E> RunReport<T, E> {
    /// Items that neither succeeded nor failed, including the item that
    /// raised the fatal error
    pub fn skipped(&self) -> usize {
        self.not_started + self.interrupted.len() + usize::from(self.fatal.is_some())
    }

    fn record(&mut self, index: usize, outcome: StepResult<T, E>) {
        match outcome {
            Ok(value) => self.succeeded.push((index, value)),
            Err(StepError::Item(msg)) => self.failed.push((index, msg)),
            Err(StepError::Fatal(err)) => {
                if self.fatal.is_none() {
                    self.fatal = Some((index, err));
                } else {
                    // a second fatal item did not complete either
                    self.interrupted.push(index);
                }
            },
            Err(StepError::Cancelled) => self.interrupted.push(index),
        }
    }

    fn finish(mut self, cancelled: bool) -> Self {
        self.succeeded.sort_by_key(|(i, _)| *i);
        self.failed.sort_by_key(|(i, _)| *i);
        self.interrupted.sort_unstable();
        self.cancelled = cancelled;
        self
    }
}

/// Run `op` over `items` with at most `limit` in flight.
///
/// `op` receives the item's index, the item by value, and the run's abort
/// token. A `limit` of zero is treated as one.
pub async fn run_bounded<I, T, E, F, Fut>(
    items: Vec<I>,
    limit: usize,
    cancel: &CancellationToken,
    mut op: F,
) -> RunReport<T, E>
where
    F: FnMut(usize, I, CancellationToken) -> Fut,
    Fut: Future<Output = StepResult<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let total = items.len();
    let abort = cancel.child_token();
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let mut tasks: JoinSet<(usize, StepResult<T, E>)> = JoinSet::new();
    let mut report = RunReport::default();
    let mut dispatched = 0;

    for (index, item) in items.into_iter().enumerate() {
        let permit = tokio::select! {
            biased;
            _ = abort.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        // the abort may land while the permit is being granted
        if abort.is_cancelled() {
            break;
        }

        let task_abort = abort.clone();
        let fut = op(index, item, abort.clone());
        tasks.spawn(async move {
            let _permit = permit;
            let outcome = AssertUnwindSafe(fut)
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(StepError::Item(panic_message(&*panic))));

            if matches!(outcome, Err(StepError::Fatal(_))) {
                task_abort.cancel();
            }
            (index, outcome)
        });
        dispatched += 1;

        while let Some(joined) = tasks.try_join_next() {
            collect(&mut report, joined);
        }
    }

    while let Some(joined) = tasks.join_next().await {
        collect(&mut report, joined);
    }

    report.not_started = total - dispatched;
    if report.not_started > 0 {
        debug!(not_started = report.not_started, "Run stopped before dispatching all items");
    }

    report.finish(cancel.is_cancelled())
}

fn collect<T, E>(
    report: &mut RunReport<T, E>,
    joined: Result<(usize, StepResult<T, E>), tokio::task::JoinError>,
) {
    match joined {
        Ok((index, outcome)) => report.record(index, outcome),
        // tasks are never aborted and panics are caught inside the task
        Err(e) => warn!(error = %e, "Sync task ended unexpectedly"),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", msg)
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("panicked: {}", msg)
    } else {
        "panicked".to_string()
    }
}
