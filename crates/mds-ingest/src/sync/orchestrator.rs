//! Per-source sync runs
//!
//! HUD and Census are plain fan-outs: every item is attempted once and the
//! run has no durable state. BLS walks the county list under a checkpoint so
//! a run stopped by the provider's daily quota can be resumed later.

use chrono::{Datelike, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::checkpoint::{CheckpointManager, CheckpointStatus, CheckpointStore};
use super::memory::InMemoryCheckpointStore;
use super::result::{SyncOutcome, SyncResult};
use super::retry::RetryPolicy;
use super::runner::{run_bounded, RunReport, StepError};
use super::tracker::CheckpointTracker;
use super::work_items::{texas_counties, WorkItem, COUNTY_LIST_VERSION};
use super::{SyncAllError, SyncError, SyncOptions, SyncRequest};
use crate::db::{MarketDataStore, PersistError};
use crate::models::SyncSource;
use crate::sources::{DemographicsSource, EmploymentSource, FetchError, RentSource};

/// HUD state fetched when none is given
pub const DEFAULT_STATE: &str = "TX";

/// Upstream clients, one per provider
#[derive(Clone)]
pub struct Sources {
    pub rent: Arc<dyn RentSource>,
    pub demographics: Arc<dyn DemographicsSource>,
    pub employment: Arc<dyn EmploymentSource>,
}

pub struct SyncOrchestrator {
    sources: Sources,
    /// `None` only for orchestrators built with [`SyncOrchestrator::dry_run`]
    store: Option<Arc<dyn MarketDataStore>>,
    checkpoints: CheckpointManager,
    options: SyncOptions,
}

impl SyncOrchestrator {
    pub fn new(
        sources: Sources,
        store: Arc<dyn MarketDataStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        options: SyncOptions,
    ) -> Self {
        Self {
            sources,
            store: Some(store),
            checkpoints: CheckpointManager::new(checkpoints),
            options,
        }
    }

    /// Orchestrator that fetches and counts without a database
    pub fn dry_run(sources: Sources, options: SyncOptions) -> Self {
        Self {
            sources,
            store: None,
            checkpoints: CheckpointManager::new(Arc::new(InMemoryCheckpointStore::new())),
            options: SyncOptions {
                dry_run: true,
                ..options
            },
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// Store for a run that writes; dry runs never ask for it
    fn store(&self) -> Result<Arc<dyn MarketDataStore>, SyncError> {
        self.store.clone().ok_or_else(|| {
            SyncError::Persistence(PersistError::Unavailable(
                "no market data store configured".to_string(),
            ))
        })
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.options.max_retries, self.options.retry_base_delay)
    }

    /// Sync one source
    pub async fn run(
        &self,
        source: SyncSource,
        request: &SyncRequest,
        cancel: &CancellationToken,
    ) -> Result<SyncResult, SyncError> {
        match source {
            SyncSource::Hud => self.sync_hud(request.state.as_deref(), cancel).await,
            SyncSource::Census => self.sync_census(request.census_year, cancel).await,
            SyncSource::Bls => {
                self.sync_bls(
                    request.bls_start_year,
                    request.bls_end_year,
                    request.resume.as_deref(),
                    cancel,
                )
                .await
            },
        }
    }

    /// HUD, Census, then a fresh BLS session. Stops at the first hard failure
    /// or after a cancelled source.
    pub async fn sync_all(
        &self,
        request: &SyncRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<SyncResult>, SyncAllError> {
        let request = SyncRequest {
            resume: None,
            ..request.clone()
        };
        let mut completed = Vec::with_capacity(SyncSource::ALL.len());

        for source in SyncSource::ALL {
            match self.run(source, &request, cancel).await {
                Ok(result) => {
                    let cancelled = result.is_cancelled();
                    completed.push(result);
                    if cancelled {
                        info!(source = %source, "Sync cancelled, skipping remaining sources");
                        break;
                    }
                },
                Err(error) => {
                    return Err(SyncAllError {
                        failed: source,
                        completed,
                        error,
                    })
                },
            }
        }

        Ok(completed)
    }

    /// Fetch every FMR area of `state` in one request, then upsert each one
    #[instrument(skip(self, cancel))]
    pub async fn sync_hud(
        &self,
        state: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<SyncResult, SyncError> {
        let started = Instant::now();
        let state = state
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_STATE)
            .to_uppercase();
        let mut result = SyncResult::new(SyncSource::Hud);

        info!(state = %state, "Starting HUD FMR sync");

        let records = match self.sources.rent.fetch_state(&state, cancel).await {
            Ok(records) => records,
            Err(FetchError::Cancelled) => {
                result.outcome = SyncOutcome::Cancelled;
                result.duration = started.elapsed();
                return Ok(result);
            },
            Err(e) => return Err(hard_fetch_error(SyncSource::Hud, e)),
        };

        info!(count = records.len(), "Fetched HUD FMR records");

        if self.options.dry_run {
            result.successful = records.len();
            result.records_synced = records.len();
            result.duration = started.elapsed();
            info!(record_count = records.len(), "Dry run, skipping database upserts");
            return Ok(result);
        }

        let store = self.store()?;
        let report = run_bounded(records, self.options.max_concurrent, cancel, move |_, record, _| {
            let store = store.clone();
            async move {
                match store.upsert_fair_market_rent(&record).await {
                    Ok(()) => Ok(1),
                    Err(e) if e.is_fatal() => Err(StepError::Fatal(SyncError::Persistence(e))),
                    Err(e) => {
                        warn!(entity = record.display_name(), error = %e, "Failed to upsert HUD FMR");
                        Err(StepError::Item(format!("{}: {}", record.display_name(), e)))
                    },
                }
            }
        })
        .await;

        if let Some(err) = merge_report(&mut result, report) {
            return Err(err);
        }
        result.duration = started.elapsed();

        info!(
            successful = result.successful,
            failed = result.failed,
            duration_ms = result.duration.as_millis() as u64,
            "Completed HUD FMR sync"
        );
        Ok(result)
    }

    /// One ACS request per Texas county, no retries
    #[instrument(skip(self, cancel))]
    pub async fn sync_census(
        &self,
        year: Option<i32>,
        cancel: &CancellationToken,
    ) -> Result<SyncResult, SyncError> {
        let started = Instant::now();
        let year = year.unwrap_or_else(|| current_year() - 1);
        let counties = texas_counties();
        let mut result = SyncResult::new(SyncSource::Census);

        info!(county_count = counties.len(), year, "Starting Census ACS sync");

        let store = if self.options.dry_run {
            None
        } else {
            Some(self.store()?)
        };
        let source = self.sources.demographics.clone();

        let report = run_bounded(
            counties,
            self.options.max_concurrent,
            cancel,
            move |_, county: WorkItem, abort| {
                let source = source.clone();
                let store = store.clone();
                async move {
                    let record = RetryPolicy::disabled()
                        .run(&abort, || source.fetch_county(&county, year, &abort))
                        .await
                        .map_err(|e| county_fetch_error(SyncSource::Census, &county, e))?;

                    if let Some(store) = store {
                        match store.upsert_census_demographic(&record).await {
                            Ok(()) => {},
                            Err(e) if e.is_fatal() => {
                                return Err(StepError::Fatal(SyncError::Persistence(e)))
                            },
                            Err(e) => {
                                warn!(county = %county.name, error = %e, "Failed to upsert Census data");
                                return Err(StepError::Item(format!("{} DB: {}", county, e)));
                            },
                        }
                    }
                    Ok(1)
                }
            },
        )
        .await;

        if let Some(err) = merge_report(&mut result, report) {
            return Err(err);
        }
        result.duration = started.elapsed();

        info!(
            successful = result.successful,
            failed = result.failed,
            duration_ms = result.duration.as_millis() as u64,
            "Completed Census ACS sync"
        );
        Ok(result)
    }

    /// LAUS series for every Texas county, checkpointed after each county.
    ///
    /// Pass `resume` to continue a `rate_limited`, `failed` or interrupted
    /// session from the county after its last completed one.
    #[instrument(skip(self, cancel))]
    pub async fn sync_bls(
        &self,
        start_year: Option<i32>,
        end_year: Option<i32>,
        resume: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<SyncResult, SyncError> {
        let started = Instant::now();
        let end_year = end_year.unwrap_or_else(current_year);
        let start_year = start_year.unwrap_or(end_year - 2);
        if start_year > end_year {
            return Err(SyncError::Config(mds_common::MdsError::config(format!(
                "BLS start year {} is after end year {}",
                start_year, end_year
            ))));
        }
        let counties = texas_counties();
        let dry_run = self.options.dry_run;
        let mut result = SyncResult::new(SyncSource::Bls);

        let (session_id, start_index) = match resume {
            Some(session_id) => {
                let point = if dry_run {
                    self.checkpoints
                        .plan_resume(session_id, SyncSource::Bls, &counties, COUNTY_LIST_VERSION)
                        .await?
                } else {
                    self.checkpoints
                        .resume(session_id, SyncSource::Bls, &counties, COUNTY_LIST_VERSION)
                        .await?
                };
                (session_id.to_string(), point.start_index)
            },
            None => {
                let session_id = new_session_id(SyncSource::Bls);
                if !dry_run {
                    self.checkpoints
                        .begin(&session_id, SyncSource::Bls, COUNTY_LIST_VERSION)
                        .await?;
                }
                info!(
                    session_id = %session_id,
                    county_count = counties.len(),
                    start_year,
                    end_year,
                    "Starting BLS LAUS sync"
                );
                (session_id, 0)
            },
        };
        // a fresh dry-run session has no checkpoint to resume from
        let resumable = !dry_run || resume.is_some();
        if resumable {
            result.session_id = Some(session_id.clone());
        }

        let (store, tracker) = if dry_run {
            (None, None)
        } else {
            let keys = counties.iter().map(|c| c.key.clone()).collect();
            let tracker = CheckpointTracker::spawn(
                self.checkpoints.clone(),
                session_id.clone(),
                keys,
                start_index,
            );
            (Some(self.store()?), Some(tracker))
        };

        let remaining = counties.get(start_index..).unwrap_or_default().to_vec();
        let source = self.sources.employment.clone();
        let policy = self.retry_policy();
        let progress = tracker.as_ref().map(CheckpointTracker::handle);

        let report = run_bounded(
            remaining,
            self.options.max_concurrent,
            cancel,
            move |offset, county: WorkItem, abort| {
                let index = start_index + offset;
                let source = source.clone();
                let store = store.clone();
                let progress = progress.clone();
                async move {
                    let fetched = source
                        .fetch_county_with_retry(&county, start_year, end_year, &policy, &abort)
                        .await;

                    let records = match fetched {
                        Ok(records) => records,
                        Err(e) => {
                            let err = county_fetch_error(SyncSource::Bls, &county, e);
                            if let (Some(progress), StepError::Item(_)) = (&progress, &err) {
                                progress.failed(index);
                            }
                            return Err(err);
                        },
                    };

                    if let Some(store) = store {
                        match store.upsert_employment_batch(&records).await {
                            Ok(_) => {},
                            Err(e) if e.is_fatal() => {
                                return Err(StepError::Fatal(SyncError::Persistence(e)))
                            },
                            Err(e) => {
                                warn!(county = %county.name, error = %e, "Failed to upsert BLS data");
                                if let Some(progress) = &progress {
                                    progress.failed(index);
                                }
                                return Err(StepError::Item(format!("{} DB: {}", county, e)));
                            },
                        }
                    }

                    if let Some(progress) = &progress {
                        progress.succeeded(index, records.len());
                    }
                    Ok(records.len())
                }
            },
        )
        .await;

        let watermark = match tracker {
            Some(tracker) => Some(tracker.finish().await.watermark),
            None => None,
        };

        let fatal = merge_report(&mut result, report);
        result.duration = started.elapsed();

        match fatal {
            Some(SyncError::RateLimited { .. }) => {
                result.outcome = SyncOutcome::RateLimited {
                    session_id: result.session_id.clone(),
                };
                if !dry_run {
                    self.checkpoints
                        .finalize(&session_id, CheckpointStatus::RateLimited)
                        .await;
                    result.errors.push(format!(
                        "BLS API daily rate limit reached - sync stopped early. Resume with: --resume={}",
                        session_id
                    ));
                }
                warn!(
                    session_id = %session_id,
                    successful = result.successful,
                    records = result.records_synced,
                    failed = result.failed,
                    skipped = result.skipped,
                    "BLS LAUS sync stopped early due to daily rate limit"
                );
                Ok(result)
            },
            Some(err) => {
                if !dry_run {
                    self.checkpoints
                        .finalize(&session_id, CheckpointStatus::Failed)
                        .await;
                }
                Err(err)
            },
            None if result.is_cancelled() => {
                info!(
                    session_id = %session_id,
                    successful = result.successful,
                    skipped = result.skipped,
                    watermark,
                    "BLS LAUS sync cancelled, checkpoint left in progress"
                );
                Ok(result)
            },
            None => {
                if !dry_run {
                    self.checkpoints
                        .finalize(&session_id, CheckpointStatus::Completed)
                        .await;
                }
                info!(
                    session_id = %session_id,
                    successful = result.successful,
                    records = result.records_synced,
                    failed = result.failed,
                    duration_ms = result.duration.as_millis() as u64,
                    "Completed BLS LAUS sync"
                );
                Ok(result)
            },
        }
    }
}

/// Fold a runner report into `result`, returning its fatal error if any
fn merge_report(
    result: &mut SyncResult,
    report: RunReport<usize, SyncError>,
) -> Option<SyncError> {
    result.skipped = report.skipped();
    result.successful = report.succeeded.len();
    result.records_synced = report.succeeded.iter().map(|(_, records)| records).sum();
    result.failed = report.failed.len();
    result.errors = report.failed.into_iter().map(|(_, msg)| msg).collect();
    if report.cancelled {
        result.outcome = SyncOutcome::Cancelled;
    }
    report.fatal.map(|(_, err)| err)
}

/// Classify a per-county fetch failure for the runner
fn county_fetch_error(
    provider: SyncSource,
    county: &WorkItem,
    err: FetchError,
) -> StepError<SyncError> {
    match err {
        FetchError::Cancelled => StepError::Cancelled,
        FetchError::RateLimited(message) => {
            warn!(county = %county.name, provider = %provider, "Provider rate limit reached, stopping sync");
            StepError::Fatal(SyncError::RateLimited { provider, message })
        },
        other => {
            warn!(county = %county.name, provider = %provider, error = %other, "Failed to fetch county data");
            StepError::Item(format!("{}: {}", county, other))
        },
    }
}

/// Failure of a fetch the whole run depends on
fn hard_fetch_error(provider: SyncSource, err: FetchError) -> SyncError {
    match err {
        FetchError::RateLimited(message) => SyncError::RateLimited { provider, message },
        other => SyncError::UpstreamFetch {
            provider,
            message: other.to_string(),
        },
    }
}

fn current_year() -> i32 {
    Utc::now().year()
}

fn new_session_id(source: SyncSource) -> String {
    format!("{}_{}", source.as_str(), Utc::now().timestamp_millis())
}
