//! Orchestrator behaviour against in-memory doubles
//!
//! These tests verify:
//! - Retry and item failure accounting
//! - Rate-limit early stop and checkpoint resume
//! - Cancellation, dry runs and idempotent re-runs
//! - Error formats for HUD and Census

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use mds_ingest::sources::FetchError;
use mds_ingest::sync::checkpoint::{CheckpointError, CheckpointStatus};
use mds_ingest::sync::{CheckpointStore, SyncOrchestrator, SyncOutcome};
use mds_ingest::{SyncError, SyncRequest, SyncSource};

mod helpers;
use helpers::*;

const COUNTY_COUNT: usize = 254;

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retry_and_permanent_failure_is_recorded() {
    let employment = ScriptedEmployment::new()
        .script(
            ANDREWS,
            [
                Step::Fail(FetchError::transient("API returned status 503: busy")),
                Step::Fail(FetchError::transient("request failed: timeout")),
            ],
        )
        .script(
            ANGELINA,
            (0..4).map(|_| Step::Fail(FetchError::transient("API returned status 500: boom"))),
        );
    let harness = Harness::new(employment);
    let started = tokio::time::Instant::now();

    let result = harness
        .orchestrator(options(1))
        .sync_bls(Some(2023), Some(2024), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.outcome, SyncOutcome::Completed);
    assert_eq!(result.successful, COUNTY_COUNT - 1);
    assert_eq!(result.failed, 1);
    assert_eq!(result.skipped, 0);
    assert_eq!(
        result.errors,
        vec!["Angelina County: max retries (3) exceeded: API returned status 500: boom".to_string()]
    );
    assert_eq!(harness.employment.attempts(ANDREWS), 3);
    assert_eq!(harness.employment.attempts(ANGELINA), 4);
    assert_eq!(harness.employment.gauge.peak(), 1);

    // 100 + 200 for Andrews, 100 + 200 + 400 for Angelina
    assert!(started.elapsed() >= Duration::from_millis(1_000));

    let session = result.session_id.clone().unwrap();
    let checkpoint = harness.checkpoints.load_by_session(&session).await.unwrap().unwrap();
    assert_eq!(checkpoint.status, CheckpointStatus::Completed);
    assert_eq!(checkpoint.last_completed_entity.as_deref(), Some("507"));
    assert_eq!(checkpoint.total_records_synced, ((COUNTY_COUNT - 1) * DEFAULT_MONTHS) as i64);
    assert_eq!(harness.store.employment_rows(), (COUNTY_COUNT - 1) * DEFAULT_MONTHS);
}

#[tokio::test]
async fn test_dropped_connection_fails_only_that_county() {
    let harness = Harness::new(ScriptedEmployment::new());
    harness.store.reset_connection("LAUCN4800300000");

    let result = harness
        .orchestrator(options(4))
        .sync_bls(None, None, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.outcome, SyncOutcome::Completed);
    assert_eq!(result.successful, COUNTY_COUNT - 1);
    assert_eq!(result.failed, 1);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].starts_with("Andrews County DB: Database error:"));

    let session = result.session_id.unwrap();
    let checkpoint = harness.checkpoints.load_by_session(&session).await.unwrap().unwrap();
    assert_eq!(checkpoint.status, CheckpointStatus::Completed);
    assert_eq!(checkpoint.total_records_synced, ((COUNTY_COUNT - 1) * DEFAULT_MONTHS) as i64);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_stops_early_and_resume_continues() {
    let employment = ScriptedEmployment::with_delay(Duration::from_millis(50)).script(
        ANGELINA,
        [Step::Fail(FetchError::RateLimited("BLS API daily request limit reached".into()))],
    );
    let harness = Harness::new(employment);

    let result = harness
        .orchestrator(options(2))
        .sync_bls(None, None, None, &CancellationToken::new())
        .await
        .unwrap();

    let session = result.session_id.clone().unwrap();
    assert!(session.starts_with("bls_"));
    assert_eq!(
        result.outcome,
        SyncOutcome::RateLimited {
            session_id: Some(session.clone())
        }
    );
    assert_eq!(result.successful, 2);
    assert_eq!(result.failed, 0);
    assert_eq!(result.skipped, COUNTY_COUNT - 2);
    assert_eq!(
        result.errors.last().unwrap(),
        &format!(
            "BLS API daily rate limit reached - sync stopped early. Resume with: --resume={}",
            session
        )
    );
    assert!(!harness.employment.calls().contains(&"009".to_string()));

    let checkpoint = harness.checkpoints.load_by_session(&session).await.unwrap().unwrap();
    assert_eq!(checkpoint.status, CheckpointStatus::RateLimited);
    assert_eq!(checkpoint.last_completed_entity.as_deref(), Some(ANDREWS));
    assert_eq!(checkpoint.total_records_synced, (2 * DEFAULT_MONTHS) as i64);

    let resumed = harness.with_employment(ScriptedEmployment::new());
    let result = resumed
        .orchestrator(options(2))
        .sync_bls(None, None, Some(&session), &CancellationToken::new())
        .await
        .unwrap();

    let fetched = resumed.employment.counties_fetched();
    assert_eq!(fetched.len(), COUNTY_COUNT - 2);
    assert!(!fetched.contains(&ANDERSON.to_string()));
    assert!(!fetched.contains(&ANDREWS.to_string()));
    assert!(fetched.contains(&ANGELINA.to_string()));
    assert!(fetched.contains(&ARANSAS.to_string()));

    assert_eq!(result.outcome, SyncOutcome::Completed);
    assert_eq!(result.session_id.as_deref(), Some(session.as_str()));
    assert_eq!(result.successful, COUNTY_COUNT - 2);

    let checkpoint = harness.checkpoints.load_by_session(&session).await.unwrap().unwrap();
    assert_eq!(checkpoint.status, CheckpointStatus::Completed);
    assert_eq!(checkpoint.total_records_synced, (COUNTY_COUNT * DEFAULT_MONTHS) as i64);
    assert_eq!(harness.store.employment_rows(), COUNTY_COUNT * DEFAULT_MONTHS);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_keeps_completed_work_and_leaves_checkpoint_open() {
    let employment = ScriptedEmployment::new().script(ANGELINA, [Step::Hang]);
    let harness = Harness::new(employment);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let result = harness
        .orchestrator(options(1))
        .sync_bls(None, None, None, &cancel)
        .await
        .unwrap();

    assert!(result.is_cancelled());
    assert_eq!(result.successful, 2);
    assert_eq!(result.failed, 0);
    assert_eq!(result.skipped, COUNTY_COUNT - 2);
    assert_eq!(harness.employment.calls().len(), 3);

    let session = result.session_id.unwrap();
    let checkpoint = harness.checkpoints.load_by_session(&session).await.unwrap().unwrap();
    assert_eq!(checkpoint.status, CheckpointStatus::InProgress);
    assert_eq!(checkpoint.last_completed_entity.as_deref(), Some(ANDREWS));

    // an interrupted session resumes without being reopened
    let resumed = harness.with_employment(ScriptedEmployment::new());
    let result = resumed
        .orchestrator(options(1))
        .sync_bls(None, None, Some(&session), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.successful, COUNTY_COUNT - 2);
    assert_eq!(resumed.employment.calls()[0], ANGELINA);
}

#[tokio::test]
async fn test_resume_of_unknown_session_fails_without_fetching() {
    let harness = Harness::new(ScriptedEmployment::new());

    let err = harness
        .orchestrator(options(1))
        .sync_bls(None, None, Some("bls_0"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Checkpoint(CheckpointError::NotFound(_))));
    assert!(harness.employment.calls().is_empty());
}

#[tokio::test]
async fn test_inverted_bls_years_are_rejected() {
    let harness = Harness::new(ScriptedEmployment::new());

    let err = harness
        .orchestrator(options(1))
        .sync_bls(Some(2025), Some(2023), None, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Config(_)));
    assert!(harness.employment.calls().is_empty());
    assert!(harness.checkpoints.load_latest_for_source(SyncSource::Bls).await.unwrap().is_none());
}

#[tokio::test]
async fn test_resume_of_completed_session_is_rejected() {
    let harness = Harness::new(ScriptedEmployment::new());
    let orchestrator = harness.orchestrator(options(4));
    let cancel = CancellationToken::new();

    let result = orchestrator.sync_bls(None, None, None, &cancel).await.unwrap();
    let session = result.session_id.unwrap();

    let err = orchestrator
        .sync_bls(None, None, Some(&session), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::CheckpointNotResumable {
            status: CheckpointStatus::Completed,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_cap_is_respected() {
    let harness = Harness::new(ScriptedEmployment::with_delay(Duration::from_millis(10)));

    let result = harness
        .orchestrator(options(3))
        .sync_bls(None, None, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.successful, COUNTY_COUNT);
    assert!(harness.employment.gauge.peak() <= 3);
    assert!(harness.employment.gauge.peak() >= 2);

    let session = result.session_id.unwrap();
    let checkpoint = harness.checkpoints.load_by_session(&session).await.unwrap().unwrap();
    assert_eq!(checkpoint.last_completed_entity.as_deref(), Some("507"));
}

#[tokio::test]
async fn test_dry_run_fetches_but_writes_nothing() {
    let harness = Harness::new(ScriptedEmployment::new()).with_rents(FixedRents::new(vec![
        fmr("METRO12420M12420", Some("Austin-Round Rock, TX MSA"), None),
        fmr("NCNTY48001N48001", None, Some("Anderson County")),
    ]));
    let orchestrator = SyncOrchestrator::dry_run(harness.sources(), options(4));
    let cancel = CancellationToken::new();

    let hud = orchestrator.sync_hud(None, &cancel).await.unwrap();
    assert_eq!(hud.successful, 2);

    let census = orchestrator.sync_census(Some(2023), &cancel).await.unwrap();
    assert_eq!(census.successful, COUNTY_COUNT);
    assert_eq!(harness.demographics.calls(), COUNTY_COUNT);

    let bls = orchestrator.sync_bls(None, None, None, &cancel).await.unwrap();
    assert_eq!(bls.successful, COUNTY_COUNT);
    assert_eq!(bls.records_synced, COUNTY_COUNT * DEFAULT_MONTHS);
    assert_eq!(bls.session_id, None);

    assert_eq!(harness.store.writes.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert!(harness.checkpoints.all().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_dry_run_rate_limit_offers_no_session() {
    let employment = ScriptedEmployment::new().script(
        ANDREWS,
        [Step::Fail(FetchError::RateLimited("BLS API daily request limit reached".into()))],
    );
    let harness = Harness::new(employment);
    let orchestrator = SyncOrchestrator::dry_run(harness.sources(), options(1));

    let result = orchestrator
        .sync_bls(None, None, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.outcome, SyncOutcome::RateLimited { session_id: None });
    assert_eq!(result.session_id, None);
    assert_eq!(result.successful, 1);
    assert!(result.errors.iter().all(|e| !e.contains("--resume")));
    assert!(!result.to_string().contains("Session:"));
    assert!(harness.checkpoints.all().is_empty());
}

#[tokio::test]
async fn test_second_identical_sync_does_not_add_rows() {
    let harness = Harness::new(ScriptedEmployment::new()).with_rents(FixedRents::new(vec![
        fmr("METRO12420M12420", Some("Austin-Round Rock, TX MSA"), None),
        fmr("NCNTY48001N48001", None, Some("Anderson County")),
    ]));
    let orchestrator = harness.orchestrator(options(4));
    let cancel = CancellationToken::new();

    for _ in 0..2 {
        orchestrator.sync_hud(Some("tx"), &cancel).await.unwrap();
        orchestrator.sync_census(Some(2023), &cancel).await.unwrap();
        assert_eq!(harness.store.rent_rows(), 2);
        assert_eq!(harness.store.demographic_rows(), COUNTY_COUNT);
    }

    assert_eq!(*harness.rents.states.lock().unwrap(), vec!["TX", "TX"]);
}

#[tokio::test]
async fn test_hud_store_failures() {
    let harness = Harness::new(ScriptedEmployment::new()).with_rents(FixedRents::new(vec![
        fmr("METRO12420M12420", Some("Austin-Round Rock, TX MSA"), None),
        fmr("NCNTY48003N48003", None, Some("Andrews County")),
        fmr("NCNTY48005N48005", None, Some("Angelina County")),
    ]));
    harness.store.reject("NCNTY48003N48003");
    let cancel = CancellationToken::new();

    let result = harness
        .orchestrator(options(2))
        .sync_hud(None, &cancel)
        .await
        .unwrap();
    assert_eq!(result.successful, 2);
    assert_eq!(result.failed, 1);
    assert_eq!(
        result.errors,
        vec!["Andrews County: Invalid record: rejected NCNTY48003N48003".to_string()]
    );

    harness.store.close();
    let err = harness
        .orchestrator(options(2))
        .sync_hud(None, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Persistence(e) if e.is_fatal()));
}

#[tokio::test]
async fn test_hud_fetch_failures_are_hard_errors() {
    let harness = Harness::new(ScriptedEmployment::new()).with_rents(FixedRents::failing(
        FetchError::RateLimited("API returned status 429: Too Many Requests".into()),
    ));
    let err = harness
        .orchestrator(options(1))
        .sync_hud(None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::RateLimited {
            provider: SyncSource::Hud,
            ..
        }
    ));

    let harness = Harness::new(ScriptedEmployment::new()).with_rents(FixedRents::failing(
        FetchError::transient("API returned status 401: Unauthorized"),
    ));
    let err = harness
        .orchestrator(options(1))
        .sync_hud(None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "HUD FMR fetch failed: API returned status 401: Unauthorized"
    );
}

#[tokio::test]
async fn test_census_error_formats() {
    let harness = Harness::new(ScriptedEmployment::new()).with_demographics(
        ScriptedDemographics::new().fail(
            ANDERSON,
            FetchError::transient("API returned status 500: Internal Server Error"),
        ),
    );
    harness.store.reject("48003");

    let result = harness
        .orchestrator(options(4))
        .sync_census(Some(2023), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.successful, COUNTY_COUNT - 2);
    assert_eq!(result.failed, 2);
    assert_eq!(
        result.errors,
        vec![
            "Anderson County: API returned status 500: Internal Server Error".to_string(),
            "Andrews County DB: Invalid record: rejected 48003".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_census_rate_limit_stops_the_run() {
    let harness = Harness::new(ScriptedEmployment::new()).with_demographics(
        ScriptedDemographics::new().fail(
            ANGELINA,
            FetchError::RateLimited("API returned status 429: slow down".into()),
        ),
    );

    let err = harness
        .orchestrator(options(1))
        .sync_census(Some(2023), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SyncError::RateLimited {
            provider: SyncSource::Census,
            ..
        }
    ));
    assert_eq!(harness.demographics.calls(), 3);
}

#[tokio::test]
async fn test_sync_all_runs_sources_in_order() {
    let harness = Harness::new(ScriptedEmployment::new())
        .with_rents(FixedRents::new(vec![fmr("METRO12420M12420", Some("Austin"), None)]));

    let request = SyncRequest {
        census_year: Some(2023),
        resume: Some("ignored".into()),
        ..Default::default()
    };
    let results = harness
        .orchestrator(options(4))
        .sync_all(&request, &CancellationToken::new())
        .await
        .unwrap();

    let sources: Vec<_> = results.iter().map(|r| r.source).collect();
    assert_eq!(sources, SyncSource::ALL.to_vec());
    assert!(results.iter().all(|r| r.outcome == SyncOutcome::Completed));
}

#[tokio::test]
async fn test_sync_all_stops_at_first_hard_failure() {
    let harness = Harness::new(ScriptedEmployment::new()).with_rents(FixedRents::failing(
        FetchError::transient("API returned status 500: down"),
    ));

    let err = harness
        .orchestrator(options(1))
        .sync_all(&SyncRequest::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.failed, SyncSource::Hud);
    assert!(err.completed.is_empty());
    assert!(matches!(err.error, SyncError::UpstreamFetch { .. }));
    assert_eq!(harness.demographics.calls(), 0);
    assert!(harness.employment.calls().is_empty());
}
