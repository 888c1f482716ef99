//! Test doubles for orchestrator tests
//!
//! - Scripted upstream sources with per-county outcomes
//! - An in-memory market data store keyed like the real tables
//! - Builders for orchestrators wired to the doubles

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use mds_ingest::db::{MarketDataStore, PersistError};
use mds_ingest::sources::{
    DemographicsSource, EmploymentSource, FetchError, FetchResult, RentSource,
};
use mds_ingest::sync::{
    InMemoryCheckpointStore, Sources, SyncOptions, SyncOrchestrator, WorkItem,
};
use mds_ingest::{CensusDemographic, Employment, FairMarketRent};

/// First four Texas counties in work-list order
pub const ANDERSON: &str = "001";
pub const ANDREWS: &str = "003";
pub const ANGELINA: &str = "005";
pub const ARANSAS: &str = "007";

/// Months returned per county when a script does not say otherwise
pub const DEFAULT_MONTHS: usize = 12;

/// One scripted response for a county fetch
#[derive(Debug, Clone)]
pub enum Step {
    /// Succeed with this many monthly rows after the source's delay
    Rows(usize),
    /// Fail immediately
    Fail(FetchError),
    /// Block until cancelled
    Hang,
}

fn employment_rows(county: &WorkItem, months: usize) -> Vec<Employment> {
    (1..=months as i32)
        .map(|month| Employment {
            area_code: format!("LAUCN48{}00000", county.key),
            area_name: format!("{}, TX", county),
            area_type: Some("county".to_string()),
            state_code: Some("48".to_string()),
            county_code: Some(county.key.clone()),
            year: 2024,
            month,
            period_type: "monthly".to_string(),
            labor_force: Some(10_000 + month),
            employed: Some(9_500),
            unemployed: Some(500 + month),
            unemployment_rate: Some(5.0),
            is_preliminary: "N".to_string(),
        })
        .collect()
}

/// Tracks concurrent calls
#[derive(Debug, Default)]
pub struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// [`EmploymentSource`] that follows a per-county script, defaulting to
/// [`DEFAULT_MONTHS`] rows
#[derive(Debug, Default)]
pub struct ScriptedEmployment {
    script: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<String>>,
    delay: Duration,
    pub gauge: Gauge,
}

impl ScriptedEmployment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Queue `steps` for `county`; once drained the county succeeds
    pub fn script(self, county: &str, steps: impl IntoIterator<Item = Step>) -> Self {
        self.script
            .lock()
            .unwrap()
            .entry(county.to_string())
            .or_default()
            .extend(steps);
        self
    }

    /// Every call in call order, one entry per attempt
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Distinct counties fetched, in first-call order
    pub fn counties_fetched(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.calls()
            .into_iter()
            .filter(|key| seen.insert(key.clone()))
            .collect()
    }

    pub fn attempts(&self, county: &str) -> usize {
        self.calls().iter().filter(|key| *key == county).count()
    }
}

#[async_trait]
impl EmploymentSource for ScriptedEmployment {
    async fn fetch_county(
        &self,
        county: &WorkItem,
        _start_year: i32,
        _end_year: i32,
        cancel: &CancellationToken,
    ) -> FetchResult<Vec<Employment>> {
        self.calls.lock().unwrap().push(county.key.clone());
        let step = self
            .script
            .lock()
            .unwrap()
            .get_mut(&county.key)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Step::Rows(DEFAULT_MONTHS));

        self.gauge.enter();
        let outcome = match step {
            Step::Fail(err) => Err(err),
            Step::Hang => {
                cancel.cancelled().await;
                Err(FetchError::Cancelled)
            },
            Step::Rows(months) => tokio::select! {
                _ = cancel.cancelled() => Err(FetchError::Cancelled),
                _ = tokio::time::sleep(self.delay) => Ok(employment_rows(county, months)),
            },
        };
        self.gauge.exit();
        outcome
    }
}

/// [`DemographicsSource`] with per-county failures
#[derive(Debug, Default)]
pub struct ScriptedDemographics {
    failures: HashMap<String, FetchError>,
    calls: AtomicUsize,
}

impl ScriptedDemographics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(mut self, county: &str, err: FetchError) -> Self {
        self.failures.insert(county.to_string(), err);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DemographicsSource for ScriptedDemographics {
    async fn fetch_county(
        &self,
        county: &WorkItem,
        year: i32,
        _cancel: &CancellationToken,
    ) -> FetchResult<CensusDemographic> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.get(&county.key) {
            return Err(err.clone());
        }
        Ok(CensusDemographic {
            geo_id: format!("48{}", county.key),
            geo_type: "county".to_string(),
            geo_name: format!("{}, Texas", county),
            state_code: Some("48".to_string()),
            county_code: Some(county.key.clone()),
            survey_year: year,
            total_population: Some(50_000),
            ..Default::default()
        })
    }
}

/// [`RentSource`] returning a fixed list or a fixed error
#[derive(Debug, Default)]
pub struct FixedRents {
    records: Vec<FairMarketRent>,
    error: Option<FetchError>,
    pub states: Mutex<Vec<String>>,
}

impl FixedRents {
    pub fn new(records: Vec<FairMarketRent>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }

    pub fn failing(error: FetchError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

#[async_trait]
impl RentSource for FixedRents {
    async fn fetch_state(
        &self,
        state_code: &str,
        _cancel: &CancellationToken,
    ) -> FetchResult<Vec<FairMarketRent>> {
        self.states.lock().unwrap().push(state_code.to_string());
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(self.records.clone()),
        }
    }
}

pub fn fmr(entity_code: &str, metro: Option<&str>, county: Option<&str>) -> FairMarketRent {
    FairMarketRent {
        entity_code: entity_code.to_string(),
        metro_name: metro.map(str::to_string),
        county_name: county.map(str::to_string),
        state_code: Some("TX".to_string()),
        fiscal_year: 2025,
        two_bedroom: Some(1_250),
        ..Default::default()
    }
}

/// In-memory [`MarketDataStore`] keyed by each table's natural key
#[derive(Debug, Default)]
pub struct MemoryStore {
    rents: Mutex<HashMap<(String, i32), FairMarketRent>>,
    demographics: Mutex<HashMap<(String, i32), CensusDemographic>>,
    employment: Mutex<HashMap<(String, i32, i32), Employment>>,
    /// Entity codes, geo ids or area codes whose writes fail
    rejected: Mutex<HashSet<String>>,
    /// Keys whose writes fail with a dropped connection
    reset: Mutex<HashSet<String>>,
    closed: AtomicBool,
    pub writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject(&self, key: &str) {
        self.rejected.lock().unwrap().insert(key.to_string());
    }

    pub fn reset_connection(&self, key: &str) {
        self.reset.lock().unwrap().insert(key.to_string());
    }

    /// Make every later write fail as if the pool were closed
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn rent_rows(&self) -> usize {
        self.rents.lock().unwrap().len()
    }

    pub fn demographic_rows(&self) -> usize {
        self.demographics.lock().unwrap().len()
    }

    pub fn employment_rows(&self) -> usize {
        self.employment.lock().unwrap().len()
    }

    fn check(&self, key: &str) -> Result<(), PersistError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PersistError::Unavailable("pool closed".to_string()));
        }
        if self.rejected.lock().unwrap().contains(key) {
            return Err(PersistError::Invalid(format!("rejected {}", key)));
        }
        if self.reset.lock().unwrap().contains(key) {
            let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
            return Err(PersistError::from(sqlx::Error::Io(io)));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl MarketDataStore for MemoryStore {
    async fn upsert_fair_market_rent(&self, record: &FairMarketRent) -> Result<(), PersistError> {
        self.check(&record.entity_code)?;
        self.rents
            .lock()
            .unwrap()
            .insert((record.entity_code.clone(), record.fiscal_year), record.clone());
        Ok(())
    }

    async fn upsert_fair_market_rents(
        &self,
        records: &[FairMarketRent],
    ) -> Result<u64, PersistError> {
        for record in records {
            self.upsert_fair_market_rent(record).await?;
        }
        Ok(records.len() as u64)
    }

    async fn upsert_census_demographic(
        &self,
        record: &CensusDemographic,
    ) -> Result<(), PersistError> {
        self.check(&record.geo_id)?;
        self.demographics
            .lock()
            .unwrap()
            .insert((record.geo_id.clone(), record.survey_year), record.clone());
        Ok(())
    }

    async fn upsert_census_demographics(
        &self,
        records: &[CensusDemographic],
    ) -> Result<u64, PersistError> {
        for record in records {
            self.upsert_census_demographic(record).await?;
        }
        Ok(records.len() as u64)
    }

    async fn upsert_employment(&self, record: &Employment) -> Result<(), PersistError> {
        self.check(&record.area_code)?;
        self.employment.lock().unwrap().insert(
            (record.area_code.clone(), record.year, record.month),
            record.clone(),
        );
        Ok(())
    }

    async fn upsert_employment_batch(&self, records: &[Employment]) -> Result<u64, PersistError> {
        for record in records {
            self.upsert_employment(record).await?;
        }
        Ok(records.len() as u64)
    }
}

/// Doubles behind one orchestrator
pub struct Harness {
    pub rents: Arc<FixedRents>,
    pub demographics: Arc<ScriptedDemographics>,
    pub employment: Arc<ScriptedEmployment>,
    pub store: Arc<MemoryStore>,
    pub checkpoints: Arc<InMemoryCheckpointStore>,
}

impl Harness {
    pub fn new(employment: ScriptedEmployment) -> Self {
        Self {
            rents: Arc::new(FixedRents::default()),
            demographics: Arc::new(ScriptedDemographics::new()),
            employment: Arc::new(employment),
            store: Arc::new(MemoryStore::new()),
            checkpoints: Arc::new(InMemoryCheckpointStore::new()),
        }
    }

    pub fn with_rents(mut self, rents: FixedRents) -> Self {
        self.rents = Arc::new(rents);
        self
    }

    pub fn with_demographics(mut self, demographics: ScriptedDemographics) -> Self {
        self.demographics = Arc::new(demographics);
        self
    }

    /// Same stores, new employment script
    pub fn with_employment(&self, employment: ScriptedEmployment) -> Self {
        Self {
            rents: self.rents.clone(),
            demographics: self.demographics.clone(),
            employment: Arc::new(employment),
            store: self.store.clone(),
            checkpoints: self.checkpoints.clone(),
        }
    }

    pub fn sources(&self) -> Sources {
        Sources {
            rent: self.rents.clone(),
            demographics: self.demographics.clone(),
            employment: self.employment.clone(),
        }
    }

    pub fn orchestrator(&self, options: SyncOptions) -> SyncOrchestrator {
        SyncOrchestrator::new(
            self.sources(),
            self.store.clone(),
            self.checkpoints.clone(),
            options,
        )
    }
}

pub fn options(max_concurrent: usize) -> SyncOptions {
    SyncOptions {
        max_concurrent,
        max_retries: 3,
        retry_base_delay: Duration::from_millis(100),
        dry_run: false,
    }
}
