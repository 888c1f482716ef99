//! BLS Local Area Unemployment Statistics (LAUS) API client

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{parse_number, send, EmploymentSource, FetchError, FetchResult};
use crate::models::Employment;
use crate::sync::work_items::WorkItem;

pub const BASE_URL_V1: &str = "https://api.bls.gov/publicAPI/v1/timeseries/data/";
pub const BASE_URL_V2: &str = "https://api.bls.gov/publicAPI/v2/timeseries/data/";

/// Pause after every request; v2 allows 50 requests per 10 seconds
pub const DEFAULT_REQUEST_SPACING: Duration = Duration::from_millis(250);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// LAUS measure codes, the last two characters of a series id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Measure {
    UnemploymentRate,
    Unemployed,
    Employed,
    LaborForce,
}

impl Measure {
    pub const ALL: [Measure; 4] = [
        Measure::LaborForce,
        Measure::Employed,
        Measure::Unemployed,
        Measure::UnemploymentRate,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Measure::UnemploymentRate => "03",
            Measure::Unemployed => "04",
            Measure::Employed => "05",
            Measure::LaborForce => "06",
        }
    }

    fn from_series_id(series_id: &str) -> Option<Self> {
        let suffix = series_id.get(series_id.len().checked_sub(2)?..)?;
        Self::ALL.into_iter().find(|m| m.code() == suffix)
    }
}

/// Series id for a Texas county measure, e.g. `LAUCN480290000000003`
pub fn series_id(county_fips: &str, measure: Measure) -> String {
    format!("LAUCN48{}00000000{}", county_fips, measure.code())
}

#[derive(Debug, Serialize)]
struct SeriesRequest<'a> {
    seriesid: Vec<String>,
    startyear: String,
    endyear: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    registrationkey: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct LausResponse {
    status: String,
    #[serde(default)]
    message: Vec<String>,
    #[serde(rename = "Results", default)]
    results: LausResults,
}

#[derive(Debug, Default, Deserialize)]
struct LausResults {
    #[serde(default)]
    series: Vec<LausSeries>,
}

#[derive(Debug, Deserialize)]
struct LausSeries {
    #[serde(rename = "seriesID")]
    series_id: String,
    #[serde(default)]
    data: Vec<LausPoint>,
}

#[derive(Debug, Deserialize)]
struct LausPoint {
    year: String,
    period: String,
    value: String,
    #[serde(default)]
    footnotes: Vec<Footnote>,
}

#[derive(Debug, Default, Deserialize)]
struct Footnote {
    #[serde(default)]
    code: Option<String>,
}

/// Client for the LAUS timeseries endpoint
#[derive(Debug, Clone)]
pub struct BlsClient {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
    request_spacing: Duration,
}

impl BlsClient {
    /// v2 with a registration key, v1 without
    pub fn new(api_key: Option<String>) -> FetchResult<Self> {
        let api_key = api_key.filter(|k| !k.is_empty());
        let url = if api_key.is_some() { BASE_URL_V2 } else { BASE_URL_V1 };
        Self::with_url(api_key, url)
    }

    pub fn with_url(api_key: Option<String>, url: impl Into<String>) -> FetchResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FetchError::transient(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            url: url.into(),
            api_key,
            request_spacing: DEFAULT_REQUEST_SPACING,
        })
    }

    pub fn with_request_spacing(mut self, spacing: Duration) -> Self {
        self.request_spacing = spacing;
        self
    }

    async fn pace(&self, cancel: &CancellationToken) -> FetchResult<()> {
        if self.request_spacing.is_zero() {
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            _ = tokio::time::sleep(self.request_spacing) => Ok(()),
        }
    }
}

#[async_trait]
impl EmploymentSource for BlsClient {
    async fn fetch_county(
        &self,
        county: &WorkItem,
        start_year: i32,
        end_year: i32,
        cancel: &CancellationToken,
    ) -> FetchResult<Vec<Employment>> {
        let body = SeriesRequest {
            seriesid: Measure::ALL.iter().map(|m| series_id(&county.key, *m)).collect(),
            startyear: start_year.to_string(),
            endyear: end_year.to_string(),
            registrationkey: self.api_key.as_deref(),
        };

        debug!(county = %county.name, fips = %county.key, start_year, end_year, "Fetching LAUS series");

        let response = send(self.http.post(&self.url).json(&body), cancel).await?;
        self.pace(cancel).await?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| FetchError::transient(format!("failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(FetchError::transient(format!(
                "API returned status {}: {}",
                status.as_u16(),
                text.trim()
            )));
        }

        let parsed: LausResponse = serde_json::from_str(&text)
            .map_err(|e| FetchError::transient(format!("failed to parse response: {}", e)))?;

        if parsed.status != "REQUEST_SUCCEEDED" {
            if parsed
                .message
                .iter()
                .any(|m| m.to_lowercase().contains("daily threshold"))
            {
                return Err(FetchError::RateLimited(
                    "BLS API daily request limit reached".to_string(),
                ));
            }
            return Err(FetchError::transient(format!(
                "BLS API error: {}",
                parsed.message.join("; ")
            )));
        }

        Ok(to_records(parsed.results, county))
    }
}

#[derive(Default)]
struct PeriodValues {
    labor_force: Option<i32>,
    employed: Option<i32>,
    unemployed: Option<i32>,
    unemployment_rate: Option<f64>,
    preliminary: bool,
}

/// Fold the four measure series into one record per month
fn to_records(results: LausResults, county: &WorkItem) -> Vec<Employment> {
    let mut periods: BTreeMap<(i32, i32), PeriodValues> = BTreeMap::new();

    for series in results.series {
        let Some(measure) = Measure::from_series_id(&series.series_id) else {
            continue;
        };

        for point in series.data {
            // M13 is the annual average
            let Some(month) = parse_month(&point.period) else {
                continue;
            };
            let Ok(year) = point.year.trim().parse::<i32>() else {
                continue;
            };

            let entry = periods.entry((year, month)).or_default();
            match measure {
                Measure::LaborForce => entry.labor_force = parse_number(&point.value),
                Measure::Employed => entry.employed = parse_number(&point.value),
                Measure::Unemployed => entry.unemployed = parse_number(&point.value),
                Measure::UnemploymentRate => entry.unemployment_rate = parse_number(&point.value),
            }
            if point.footnotes.iter().any(|f| f.code.as_deref() == Some("P")) {
                entry.preliminary = true;
            }
        }
    }

    let area_code: String = series_id(&county.key, Measure::UnemploymentRate)
        .chars()
        .take(15)
        .collect();

    periods
        .into_iter()
        .map(|((year, month), v)| Employment {
            area_code: area_code.clone(),
            area_name: format!("{}, TX", county.name),
            area_type: Some("county".to_string()),
            state_code: Some("48".to_string()),
            county_code: Some(county.key.clone()),
            year,
            month,
            period_type: "monthly".to_string(),
            labor_force: v.labor_force,
            employed: v.employed,
            unemployed: v.unemployed,
            unemployment_rate: v.unemployment_rate,
            is_preliminary: if v.preliminary { "Y" } else { "N" }.to_string(),
        })
        .collect()
}

/// "M01".."M12" to 1..12
fn parse_month(period: &str) -> Option<i32> {
    let month: i32 = period.strip_prefix('M')?.parse().ok()?;
    (1..=12).contains(&month).then_some(month)
}
