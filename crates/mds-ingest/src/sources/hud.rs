//! HUD Fair Market Rent API client

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{send, status_error, FetchError, FetchResult, RentSource};
use crate::models::FairMarketRent;

pub const DEFAULT_BASE_URL: &str = "https://www.huduser.gov/hudapi/public";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct StateDataResponse {
    data: StateData,
}

#[derive(Debug, Deserialize)]
struct StateData {
    #[serde(default)]
    year: String,
    #[serde(default)]
    metroareas: Vec<RentArea>,
    #[serde(default)]
    counties: Vec<RentArea>,
}

/// Shared shape of the `metroareas` and `counties` entries
#[derive(Debug, Deserialize)]
struct RentArea {
    #[serde(default)]
    code: String,
    #[serde(default)]
    metro_name: Option<String>,
    #[serde(default)]
    county_name: Option<String>,
    #[serde(default)]
    town_name: Option<String>,
    #[serde(rename = "Efficiency", default)]
    efficiency: i32,
    #[serde(rename = "One-Bedroom", default)]
    one_bedroom: i32,
    #[serde(rename = "Two-Bedroom", default)]
    two_bedroom: i32,
    #[serde(rename = "Three-Bedroom", default)]
    three_bedroom: i32,
    #[serde(rename = "Four-Bedroom", default)]
    four_bedroom: i32,
}

/// Client for `/fmr/statedata/{state}`
#[derive(Debug, Clone)]
pub struct HudClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HudClient {
    pub fn new(api_key: impl Into<String>) -> FetchResult<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> FetchResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FetchError::transient(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn to_records(data: StateData, state_code: &str) -> Vec<FairMarketRent> {
        let fiscal_year = data.year.trim().parse().unwrap_or_default();
        let state_code = non_empty(Some(state_code.to_uppercase()));

        let metros = data.metroareas.into_iter().map(|area| (area, true));
        let counties = data.counties.into_iter().map(|area| (area, false));

        metros
            .chain(counties)
            .filter(|(area, _)| !area.code.is_empty())
            .map(|(area, is_metro)| FairMarketRent {
                entity_code: area.code,
                zip_code: String::new(),
                metro_name: if is_metro { non_empty(area.metro_name) } else { None },
                county_name: non_empty(area.county_name.or(area.town_name)),
                state_name: None,
                state_code: state_code.clone(),
                fiscal_year,
                efficiency: non_zero(area.efficiency),
                one_bedroom: non_zero(area.one_bedroom),
                two_bedroom: non_zero(area.two_bedroom),
                three_bedroom: non_zero(area.three_bedroom),
                four_bedroom: non_zero(area.four_bedroom),
                small_area_status: None,
            })
            .collect()
    }
}

#[async_trait]
impl RentSource for HudClient {
    async fn fetch_state(
        &self,
        state_code: &str,
        cancel: &CancellationToken,
    ) -> FetchResult<Vec<FairMarketRent>> {
        let url = format!("{}/fmr/statedata/{}", self.base_url, state_code);
        debug!(url = %url, "Fetching HUD state FMR data");

        let request = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "application/json");

        let response = send(request, cancel).await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let body: StateDataResponse = response
            .json()
            .await
            .map_err(|e| FetchError::transient(format!("failed to parse response: {}", e)))?;

        Ok(Self::to_records(body.data, state_code))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn non_zero(value: i32) -> Option<i32> {
    (value != 0).then_some(value)
}
