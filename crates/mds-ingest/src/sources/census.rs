//! Census Bureau ACS 5-year API client

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{parse_number, send, status_error, DemographicsSource, FetchError, FetchResult};
use crate::models::CensusDemographic;
use crate::sync::work_items::WorkItem;

pub const DEFAULT_BASE_URL: &str = "https://api.census.gov/data";

/// Texas state FIPS code
pub const STATE_FIPS: &str = "48";

// The ACS API can be slow
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const TOTAL_POPULATION: &str = "B01001_001E";
const MEDIAN_AGE: &str = "B01002_001E";
const MEDIAN_HOUSEHOLD_INCOME: &str = "B19013_001E";
const PER_CAPITA_INCOME: &str = "B19301_001E";
const POVERTY_COUNT: &str = "B17001_002E";
const TOTAL_HOUSING_UNITS: &str = "B25001_001E";
const OCCUPIED_HOUSING_UNITS: &str = "B25002_002E";
const VACANT_HOUSING_UNITS: &str = "B25002_003E";
const OWNER_OCCUPIED: &str = "B25003_002E";
const RENTER_OCCUPIED: &str = "B25003_003E";
const MEDIAN_HOME_VALUE: &str = "B25077_001E";
const MEDIAN_GROSS_RENT: &str = "B25064_001E";
const MOBILE_HOMES: &str = "B25024_010E";
const EDUCATION_TOTAL: &str = "B15003_001E";
const HIGH_SCHOOL_GRADS: &str = "B15003_017E";
const BACHELORS_DEGREE: &str = "B15003_022E";

/// Variables requested for every county
pub const ACS_VARIABLES: &[&str] = &[
    TOTAL_POPULATION,
    MEDIAN_AGE,
    MEDIAN_HOUSEHOLD_INCOME,
    PER_CAPITA_INCOME,
    POVERTY_COUNT,
    TOTAL_HOUSING_UNITS,
    OCCUPIED_HOUSING_UNITS,
    VACANT_HOUSING_UNITS,
    OWNER_OCCUPIED,
    RENTER_OCCUPIED,
    MEDIAN_HOME_VALUE,
    MEDIAN_GROSS_RENT,
    MOBILE_HOMES,
    EDUCATION_TOTAL,
    HIGH_SCHOOL_GRADS,
    BACHELORS_DEGREE,
];

/// Client for `/{year}/acs/acs5`
#[derive(Debug, Clone)]
pub struct CensusClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl CensusClient {
    pub fn new(api_key: Option<String>) -> FetchResult<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: Option<String>, base_url: impl Into<String>) -> FetchResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FetchError::transient(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }
}

#[async_trait]
impl DemographicsSource for CensusClient {
    async fn fetch_county(
        &self,
        county: &WorkItem,
        year: i32,
        cancel: &CancellationToken,
    ) -> FetchResult<CensusDemographic> {
        let url = format!("{}/{}/acs/acs5", self.base_url, year);
        let get = format!("NAME,{}", ACS_VARIABLES.join(","));
        let for_county = format!("county:{}", county.key);

        let mut query = vec![
            ("get", get.as_str()),
            ("for", for_county.as_str()),
            ("in", "state:48"),
        ];
        if let Some(key) = self.api_key.as_deref() {
            query.push(("key", key));
        }

        debug!(county = %county.name, fips = %county.key, year, "Fetching ACS demographics");

        let response = send(self.http.get(&url).query(&query), cancel).await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let rows: Vec<Vec<Option<String>>> = response
            .json()
            .await
            .map_err(|e| FetchError::transient(format!("failed to parse response: {}", e)))?;

        parse_rows(&rows, &county.key, year)
    }
}

/// Convert the header row plus first data row into a record
fn parse_rows(
    rows: &[Vec<Option<String>>],
    county_fips: &str,
    year: i32,
) -> FetchResult<CensusDemographic> {
    let (Some(headers), Some(data)) = (rows.first(), rows.get(1)) else {
        return Err(FetchError::transient(format!(
            "no data returned for county {}",
            county_fips
        )));
    };

    let values: HashMap<&str, &str> = headers
        .iter()
        .zip(data.iter())
        .filter_map(|(h, v)| Some((h.as_deref()?, v.as_deref().unwrap_or(""))))
        .collect();

    let int = |var: &str| values.get(var).and_then(|v| parse_number::<i32>(v));
    let float = |var: &str| values.get(var).and_then(|v| parse_number::<f64>(v));

    let total_population = int(TOTAL_POPULATION);
    let total_units = int(TOTAL_HOUSING_UNITS);
    let occupied = int(OCCUPIED_HOUSING_UNITS);
    let education_total = int(EDUCATION_TOTAL);
    let mobile_homes = int(MOBILE_HOMES);

    Ok(CensusDemographic {
        geo_id: format!("{}{}", STATE_FIPS, county_fips),
        geo_type: "county".to_string(),
        geo_name: values.get("NAME").copied().unwrap_or_default().to_string(),
        state_code: Some(STATE_FIPS.to_string()),
        county_code: Some(county_fips.to_string()),
        survey_year: year,
        total_population,
        population_growth_rate: None,
        median_age: float(MEDIAN_AGE),
        median_household_income: int(MEDIAN_HOUSEHOLD_INCOME),
        per_capita_income: int(PER_CAPITA_INCOME),
        poverty_rate: percent(int(POVERTY_COUNT), total_population),
        total_housing_units: total_units,
        occupied_housing_units: occupied,
        vacancy_rate: percent(int(VACANT_HOUSING_UNITS), total_units),
        owner_occupied_rate: percent(int(OWNER_OCCUPIED), occupied),
        renter_occupied_rate: percent(int(RENTER_OCCUPIED), occupied),
        median_home_value: int(MEDIAN_HOME_VALUE),
        median_gross_rent: int(MEDIAN_GROSS_RENT),
        mobile_homes_count: mobile_homes,
        mobile_homes_percent: percent(mobile_homes, total_units),
        high_school_grad_rate: percent(int(HIGH_SCHOOL_GRADS), education_total),
        bachelors_degree_rate: percent(int(BACHELORS_DEGREE), education_total),
    })
}

fn percent(part: Option<i32>, whole: Option<i32>) -> Option<f64> {
    match (part, whole) {
        (Some(part), Some(whole)) if whole > 0 => Some(f64::from(part) / f64::from(whole) * 100.0),
        _ => None,
    }
}
