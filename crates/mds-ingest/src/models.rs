//! Market data records and sync source identifiers

use serde::{Deserialize, Serialize};

/// One of the three upstream providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncSource {
    Hud,
    Census,
    Bls,
}

impl SyncSource {
    /// Ordering used by a full sync
    pub const ALL: [SyncSource; 3] = [SyncSource::Hud, SyncSource::Census, SyncSource::Bls];

    /// Identifier stored in `sync_checkpoints.source`
    pub fn as_str(self) -> &'static str {
        match self {
            SyncSource::Hud => "hud",
            SyncSource::Census => "census",
            SyncSource::Bls => "bls",
        }
    }

    /// Human readable name used in summaries
    pub fn display_name(self) -> &'static str {
        match self {
            SyncSource::Hud => "HUD FMR",
            SyncSource::Census => "Census ACS",
            SyncSource::Bls => "BLS LAUS",
        }
    }
}

impl std::fmt::Display for SyncSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

impl std::str::FromStr for SyncSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hud" => Ok(SyncSource::Hud),
            "census" => Ok(SyncSource::Census),
            "bls" => Ok(SyncSource::Bls),
            _ => Err(anyhow::anyhow!("Invalid sync source: {}", s)),
        }
    }
}

/// HUD Fair Market Rent for a metro area or non-metro county
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FairMarketRent {
    /// e.g. "METRO10180M10180", "COUNTY48001"
    pub entity_code: String,
    /// Empty for entity-level rows
    pub zip_code: String,
    pub county_name: Option<String>,
    pub metro_name: Option<String>,
    pub state_name: Option<String>,
    pub state_code: Option<String>,
    pub fiscal_year: i32,
    pub efficiency: Option<i32>,
    pub one_bedroom: Option<i32>,
    pub two_bedroom: Option<i32>,
    pub three_bedroom: Option<i32>,
    pub four_bedroom: Option<i32>,
    pub small_area_status: Option<String>,
}

impl FairMarketRent {
    /// Metro name, then county name, then the entity code
    pub fn display_name(&self) -> &str {
        self.metro_name
            .as_deref()
            .or(self.county_name.as_deref())
            .unwrap_or(&self.entity_code)
    }

    pub(crate) fn conflict_key(&self) -> (&str, i32) {
        (&self.entity_code, self.fiscal_year)
    }
}

/// ACS 5-year estimates for one geography
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CensusDemographic {
    /// State FIPS + county FIPS, e.g. "48029"
    pub geo_id: String,
    pub geo_type: String,
    pub geo_name: String,
    pub state_code: Option<String>,
    pub county_code: Option<String>,
    pub survey_year: i32,
    pub total_population: Option<i32>,
    pub population_growth_rate: Option<f64>,
    pub median_age: Option<f64>,
    pub median_household_income: Option<i32>,
    pub per_capita_income: Option<i32>,
    pub poverty_rate: Option<f64>,
    pub total_housing_units: Option<i32>,
    pub occupied_housing_units: Option<i32>,
    pub vacancy_rate: Option<f64>,
    pub owner_occupied_rate: Option<f64>,
    pub renter_occupied_rate: Option<f64>,
    pub median_home_value: Option<i32>,
    pub median_gross_rent: Option<i32>,
    pub mobile_homes_count: Option<i32>,
    pub mobile_homes_percent: Option<f64>,
    pub high_school_grad_rate: Option<f64>,
    pub bachelors_degree_rate: Option<f64>,
}

impl CensusDemographic {
    pub(crate) fn conflict_key(&self) -> (&str, i32) {
        (&self.geo_id, self.survey_year)
    }
}

/// LAUS monthly employment figures for one area
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Employment {
    /// First 15 characters of the LAUS series id, e.g. "LAUCN4802900000"
    pub area_code: String,
    pub area_name: String,
    pub area_type: Option<String>,
    pub state_code: Option<String>,
    pub county_code: Option<String>,
    pub year: i32,
    pub month: i32,
    pub period_type: String,
    pub labor_force: Option<i32>,
    pub employed: Option<i32>,
    pub unemployed: Option<i32>,
    pub unemployment_rate: Option<f64>,
    /// "Y" when any measure carries the preliminary footnote, else "N"
    pub is_preliminary: String,
}

impl Employment {
    pub(crate) fn conflict_key(&self) -> (&str, i32, i32) {
        (&self.area_code, self.year, self.month)
    }
}
