//! Upserts for HUD, Census and BLS rows

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashSet;
use std::hash::Hash;
use tracing::debug;
use uuid::Uuid;

use super::{MarketDataStore, PersistError};
use crate::models::{CensusDemographic, Employment, FairMarketRent};

/// Rows per INSERT; the widest row binds 24 values, well under the
/// 65535-parameter limit
const BATCH_CHUNK_SIZE: usize = 1000;

const FMR_COLUMNS: &str = "INSERT INTO hud_fair_market_rents (\
    id, entity_code, zip_code, county_name, metro_name, state_name, state_code, \
    fiscal_year, efficiency, one_bedroom, two_bedroom, three_bedroom, four_bedroom, \
    small_area_status, source_updated_at) ";

const FMR_CONFLICT: &str = " ON CONFLICT (entity_code, fiscal_year) DO UPDATE SET \
    zip_code = EXCLUDED.zip_code, \
    county_name = EXCLUDED.county_name, \
    metro_name = EXCLUDED.metro_name, \
    state_name = EXCLUDED.state_name, \
    state_code = EXCLUDED.state_code, \
    efficiency = EXCLUDED.efficiency, \
    one_bedroom = EXCLUDED.one_bedroom, \
    two_bedroom = EXCLUDED.two_bedroom, \
    three_bedroom = EXCLUDED.three_bedroom, \
    four_bedroom = EXCLUDED.four_bedroom, \
    small_area_status = EXCLUDED.small_area_status, \
    source_updated_at = EXCLUDED.source_updated_at, \
    updated_at = NOW()";

const CENSUS_COLUMNS: &str = "INSERT INTO census_demographics (\
    id, geo_id, geo_type, geo_name, state_code, county_code, survey_year, \
    total_population, population_growth_rate, median_age, \
    median_household_income, per_capita_income, poverty_rate, \
    total_housing_units, occupied_housing_units, vacancy_rate, \
    owner_occupied_rate, renter_occupied_rate, median_home_value, median_gross_rent, \
    mobile_homes_count, mobile_homes_percent, \
    high_school_grad_rate, bachelors_degree_rate, source_updated_at) ";

const CENSUS_CONFLICT: &str = " ON CONFLICT (geo_id, survey_year) DO UPDATE SET \
    geo_type = EXCLUDED.geo_type, \
    geo_name = EXCLUDED.geo_name, \
    state_code = EXCLUDED.state_code, \
    county_code = EXCLUDED.county_code, \
    total_population = EXCLUDED.total_population, \
    population_growth_rate = EXCLUDED.population_growth_rate, \
    median_age = EXCLUDED.median_age, \
    median_household_income = EXCLUDED.median_household_income, \
    per_capita_income = EXCLUDED.per_capita_income, \
    poverty_rate = EXCLUDED.poverty_rate, \
    total_housing_units = EXCLUDED.total_housing_units, \
    occupied_housing_units = EXCLUDED.occupied_housing_units, \
    vacancy_rate = EXCLUDED.vacancy_rate, \
    owner_occupied_rate = EXCLUDED.owner_occupied_rate, \
    renter_occupied_rate = EXCLUDED.renter_occupied_rate, \
    median_home_value = EXCLUDED.median_home_value, \
    median_gross_rent = EXCLUDED.median_gross_rent, \
    mobile_homes_count = EXCLUDED.mobile_homes_count, \
    mobile_homes_percent = EXCLUDED.mobile_homes_percent, \
    high_school_grad_rate = EXCLUDED.high_school_grad_rate, \
    bachelors_degree_rate = EXCLUDED.bachelors_degree_rate, \
    source_updated_at = EXCLUDED.source_updated_at, \
    updated_at = NOW()";

const BLS_COLUMNS: &str = "INSERT INTO bls_employment (\
    id, area_code, area_name, area_type, state_code, county_code, \
    year, month, period_type, labor_force, employed, unemployed, unemployment_rate, \
    is_preliminary, source_updated_at) ";

const BLS_CONFLICT: &str = " ON CONFLICT (area_code, year, month) DO UPDATE SET \
    area_name = EXCLUDED.area_name, \
    area_type = EXCLUDED.area_type, \
    state_code = EXCLUDED.state_code, \
    county_code = EXCLUDED.county_code, \
    period_type = EXCLUDED.period_type, \
    labor_force = EXCLUDED.labor_force, \
    employed = EXCLUDED.employed, \
    unemployed = EXCLUDED.unemployed, \
    unemployment_rate = EXCLUDED.unemployment_rate, \
    is_preliminary = EXCLUDED.is_preliminary, \
    source_updated_at = EXCLUDED.source_updated_at, \
    updated_at = NOW()";

/// sqlx-backed [`MarketDataStore`]
#[derive(Debug, Clone)]
pub struct PgMarketDataStore {
    pool: PgPool,
}

impl PgMarketDataStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn execute_chunks<'r, R, F>(
        &self,
        rows: Vec<&'r R>,
        columns: &'static str,
        conflict: &'static str,
        push_row: F,
    ) -> Result<u64, PersistError>
    where
        F: Fn(sqlx::query_builder::Separated<'_, 'r, Postgres, &'static str>, &'r R) + Copy,
    {
        let mut affected = 0;
        for chunk in rows.chunks(BATCH_CHUNK_SIZE) {
            let mut builder: QueryBuilder<'r, Postgres> = QueryBuilder::new(columns);
            builder.push_values(chunk.iter().copied(), push_row);
            builder.push(conflict);
            affected += builder.build().execute(&self.pool).await?.rows_affected();
        }
        Ok(affected)
    }
}

/// Keep the last row for each key, preserving input order otherwise.
/// Postgres rejects an INSERT .. ON CONFLICT that touches one key twice.
fn dedup_last<'r, R, K, F>(records: &'r [R], key: F) -> Vec<&'r R>
where
    K: Eq + Hash,
    F: Fn(&'r R) -> K,
{
    let mut seen = HashSet::new();
    let mut rows: Vec<&R> = records.iter().rev().filter(|r| seen.insert(key(r))).collect();
    rows.reverse();
    rows
}

fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4())
}

fn require(value: &str, what: &str) -> Result<(), PersistError> {
    if value.trim().is_empty() {
        return Err(PersistError::Invalid(format!("{} is empty", what)));
    }
    Ok(())
}

#[async_trait]
impl MarketDataStore for PgMarketDataStore {
    async fn upsert_fair_market_rent(&self, r: &FairMarketRent) -> Result<(), PersistError> {
        require(&r.entity_code, "entity_code")?;

        let sql = format!(
            "{}VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15){}",
            FMR_COLUMNS, FMR_CONFLICT
        );
        sqlx::query(&sql)
            .bind(new_id("hfr"))
            .bind(&r.entity_code)
            .bind(&r.zip_code)
            .bind(&r.county_name)
            .bind(&r.metro_name)
            .bind(&r.state_name)
            .bind(&r.state_code)
            .bind(r.fiscal_year)
            .bind(r.efficiency)
            .bind(r.one_bedroom)
            .bind(r.two_bedroom)
            .bind(r.three_bedroom)
            .bind(r.four_bedroom)
            .bind(&r.small_area_status)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_fair_market_rents(
        &self,
        records: &[FairMarketRent],
    ) -> Result<u64, PersistError> {
        for r in records {
            require(&r.entity_code, "entity_code")?;
        }
        let rows = dedup_last(records, FairMarketRent::conflict_key);
        debug!(rows = rows.len(), "Upserting HUD FMR batch");

        let now = Utc::now();
        self.execute_chunks(rows, FMR_COLUMNS, FMR_CONFLICT, move |mut b, r: &FairMarketRent| {
            b.push_bind(new_id("hfr"))
                .push_bind(&r.entity_code)
                .push_bind(&r.zip_code)
                .push_bind(&r.county_name)
                .push_bind(&r.metro_name)
                .push_bind(&r.state_name)
                .push_bind(&r.state_code)
                .push_bind(r.fiscal_year)
                .push_bind(r.efficiency)
                .push_bind(r.one_bedroom)
                .push_bind(r.two_bedroom)
                .push_bind(r.three_bedroom)
                .push_bind(r.four_bedroom)
                .push_bind(&r.small_area_status)
                .push_bind(now);
        })
        .await
    }

    async fn upsert_census_demographic(&self, r: &CensusDemographic) -> Result<(), PersistError> {
        require(&r.geo_id, "geo_id")?;

        let sql = format!(
            "{}VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, \
             $16, $17, $18, $19, $20, $21, $22, $23, $24, $25){}",
            CENSUS_COLUMNS, CENSUS_CONFLICT
        );
        sqlx::query(&sql)
            .bind(new_id("cen"))
            .bind(&r.geo_id)
            .bind(&r.geo_type)
            .bind(&r.geo_name)
            .bind(&r.state_code)
            .bind(&r.county_code)
            .bind(r.survey_year)
            .bind(r.total_population)
            .bind(r.population_growth_rate)
            .bind(r.median_age)
            .bind(r.median_household_income)
            .bind(r.per_capita_income)
            .bind(r.poverty_rate)
            .bind(r.total_housing_units)
            .bind(r.occupied_housing_units)
            .bind(r.vacancy_rate)
            .bind(r.owner_occupied_rate)
            .bind(r.renter_occupied_rate)
            .bind(r.median_home_value)
            .bind(r.median_gross_rent)
            .bind(r.mobile_homes_count)
            .bind(r.mobile_homes_percent)
            .bind(r.high_school_grad_rate)
            .bind(r.bachelors_degree_rate)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_census_demographics(
        &self,
        records: &[CensusDemographic],
    ) -> Result<u64, PersistError> {
        for r in records {
            require(&r.geo_id, "geo_id")?;
        }
        let rows = dedup_last(records, CensusDemographic::conflict_key);
        debug!(rows = rows.len(), "Upserting Census ACS batch");

        let now = Utc::now();
        self.execute_chunks(rows, CENSUS_COLUMNS, CENSUS_CONFLICT, move |mut b, r: &CensusDemographic| {
            b.push_bind(new_id("cen"))
                .push_bind(&r.geo_id)
                .push_bind(&r.geo_type)
                .push_bind(&r.geo_name)
                .push_bind(&r.state_code)
                .push_bind(&r.county_code)
                .push_bind(r.survey_year)
                .push_bind(r.total_population)
                .push_bind(r.population_growth_rate)
                .push_bind(r.median_age)
                .push_bind(r.median_household_income)
                .push_bind(r.per_capita_income)
                .push_bind(r.poverty_rate)
                .push_bind(r.total_housing_units)
                .push_bind(r.occupied_housing_units)
                .push_bind(r.vacancy_rate)
                .push_bind(r.owner_occupied_rate)
                .push_bind(r.renter_occupied_rate)
                .push_bind(r.median_home_value)
                .push_bind(r.median_gross_rent)
                .push_bind(r.mobile_homes_count)
                .push_bind(r.mobile_homes_percent)
                .push_bind(r.high_school_grad_rate)
                .push_bind(r.bachelors_degree_rate)
                .push_bind(now);
        })
        .await
    }

    async fn upsert_employment(&self, r: &Employment) -> Result<(), PersistError> {
        require(&r.area_code, "area_code")?;

        let sql = format!(
            "{}VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15){}",
            BLS_COLUMNS, BLS_CONFLICT
        );
        sqlx::query(&sql)
            .bind(new_id("bls"))
            .bind(&r.area_code)
            .bind(&r.area_name)
            .bind(&r.area_type)
            .bind(&r.state_code)
            .bind(&r.county_code)
            .bind(r.year)
            .bind(r.month)
            .bind(&r.period_type)
            .bind(r.labor_force)
            .bind(r.employed)
            .bind(r.unemployed)
            .bind(r.unemployment_rate)
            .bind(&r.is_preliminary)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_employment_batch(&self, records: &[Employment]) -> Result<u64, PersistError> {
        if records.is_empty() {
            return Ok(0);
        }
        for r in records {
            require(&r.area_code, "area_code")?;
        }
        let rows = dedup_last(records, Employment::conflict_key);
        debug!(rows = rows.len(), "Upserting BLS LAUS batch");

        let now = Utc::now();
        self.execute_chunks(rows, BLS_COLUMNS, BLS_CONFLICT, move |mut b, r: &Employment| {
            b.push_bind(new_id("bls"))
                .push_bind(&r.area_code)
                .push_bind(&r.area_name)
                .push_bind(&r.area_type)
                .push_bind(&r.state_code)
                .push_bind(&r.county_code)
                .push_bind(r.year)
                .push_bind(r.month)
                .push_bind(&r.period_type)
                .push_bind(r.labor_force)
                .push_bind(r.employed)
                .push_bind(r.unemployed)
                .push_bind(r.unemployment_rate)
                .push_bind(&r.is_preliminary)
                .push_bind(now);
        })
        .await
    }
}
