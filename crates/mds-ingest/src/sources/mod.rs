//! Upstream provider clients
//!
//! Each provider sits behind a small async trait so the orchestrator can be
//! driven by fakes in tests. The reqwest-backed clients classify failures into
//! [`FetchError`]: a provider quota is [`FetchError::RateLimited`] and stops
//! the run, everything else is [`FetchError::Transient`] and may be retried.

pub mod bls;
pub mod census;
pub mod hud;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::models::{CensusDemographic, Employment, FairMarketRent};
use crate::sync::retry::RetryPolicy;
use crate::sync::work_items::WorkItem;

pub use bls::BlsClient;
pub use census::CensusClient;
pub use hud::HudClient;

/// Failure of a single upstream fetch
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Provider quota exhausted; no further requests will succeed
    #[error("rate limit reached: {0}")]
    RateLimited(String),

    /// Network, HTTP status, decode or empty-result failure
    #[error("{0}")]
    Transient(String),

    #[error("max retries ({retries}) exceeded: {last}")]
    RetriesExhausted { retries: u32, last: String },

    #[error("cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn transient(msg: impl Into<String>) -> Self {
        FetchError::Transient(msg.into())
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, FetchError::RateLimited(_))
    }
}

pub type FetchResult<T> = Result<T, FetchError>;

/// Fair Market Rents, fetched a whole state at a time
#[async_trait]
pub trait RentSource: Send + Sync {
    async fn fetch_state(
        &self,
        state_code: &str,
        cancel: &CancellationToken,
    ) -> FetchResult<Vec<FairMarketRent>>;
}

/// ACS demographics for one county
#[async_trait]
pub trait DemographicsSource: Send + Sync {
    async fn fetch_county(
        &self,
        county: &WorkItem,
        year: i32,
        cancel: &CancellationToken,
    ) -> FetchResult<CensusDemographic>;
}

/// LAUS monthly employment for one county
#[async_trait]
pub trait EmploymentSource: Send + Sync {
    async fn fetch_county(
        &self,
        county: &WorkItem,
        start_year: i32,
        end_year: i32,
        cancel: &CancellationToken,
    ) -> FetchResult<Vec<Employment>>;

    /// [`fetch_county`](Self::fetch_county) under `policy`
    async fn fetch_county_with_retry(
        &self,
        county: &WorkItem,
        start_year: i32,
        end_year: i32,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> FetchResult<Vec<Employment>> {
        policy
            .run(cancel, || self.fetch_county(county, start_year, end_year, cancel))
            .await
    }
}

/// Send `request`, giving up as soon as `cancel` fires
pub(crate) async fn send(
    request: reqwest::RequestBuilder,
    cancel: &CancellationToken,
) -> FetchResult<reqwest::Response> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FetchError::Cancelled),
        res = request.send() => res.map_err(|e| FetchError::transient(format!("request failed: {}", e))),
    }
}

/// Read the body of a non-success response into an error.
///
/// HTTP 429 is the provider refusing further work and maps to
/// [`FetchError::RateLimited`].
pub(crate) async fn status_error(response: reqwest::Response) -> FetchError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let body = body.trim();

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        FetchError::RateLimited(format!("API returned status {}: {}", status.as_u16(), body))
    } else {
        FetchError::transient(format!("API returned status {}: {}", status.as_u16(), body))
    }
}

/// Numeric value that providers may send as an empty string, a `null`
/// literal, or a sentinel
pub(crate) fn parse_number<T: std::str::FromStr>(raw: &str) -> Option<T> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "null" || raw == "-666666666" {
        return None;
    }
    raw.replace(',', "").parse().ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number::<i32>("1,234"), Some(1234));
        assert_eq!(parse_number::<i32>("-666666666"), None);
        assert_eq!(parse_number::<i32>("null"), None);
        assert_eq!(parse_number::<i32>(""), None);
        assert_eq!(parse_number::<i32>("n/a"), None);
        assert_eq!(parse_number::<f64>("4.5"), Some(4.5));
    }

    #[test]
    fn test_fetch_error_display() {
        let err = FetchError::RetriesExhausted {
            retries: 3,
            last: "API returned status 503: busy".to_string(),
        };
        assert_eq!(err.to_string(), "max retries (3) exceeded: API returned status 503: busy");
        assert!(FetchError::RateLimited("quota".into()).is_rate_limit());
        assert!(!FetchError::transient("timeout").is_rate_limit());
    }
}
