use async_trait::async_trait;
use std::{fmt::Debug, time::Duration};
use thiserror::Error;

use crate::{
    config::FetchConfig,
    error::PipelineError,
    model::{City, RawObservation},
};

pub mod openweather;

pub use openweather::OpenWeatherSource;

/// Failure reported by a source for a single call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// Readiness probe did not get a success response.
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// Network error, non-success status or an unreadable body.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Body was received but does not have the expected shape.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Upstream that serves current observations per city.
#[async_trait]
pub trait ObservationSource: Send + Sync + Debug {
    /// Check that the source is currently serving `city`.
    async fn probe(&self, city: &City) -> Result<(), SourceError>;

    /// Retrieve and parse the current observation for `city`.
    async fn fetch(&self, city: &City) -> Result<RawObservation, SourceError>;
}

/// Bounded retry policy for the readiness + fetch unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl From<FetchConfig> for RetryPolicy {
    fn from(cfg: FetchConfig) -> Self {
        Self { max_attempts: cfg.max_attempts, delay: cfg.retry_delay() }
    }
}

/// Gate then fetch one city, retrying the pair until the budget runs out.
///
/// At least one attempt is made even when `max_attempts` is zero.
/// A malformed payload ends the loop immediately with `SchemaMismatch`.
/// Exhausting the budget on the gate yields `SourceUnavailable`, on the
/// fetch `FetchFailed`.
pub async fn fetch_city(
    source: &dyn ObservationSource,
    city: &City,
    retry: RetryPolicy,
) -> Result<RawObservation, PipelineError> {
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let failure = match source.probe(city).await {
            Err(err) => err,
            Ok(()) => match source.fetch(city).await {
                Ok(raw) => {
                    tracing::debug!(city = %city, attempt, "observation fetched");
                    return Ok(raw);
                }
                Err(err) => err,
            },
        };

        let failure = match failure {
            SourceError::Malformed(reason) => {
                return Err(PipelineError::SchemaMismatch { city: city.to_string(), reason });
            }
            other => other,
        };

        if attempt >= max_attempts {
            return Err(match failure {
                SourceError::Unavailable(reason) => {
                    PipelineError::SourceUnavailable { city: city.to_string(), reason }
                }
                SourceError::Transient(reason) | SourceError::Malformed(reason) => {
                    PipelineError::FetchFailed { city: city.to_string(), attempts: attempt, reason }
                }
            });
        }

        tracing::warn!(
            city = %city,
            attempt,
            max_attempts,
            error = %failure,
            "attempt failed, retrying in {:?}",
            retry.delay
        );
        tokio::time::sleep(retry.delay).await;
    }
}
