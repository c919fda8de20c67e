use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use std::time::Duration;

use crate::model::{City, RawObservation};

use super::{ObservationSource, SourceError};

const WEATHER_PATH: &str = "/data/2.5/weather";

/// OpenWeather current-weather endpoint, shared by the readiness probe and
/// the fetch.
#[derive(Debug, Clone)]
pub struct OpenWeatherSource {
    api_key: String,
    base_url: String,
    http: Client,
}

impl OpenWeatherSource {
    pub fn new(api_key: String, base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for OpenWeather")?;

        Ok(Self { api_key, base_url: base_url.trim_end_matches('/').to_string(), http })
    }

    fn endpoint(&self) -> String {
        format!("{}{WEATHER_PATH}", self.base_url)
    }

    async fn get(&self, city: &City) -> reqwest::Result<Response> {
        self.http
            .get(self.endpoint())
            .query(&[("q", city.name()), ("APPID", self.api_key.as_str())])
            .send()
            .await
    }
}

#[async_trait]
impl ObservationSource for OpenWeatherSource {
    async fn probe(&self, city: &City) -> Result<(), SourceError> {
        let res = self
            .get(city)
            .await
            .map_err(|e| SourceError::Unavailable(format!("request failed: {e}")))?;

        let status = res.status();
        if !status.is_success() {
            return Err(SourceError::Unavailable(format!("status {status}")));
        }

        Ok(())
    }

    async fn fetch(&self, city: &City) -> Result<RawObservation, SourceError> {
        let res = self
            .get(city)
            .await
            .map_err(|e| SourceError::Transient(format!("request failed: {e}")))?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| SourceError::Transient(format!("failed to read body: {e}")))?;

        tracing::debug!(city = %city, %status, body = %truncate_body(&body), "OpenWeather response");

        if !status.is_success() {
            return Err(SourceError::Transient(format!(
                "status {status}: {}",
                truncate_body(&body)
            )));
        }

        parse_observation(&body)
    }
}

/// Unparseable JSON is transient; JSON of the wrong shape is malformed.
pub(crate) fn parse_observation(body: &str) -> Result<RawObservation, SourceError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| SourceError::Transient(format!("body is not JSON: {e}")))?;

    serde_json::from_value(value).map_err(|e| SourceError::Malformed(e.to_string()))
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
