use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use slog::{debug, info, Logger};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use weather_etl_core::{publish_file, staging_path};

use crate::{EtlError, Location};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_ERROR_BODY: usize = 200;

/// Anything that can hand back a raw current-weather document for a location.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn fetch_current(&self, location: &Location) -> Result<String, EtlError>;
}

pub struct OpenWeatherClient {
    logger: Logger,
    http: Client,
    base_url: String,
    api_key: String,
}

impl OpenWeatherClient {
    pub fn new(
        logger: Logger,
        base_url: String,
        api_key: String,
        user_agent: &str,
    ) -> Result<Self, EtlError> {
        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EtlError::Configuration(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            logger,
            http,
            base_url,
            api_key,
        })
    }

    fn current_weather_url(&self) -> String {
        format!("{}/data/2.5/weather", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl WeatherSource for OpenWeatherClient {
    async fn fetch_current(&self, location: &Location) -> Result<String, EtlError> {
        let url = self.current_weather_url();
        let query = location.query();
        info!(self.logger, "fetching current weather for {} from {}", query, url);

        // errors are stripped of their url, it carries the api key
        let response = self
            .http
            .get(&url)
            .query(&[
                ("q", query.as_str()),
                ("appid", self.api_key.as_str()),
                ("units", "metric"),
                ("lang", "en"),
            ])
            .send()
            .await
            .map_err(|e| EtlError::Fetch(format!("error sending request: {}", e.without_url())))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EtlError::Fetch(format!("error reading response body: {}", e.without_url())))?;

        if !status.is_success() {
            return Err(EtlError::Fetch(format!(
                "weather api responded with {}: {}",
                status,
                truncate_body(&body)
            )));
        }
        debug!(self.logger, "received {} bytes", body.len());
        Ok(body)
    }
}

/// Persist the raw response under `target` and return the published path.
///
/// JSON bodies are pretty printed; anything else is kept verbatim so a bad
/// response can still be inspected after the run fails.
pub fn save_raw_observation(target: &Path, body: &str) -> Result<PathBuf, EtlError> {
    let content = match serde_json::from_str::<Value>(body) {
        Ok(json) => serde_json::to_string_pretty(&json).unwrap_or_else(|_| body.to_string()),
        Err(_) => body.to_string(),
    };

    let staged = staging_path(target);
    if let Err(e) = fs::write(&staged, content) {
        let _ = fs::remove_file(&staged);
        return Err(EtlError::io(&staged, e));
    }
    publish_file(&staged, target).map_err(|e| EtlError::io(target, e))
}

fn truncate_body(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
