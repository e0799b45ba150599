//! # Upstream Source Adapters
//!
//! One adapter per upstream: water levels ([`tide`]), wind ([`wind`]),
//! precipitation ([`rain`]) and waves ([`waves`]). Each adapter has a
//! fallible `fetch` returning [`SourceError`] plus pure `parse_*` functions that
//! normalize the upstream payload into a canonical record.
//!
//! The [`Sources`] trait is the boundary the engine consumes. Its methods never
//! fail: any transport, parse, or validation error is logged and turned into
//! `None`, meaning "no data for this input".
//!
//! ## Network Configuration
//! All requests share one `reqwest::Client` built with the configured timeout,
//! so a single slow upstream cannot stall a refresh.

pub mod rain;
pub mod tide;
pub mod waves;
pub mod wind;

use crate::config::{Config, RegionConfig};
use crate::{RainSummary, WaterLevel, WaveReading, WindReading};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur while fetching or normalizing upstream data.
///
/// These never escape the [`Sources`] boundary; they exist so the logged cause
/// is specific.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Transport failure, including timeouts
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response
    #[error("upstream returned {0}")]
    Status(StatusCode),

    /// Body was not the JSON shape we expected
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Well-formed JSON with missing or invalid fields
    #[error("malformed payload: {0}")]
    Payload(String),

    /// Payload parsed but held no usable values
    #[error("no usable data in response")]
    Empty,

    /// Every candidate endpoint failed
    #[error("all {0} endpoints failed")]
    AllEndpointsFailed(usize),

    #[error("not configured: {0}")]
    NotConfigured(&'static str),
}

/// The four upstream feeds, as consumed by the engine.
///
/// `None` means the source is unavailable for this refresh.
#[async_trait]
pub trait Sources: Send + Sync {
    async fn water_levels(&self) -> Option<Vec<WaterLevel>>;
    async fn wind(&self) -> Option<WindReading>;
    async fn rain(&self) -> Option<RainSummary>;
    async fn waves(&self) -> Option<WaveReading>;

    /// Whether the wave feed can be called at all (e.g. an API key is configured)
    fn waves_enabled(&self) -> bool {
        true
    }
}

/// Live sources backed by HTTP.
pub struct HttpSources {
    client: Client,
    config: Config,
    wave_api_key: Option<String>,
}

impl HttpSources {
    pub fn new(config: Config) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.refresh.http_timeout_secs))
            .user_agent(concat!("clarity-tracker/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let wave_api_key = config.waves.resolved_api_key();
        Ok(HttpSources {
            client,
            config,
            wave_api_key,
        })
    }
}

#[async_trait]
impl Sources for HttpSources {
    async fn water_levels(&self) -> Option<Vec<WaterLevel>> {
        let url = expand_url(&self.config.tide.url, &self.config.region, Utc::now());
        available("tide", tide::fetch(&self.client, &url, self.config.tide.units).await)
    }

    async fn wind(&self) -> Option<WindReading> {
        let urls: Vec<String> = self
            .config
            .wind
            .endpoints
            .iter()
            .map(|template| expand_url(template, &self.config.region, Utc::now()))
            .collect();
        available("wind", wind::fetch(&self.client, &urls).await)
    }

    async fn rain(&self) -> Option<RainSummary> {
        let now = Utc::now();
        let url = expand_url(&self.config.rain.url, &self.config.region, now);
        available("rain", rain::fetch(&self.client, &url, now).await)
    }

    async fn waves(&self) -> Option<WaveReading> {
        let now = Utc::now();
        let url = expand_url(&self.config.waves.url, &self.config.region, now);
        let result = match self.wave_api_key.as_deref() {
            Some(key) => waves::fetch(&self.client, &url, key, now).await,
            None => Err(SourceError::NotConfigured("wave API key")),
        };
        available("waves", result)
    }

    fn waves_enabled(&self) -> bool {
        self.wave_api_key.is_some()
    }
}

/// Turn an adapter result into `Option`, logging the cause of a failure.
fn available<T>(source: &'static str, result: Result<T, SourceError>) -> Option<T> {
    match result {
        Ok(record) => {
            debug!(source, "source fetched");
            Some(record)
        }
        Err(error) => {
            warn!(source, %error, "source unavailable");
            None
        }
    }
}

/// Fill `{lat}`, `{lon}` and `{begin}` placeholders in a URL template.
///
/// `{begin}` becomes two hours before `now` in NOAA's `yyyyMMdd HH:mm` form, so
/// a tide request also covers the first hours of the forecast table.
pub fn expand_url(template: &str, region: &RegionConfig, now: DateTime<Utc>) -> String {
    let begin = (now - Duration::hours(2)).format("%Y%m%d%%20%H:%M").to_string();
    template
        .replace("{lat}", &format!("{:.4}", region.latitude))
        .replace("{lon}", &format!("{:.4}", region.longitude))
        .replace("{begin}", &begin)
}

/// Value of a query parameter, if present.
pub(crate) fn query_param<'a>(url: &'a str, name: &str) -> Option<&'a str> {
    let query = url.split_once('?')?.1;
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then_some(value)
    })
}

/// GET a URL and return the body of a successful response.
pub(crate) async fn get_text(
    client: &Client,
    url: &str,
    auth: Option<&str>,
) -> Result<String, SourceError> {
    let mut request = client.get(url).header(ACCEPT, "application/json");
    if let Some(key) = auth {
        request = request.header(AUTHORIZATION, key);
    }
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(SourceError::Status(status));
    }
    Ok(response.text().await?)
}
