//! Wave adapter for the Stormglass point-weather API.
//!
//! This feed is metered (a small free daily quota), so the engine only calls it
//! through the wave [`RateGate`](crate::gate::RateGate). The adapter itself has
//! no quota awareness.
//!
//! Response shape:
//! ```json
//! {"hours": [{"time": "2025-07-24T13:00:00+00:00",
//!             "waveHeight": {"sg": 1.2, "noaa": 1.1},
//!             "wavePeriod": {"sg": 9.4}}],
//!  "meta": {"requestCount": 3, "dailyQuota": 10}}
//! ```
//! The hour closest to `now` with both values present is used. Within an hour
//! the `sg` model is preferred, then `noaa`, then any other source.

use super::{get_text, SourceError};
use crate::WaveReading;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

const PREFERRED_MODELS: [&str; 2] = ["sg", "noaa"];

#[derive(Debug, Deserialize)]
struct StormglassResponse {
    #[serde(default)]
    hours: Vec<StormglassHour>,
    meta: Option<StormglassMeta>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StormglassHour {
    time: DateTime<Utc>,
    #[serde(default)]
    wave_height: BTreeMap<String, f64>,
    #[serde(default)]
    wave_period: BTreeMap<String, f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StormglassMeta {
    request_count: Option<u32>,
    daily_quota: Option<u32>,
}

/// Fetch a Stormglass point forecast and pick the hour closest to `now`.
///
/// `api_key` is sent as the `Authorization` header. The quota figures in the
/// response `meta` are only logged; the wave gate does its own counting.
///
/// # Errors
/// [`SourceError`] for transport failures, a non-JSON body, or a response
/// with no hour carrying both a height and a period.
pub async fn fetch(
    client: &Client,
    url: &str,
    api_key: &str,
    now: DateTime<Utc>,
) -> Result<WaveReading, SourceError> {
    let body = get_text(client, url, Some(api_key)).await?;
    parse_waves(&body, now)
}

pub fn parse_waves(body: &str, now: DateTime<Utc>) -> Result<WaveReading, SourceError> {
    let response: StormglassResponse = serde_json::from_str(body)?;
    if let Some(meta) = &response.meta {
        debug!(
            request_count = ?meta.request_count,
            daily_quota = ?meta.daily_quota,
            "stormglass quota"
        );
    }

    response
        .hours
        .iter()
        .filter_map(|hour| {
            let height_m = pick(&hour.wave_height)?;
            let period_s = pick(&hour.wave_period)?;
            Some(WaveReading {
                height_m,
                period_s,
                observed_at: hour.time,
            })
        })
        .filter(|reading| reading.height_m >= 0.0 && reading.period_s >= 0.0)
        .min_by_key(|reading| (reading.observed_at - now).num_seconds().abs())
        .ok_or(SourceError::Empty)
}

/// Preferred model value, falling back to any finite value.
fn pick(values: &BTreeMap<String, f64>) -> Option<f64> {
    PREFERRED_MODELS
        .iter()
        .find_map(|model| values.get(*model).copied())
        .or_else(|| values.values().next().copied())
        .filter(|v| v.is_finite())
}
