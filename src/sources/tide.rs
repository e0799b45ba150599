//! # Water Levels and Tide Flow
//!
//! Fetches water-level predictions from NOAA CO-OPS and derives the hourly
//! tide-flow series used by the scoring engine.
//!
//! ## Data Source
//! - **Endpoint**: CO-OPS `datagetter`, `product=predictions` (or `water_level`)
//! - **Format**: `{"predictions": [{"t": "2025-07-24 13:00", "v": "1.234"}]}`;
//!   observed products use a `data` array with the same row shape
//! - **Units**: declared in config, otherwise inferred from the `units=` query
//!   parameter (`english` → feet, anything else → meters)
//!
//! ## Flow Derivation
//! Flow at hour `h` is the unsigned level change per hour across `h ± 30 min`,
//! using linear interpolation between samples. Near the series edges the
//! window shrinks to whatever data exists.

use super::{get_text, query_param, SourceError};
use crate::config::LevelUnits;
use crate::units::{feet_to_meters, truncate_to_hour};
use crate::{TideFlowSeries, WaterLevel};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct CoopsResponse {
    #[serde(default)]
    predictions: Vec<CoopsRow>,
    #[serde(default)]
    data: Vec<CoopsRow>,
    error: Option<CoopsError>,
}

#[derive(Debug, Deserialize)]
struct CoopsRow {
    t: String,
    v: String,
}

#[derive(Debug, Deserialize)]
struct CoopsError {
    message: String,
}

/// Fetch and normalize a water-level series from `url`.
///
/// Accepts both the CO-OPS `predictions` and `data` (observed) payloads.
/// Levels come back in metres, sorted by timestamp.
///
/// # Arguments
/// * `declared` - units from the config; inferred from the URL when `None`
///
/// # Error Handling
/// Transport and parse failures are returned as [`SourceError`]; a CO-OPS
/// `error` object becomes [`SourceError::Payload`] with the upstream message.
/// The caller turns any of them into an unavailable tide.
pub async fn fetch(
    client: &Client,
    url: &str,
    declared: Option<LevelUnits>,
) -> Result<Vec<WaterLevel>, SourceError> {
    let body = get_text(client, url, None).await?;
    let units = declared.unwrap_or_else(|| infer_units(url));
    parse_levels(&body, units)
}

/// Units implied by a CO-OPS request URL.
pub fn infer_units(url: &str) -> LevelUnits {
    match query_param(url, "units") {
        Some("english") => LevelUnits::Feet,
        _ => LevelUnits::Meters,
    }
}

/// Parse a CO-OPS response into a chronologically sorted series in meters.
///
/// Rows with blank or non-numeric values are skipped (CO-OPS leaves `v` empty
/// for gaps). A response with no usable rows is an error.
pub fn parse_levels(body: &str, units: LevelUnits) -> Result<Vec<WaterLevel>, SourceError> {
    let response: CoopsResponse = serde_json::from_str(body)?;
    if let Some(error) = response.error {
        return Err(SourceError::Payload(error.message));
    }

    let rows = if response.predictions.is_empty() {
        response.data
    } else {
        response.predictions
    };

    let mut levels = Vec::with_capacity(rows.len());
    for row in rows {
        let timestamp = NaiveDateTime::parse_from_str(row.t.trim(), "%Y-%m-%d %H:%M")
            .map_err(|_| SourceError::Payload(format!("bad timestamp `{}`", row.t)))?
            .and_utc();
        let Ok(value) = row.v.trim().parse::<f64>() else {
            continue;
        };
        if !value.is_finite() {
            continue;
        }
        let level_m = match units {
            LevelUnits::Feet => feet_to_meters(value),
            LevelUnits::Meters => value,
        };
        levels.push(WaterLevel { timestamp, level_m });
    }

    if levels.is_empty() {
        return Err(SourceError::Empty);
    }
    levels.sort_by_key(|level| level.timestamp);
    levels.dedup_by_key(|level| level.timestamp);
    Ok(levels)
}

/// Linear interpolation of the level at `ts`; `None` outside the series.
fn level_at(levels: &[WaterLevel], ts: DateTime<Utc>) -> Option<f64> {
    if let [only] = levels {
        return (only.timestamp == ts).then_some(only.level_m);
    }
    let (p0, p1) = levels
        .windows(2)
        .find(|w| w[0].timestamp <= ts && ts <= w[1].timestamp)
        .map(|w| (&w[0], &w[1]))?;

    let span = (p1.timestamp - p0.timestamp).num_seconds() as f64;
    if span <= 0.0 {
        return Some(p0.level_m);
    }
    let alpha = (ts - p0.timestamp).num_seconds() as f64 / span;
    Some(p0.level_m + alpha * (p1.level_m - p0.level_m))
}

/// Derive the hourly tide-flow series from a sorted water-level series.
///
/// Always rebuilt from scratch; an empty or single-sample series yields an
/// empty map (every hour then scores with zero flow).
pub fn flow_series(levels: &[WaterLevel]) -> TideFlowSeries {
    let mut series = TideFlowSeries::new();
    let (Some(first), Some(last)) = (levels.first(), levels.last()) else {
        return series;
    };
    if levels.len() < 2 {
        return series;
    }

    let half = Duration::minutes(30);
    let mut hour = truncate_to_hour(first.timestamp);
    if hour < first.timestamp {
        hour += Duration::hours(1);
    }

    while hour <= last.timestamp {
        let a = (hour - half).max(first.timestamp);
        let b = (hour + half).min(last.timestamp);
        let hours = (b - a).num_seconds() as f64 / 3600.0;
        if hours > 0.0 {
            if let (Some(la), Some(lb)) = (level_at(levels, a), level_at(levels, b)) {
                series.insert(hour, ((lb - la) / hours).abs());
            }
        }
        hour += Duration::hours(1);
    }
    series
}
