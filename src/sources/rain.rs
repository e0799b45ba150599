//! Precipitation adapter: 72-hour accumulated rainfall from Open-Meteo's
//! hourly `precipitation` series (`past_days=3`).
//!
//! Only hours inside `(now − 72 h, now]` are summed; the request also returns
//! forecast hours, which are ignored. Null hours are skipped.

use super::{get_text, SourceError};
use crate::RainSummary;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

const WINDOW_HOURS: i64 = 72;

#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    hourly: Hourly,
}

#[derive(Debug, Deserialize)]
struct Hourly {
    time: Vec<String>,
    precipitation: Vec<Option<f64>>,
}

/// Fetch Open-Meteo hourly precipitation and sum the 72 hours before `now`.
///
/// # Returns
/// A [`RainSummary`] with the total and the number of hours that carried a
/// value. Null hours are skipped rather than counted as zero.
///
/// # Errors
/// - [`SourceError::Http`] / [`SourceError::Status`] for transport failures
/// - [`SourceError::Json`] or [`SourceError::Payload`] for an unexpected body
/// - [`SourceError::Empty`] when no hour in the window has a value
pub async fn fetch(
    client: &Client,
    url: &str,
    now: DateTime<Utc>,
) -> Result<RainSummary, SourceError> {
    let body = get_text(client, url, None).await?;
    parse_rain(&body, now)
}

pub fn parse_rain(body: &str, now: DateTime<Utc>) -> Result<RainSummary, SourceError> {
    let response: OpenMeteoResponse = serde_json::from_str(body)?;
    let hourly = response.hourly;
    if hourly.time.len() != hourly.precipitation.len() {
        return Err(SourceError::Payload(format!(
            "{} timestamps but {} precipitation values",
            hourly.time.len(),
            hourly.precipitation.len()
        )));
    }

    let since = now - Duration::hours(WINDOW_HOURS);
    let mut total_mm_72h = 0.0;
    let mut hours_counted = 0;
    for (time, value) in hourly.time.iter().zip(&hourly.precipitation) {
        let ts = NaiveDateTime::parse_from_str(time, "%Y-%m-%dT%H:%M")
            .map_err(|_| SourceError::Payload(format!("bad timestamp `{time}`")))?
            .and_utc();
        if ts <= since || ts > now {
            continue;
        }
        if let Some(mm) = value.filter(|mm| mm.is_finite() && *mm >= 0.0) {
            total_mm_72h += mm;
            hours_counted += 1;
        }
    }

    if hours_counted == 0 {
        return Err(SourceError::Empty);
    }
    Ok(RainSummary {
        total_mm_72h,
        hours_counted,
    })
}
