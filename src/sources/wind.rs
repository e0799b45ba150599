//! Wind adapter: tries each configured endpoint in order and returns the first
//! well-formed reading, normalized to knots.
//!
//! Three payload shapes are accepted:
//! - flat: `{"direction": 230, "speed": 12.5, "units": "kt"}` (also `dir`/`d`, `spd`/`s`)
//! - CO-OPS: `{"data": [{"t": "...", "s": "9.72", "d": "232.00", ...}]}`, last row wins
//! - Open-Meteo: `{"current": {"wind_speed_10m": .., "wind_direction_10m": ..},
//!   "current_units": {"wind_speed_10m": "kn"}}`
//!
//! Numbers may arrive as JSON numbers or numeric strings.

use super::{get_text, query_param, SourceError};
use crate::units::{kph_to_knots, mph_to_knots, mps_to_knots, normalize_degrees};
use crate::WindReading;
use reqwest::Client;
use serde_json::{Map, Value};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpeedUnits {
    Knots,
    MetersPerSecond,
    MilesPerHour,
    KilometersPerHour,
}

impl SpeedUnits {
    /// Parse a declared unit label.
    pub fn from_label(label: &str) -> Option<SpeedUnits> {
        match label.trim().to_ascii_lowercase().as_str() {
            "kn" | "kt" | "kts" | "knots" => Some(SpeedUnits::Knots),
            "m/s" | "ms" | "mps" => Some(SpeedUnits::MetersPerSecond),
            "mph" | "mp/h" => Some(SpeedUnits::MilesPerHour),
            "km/h" | "kmh" | "kph" => Some(SpeedUnits::KilometersPerHour),
            _ => None,
        }
    }

    /// Units implied by request parameters when the payload declares none.
    /// CO-OPS `units=english` reports knots and `units=metric` m/s.
    pub fn infer_from_url(url: &str) -> SpeedUnits {
        if let Some(label) = query_param(url, "wind_speed_unit") {
            if let Some(units) = SpeedUnits::from_label(label) {
                return units;
            }
        }
        match query_param(url, "units") {
            Some("metric") => SpeedUnits::MetersPerSecond,
            _ => SpeedUnits::Knots,
        }
    }

    fn to_knots(self, speed: f64) -> f64 {
        match self {
            SpeedUnits::Knots => speed,
            SpeedUnits::MetersPerSecond => mps_to_knots(speed),
            SpeedUnits::MilesPerHour => mph_to_knots(speed),
            SpeedUnits::KilometersPerHour => kph_to_knots(speed),
        }
    }
}

/// Try each endpoint in order; the first well-formed reading wins.
///
/// Failures are logged per endpoint and never retried within one call.
///
/// # Returns
/// The reading in knots, with the direction normalized to `[0, 360)`.
///
/// # Errors
/// [`SourceError::AllEndpointsFailed`] with the number of endpoints tried.
pub async fn fetch(client: &Client, urls: &[String]) -> Result<WindReading, SourceError> {
    for url in urls {
        let attempt = match get_text(client, url, None).await {
            Ok(body) => serde_json::from_str::<Value>(&body)
                .map_err(SourceError::from)
                .and_then(|payload| parse_wind(&payload, url)),
            Err(error) => Err(error),
        };
        match attempt {
            Ok(reading) => return Ok(reading),
            Err(error) => debug!(%url, %error, "wind endpoint failed, trying next"),
        }
    }
    Err(SourceError::AllEndpointsFailed(urls.len()))
}

/// Normalize one wind payload. `url` is only used to infer undeclared units.
pub fn parse_wind(payload: &Value, url: &str) -> Result<WindReading, SourceError> {
    let current = payload.get("current").and_then(Value::as_object);
    let (fields, declared) = if let Some(current) = current {
        let declared = payload
            .pointer("/current_units/wind_speed_10m")
            .and_then(Value::as_str);
        (current, declared)
    } else if let Some(rows) = payload.get("data").and_then(Value::as_array) {
        let last = rows
            .last()
            .and_then(Value::as_object)
            .ok_or(SourceError::Empty)?;
        (last, None)
    } else if let Some(flat) = payload.as_object() {
        (flat, flat.get("units").and_then(Value::as_str))
    } else {
        return Err(SourceError::Payload("expected a JSON object".to_string()));
    };

    let direction = number(fields, &["wind_direction_10m", "direction", "dir", "d"])
        .ok_or_else(|| SourceError::Payload("missing wind direction".to_string()))?;
    let speed = number(fields, &["wind_speed_10m", "speed", "spd", "s"])
        .ok_or_else(|| SourceError::Payload("missing wind speed".to_string()))?;

    let units = match declared {
        Some(label) => SpeedUnits::from_label(label)
            .ok_or_else(|| SourceError::Payload(format!("unknown speed unit `{label}`")))?,
        None => SpeedUnits::infer_from_url(url),
    };

    if !(0.0..=360.0).contains(&direction) {
        return Err(SourceError::Payload(format!("direction {direction} out of range")));
    }
    if !speed.is_finite() || speed < 0.0 {
        return Err(SourceError::Payload(format!("invalid speed {speed}")));
    }

    Ok(WindReading {
        direction_deg: normalize_degrees(direction),
        speed_kt: units.to_knots(speed),
    })
}

/// First key present as a finite number or numeric string.
fn number(fields: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|key| match fields.get(*key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .filter(|v| v.is_finite())
}
