//! Time, angle, and unit helpers shared by the adapters and the scoring engine.

use chrono::{DateTime, Duration, DurationRound, Utc};

const FEET_PER_METER: f64 = 3.280_84;
const KNOTS_PER_MPS: f64 = 1.943_844;
const KNOTS_PER_MPH: f64 = 0.868_976;
const KNOTS_PER_KPH: f64 = 0.539_957;

/// Truncate a timestamp to the start of its hour.
pub fn truncate_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    // duration_trunc only fails for out-of-range timestamps
    ts.duration_trunc(Duration::hours(1)).unwrap_or(ts)
}

/// `count` consecutive hour-aligned timestamps starting at the hour containing `start`.
pub fn hours_from(start: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
    let first = truncate_to_hour(start);
    (0..count)
        .map(|i| first + Duration::hours(i as i64))
        .collect()
}

/// Clamp that also maps NaN to the lower bound.
pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        return min;
    }
    value.clamp(min, max)
}

/// Normalize an angle into [0, 360).
pub fn normalize_degrees(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negatives
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Smallest absolute angle between two bearings, in [0, 180].
pub fn angle_between(a: f64, b: f64) -> f64 {
    let diff = normalize_degrees(a - b);
    if diff > 180.0 {
        360.0 - diff
    } else {
        diff
    }
}

pub fn feet_to_meters(ft: f64) -> f64 {
    ft / FEET_PER_METER
}

pub fn mps_to_knots(mps: f64) -> f64 {
    mps * KNOTS_PER_MPS
}

pub fn mph_to_knots(mph: f64) -> f64 {
    mph * KNOTS_PER_MPH
}

pub fn kph_to_knots(kph: f64) -> f64 {
    kph * KNOTS_PER_KPH
}
