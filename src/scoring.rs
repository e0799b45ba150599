//! # Clarity Scoring
//!
//! Maps one site's environmental inputs to a 0–100 clarity score. Each signal
//! becomes a non-negative penalty; the weighted sum is subtracted from 100.
//!
//! | Component  | Penalty                                             |
//! |------------|-----------------------------------------------------|
//! | wind       | `0` up to 5 kt, then `(speed − 5)^1.3`              |
//! | onshore    | `max(0, speed · cos(angle to shore bearing))`       |
//! | tide flow  | `|flow| · 2` (flow in m/h)                          |
//! | rain       | `clamp(mm_72h / 3, 0, 20)`                          |
//! | swell      | `height · 10 · (1.2 if period < 7 s) · exposure`    |
//!
//! A missing source contributes zero: absence is "no evidence of a penalty".
//! Everything here is pure, so the same inputs always give the same output.

use crate::units::{angle_between, clamp};
use crate::{ScoreComponents, Site, WaveReading, WindReading};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wind speed (kt) below which chop does not stir up the bottom
const WIND_THRESHOLD_KT: f64 = 5.0;
const WIND_EXPONENT: f64 = 1.3;
const TIDE_FLOW_FACTOR: f64 = 2.0;
const RAIN_MM_PER_POINT: f64 = 3.0;
const RAIN_CAP: f64 = 20.0;
const SWELL_FACTOR: f64 = 10.0;
/// Wind-sea (short period) stirs more sediment than groundswell
const SHORT_PERIOD_S: f64 = 7.0;
const SHORT_PERIOD_MULTIPLIER: f64 = 1.2;

/// Per-component multipliers applied before summing penalties.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Weights {
    pub wind: f64,
    pub onshore: f64,
    pub tide_flow: f64,
    pub rain: f64,
    pub swell: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Weights {
            wind: 1.0,
            onshore: 0.5,
            tide_flow: 4.0,
            rain: 1.0,
            swell: 1.0,
        }
    }
}

/// Partial weight update; `None` leaves the current value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightsPatch {
    pub wind: Option<f64>,
    pub onshore: Option<f64>,
    pub tide_flow: Option<f64>,
    pub rain: Option<f64>,
    pub swell: Option<f64>,
}

impl From<Weights> for WeightsPatch {
    fn from(weights: Weights) -> Self {
        WeightsPatch {
            wind: Some(weights.wind),
            onshore: Some(weights.onshore),
            tide_flow: Some(weights.tide_flow),
            rain: Some(weights.rain),
            swell: Some(weights.swell),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("weight `{name}` must be a finite non-negative number, got {value}")]
pub struct InvalidWeight {
    pub name: &'static str,
    pub value: f64,
}

impl Weights {
    /// Merge a patch, rejecting the whole update if any value is invalid.
    pub fn apply(&self, patch: &WeightsPatch) -> Result<Weights, InvalidWeight> {
        fn pick(name: &'static str, current: f64, new: Option<f64>) -> Result<f64, InvalidWeight> {
            match new {
                Some(value) if !value.is_finite() || value < 0.0 => {
                    Err(InvalidWeight { name, value })
                }
                Some(value) => Ok(value),
                None => Ok(current),
            }
        }

        Ok(Weights {
            wind: pick("wind", self.wind, patch.wind)?,
            onshore: pick("onshore", self.onshore, patch.onshore)?,
            tide_flow: pick("tide_flow", self.tide_flow, patch.tide_flow)?,
            rain: pick("rain", self.rain, patch.rain)?,
            swell: pick("swell", self.swell, patch.swell)?,
        })
    }

    /// Check a complete set of weights, such as one read from a config file.
    ///
    /// # Errors
    /// The first weight that is negative or not finite.
    pub fn validate(self) -> Result<Weights, InvalidWeight> {
        Weights::default().apply(&WeightsPatch::from(self))
    }

    fn weigh(&self, c: &ScoreComponents) -> f64 {
        self.wind * c.wind
            + self.onshore * c.onshore
            + self.tide_flow * c.tide_flow
            + self.rain * c.rain
            + self.swell * c.swell
    }
}

/// Non-finite or negative values are treated as "no reading".
fn usable(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

pub fn wind_penalty(speed_kt: f64) -> f64 {
    let speed = usable(speed_kt);
    if speed <= WIND_THRESHOLD_KT {
        0.0
    } else {
        (speed - WIND_THRESHOLD_KT).powf(WIND_EXPONENT)
    }
}

/// Portion of the wind blowing toward shore. Offshore wind gives 0, never a bonus.
pub fn onshore_component(direction_from_deg: f64, speed_kt: f64, shore_bearing_deg: f64) -> f64 {
    if !direction_from_deg.is_finite() || !shore_bearing_deg.is_finite() {
        return 0.0;
    }
    let offset = angle_between(direction_from_deg, shore_bearing_deg).to_radians();
    (usable(speed_kt) * offset.cos()).max(0.0)
}

pub fn tide_flow_penalty(flow_m_per_h: f64) -> f64 {
    if flow_m_per_h.is_finite() {
        flow_m_per_h.abs() * TIDE_FLOW_FACTOR
    } else {
        0.0
    }
}

pub fn rain_penalty(mm_72h: f64) -> f64 {
    clamp(usable(mm_72h) / RAIN_MM_PER_POINT, 0.0, RAIN_CAP)
}

/// Unscaled swell penalty; callers multiply by site exposure.
pub fn swell_penalty(height_m: f64, period_s: f64) -> f64 {
    let multiplier = if period_s < SHORT_PERIOD_S {
        SHORT_PERIOD_MULTIPLIER
    } else {
        1.0
    };
    usable(height_m) * SWELL_FACTOR * multiplier
}

/// Score one site for one hour.
///
/// Returns the clarity score in [0, 100] and the unweighted components.
pub fn score(
    site: &Site,
    wind: Option<&WindReading>,
    tide_flow: f64,
    rain_mm_72h: f64,
    wave: Option<&WaveReading>,
    weights: &Weights,
) -> (f64, ScoreComponents) {
    let components = ScoreComponents {
        wind: wind.map_or(0.0, |w| wind_penalty(w.speed_kt)),
        onshore: wind.map_or(0.0, |w| {
            onshore_component(w.direction_deg, w.speed_kt, site.shoreline_bearing)
        }),
        tide_flow: tide_flow_penalty(tide_flow),
        rain: rain_penalty(rain_mm_72h),
        swell: wave.map_or(0.0, |w| {
            swell_penalty(w.height_m, w.period_s) * clamp(site.exposure, 0.0, 1.0)
        }),
    };

    let total = weights.weigh(&components);
    (clamp(100.0 - total, 0.0, 100.0), components)
}
