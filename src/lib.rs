//! # Clarity Tracker Core Library
//!
//! This library estimates underwater visibility ("clarity") at a fixed set of
//! coastal dive sites. Four environmental signals are combined into a single
//! 0–100 score per site and per forecast hour:
//!
//! - **Tide flow**: rate of water-level change, the only signal with genuine
//!   hour-by-hour predictive data
//! - **Wind**: chop above a threshold, plus the component blowing toward shore
//! - **Rain**: 72-hour accumulated precipitation (runoff turbidity)
//! - **Waves**: swell height and period, discounted for sheltered sites
//!
//! ## Data Flow
//! 1. **Fetch**: the [`engine::Engine`] runs every source adapter concurrently.
//!    Metered sources (waves, rain) go through a [`gate::RateGate`].
//! 2. **Snapshot**: results land in one shared [`EnvironmentalSnapshot`]; any
//!    field may be `None` when its source is unavailable.
//! 3. **Score**: [`forecast::build_table`] calls [`scoring::score`] once per site
//!    per hour, producing the forecast table.
//! 4. **Query**: callers read the table, the current point, or ranked
//!    best-time windows.
//!
//! ## Core Types
//! - [`Site`]: one entry of the static site registry
//! - [`EnvironmentalSnapshot`]: latest known values for every source
//! - [`ForecastPoint`]: score and component breakdown for one site-hour

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// Module declarations
pub mod config;
pub mod engine;
pub mod forecast;
pub mod gate;
pub mod renderer;
pub mod scheduler;
pub mod scoring;
pub mod sites;
pub mod sources;
pub mod units;

/// A dive site from the static registry.
///
/// Sites are never mutated at runtime. The shoreline bearing is the compass
/// direction pointing from open water toward shore, so wind coming *from*
/// that bearing blows straight onshore.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Site {
    /// Stable identifier used by every query
    pub id: &'static str,
    /// Human-readable name
    pub name: &'static str,
    /// WGS84 latitude
    pub latitude: f64,
    /// WGS84 longitude
    pub longitude: f64,
    /// Direction from open water toward shore, degrees (0–360)
    pub shoreline_bearing: f64,
    /// Open-water swell exposure (0 = fully sheltered, 1 = fully exposed)
    pub exposure: f64,
}

/// One water-level observation or prediction, in meters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WaterLevel {
    pub timestamp: DateTime<Utc>,
    pub level_m: f64,
}

/// Latest wind observation, normalized to knots.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WindReading {
    /// Direction the wind blows *from*, degrees (0–360)
    pub direction_deg: f64,
    /// Speed in knots
    pub speed_kt: f64,
}

/// Accumulated precipitation over the last 72 hours.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RainSummary {
    pub total_mm_72h: f64,
    /// Number of hourly values that contributed to the total
    pub hours_counted: usize,
}

/// Latest wave observation for the region.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WaveReading {
    pub height_m: f64,
    pub period_s: f64,
    pub observed_at: DateTime<Utc>,
}

/// Latest known values from every source, shared by all sites.
///
/// Each field is independently `None` when its source was unavailable on the
/// last refresh. Only the engine's refresh sequence writes to it.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct EnvironmentalSnapshot {
    pub water_levels: Option<Vec<WaterLevel>>,
    pub wind: Option<WindReading>,
    pub rain: Option<RainSummary>,
    pub waves: Option<WaveReading>,
    /// When the last refresh completed
    pub updated_at: Option<DateTime<Utc>>,
}

/// Unweighted penalty magnitudes for one site-hour. All values are >= 0.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ScoreComponents {
    pub wind: f64,
    pub onshore: f64,
    pub tide_flow: f64,
    pub rain: f64,
    pub swell: f64,
}

/// Score and breakdown for one site at one hour.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ForecastPoint {
    /// Always truncated to the hour
    pub timestamp: DateTime<Utc>,
    /// Clarity score in [0, 100]
    pub score: f64,
    pub components: ScoreComponents,
}

/// Hour-aligned timestamp → unsigned water-level rate of change (m/h).
pub type TideFlowSeries = BTreeMap<DateTime<Utc>, f64>;

/// Per-site forecast rows keyed by hour.
pub type SiteForecast = BTreeMap<DateTime<Utc>, ForecastPoint>;

/// Site id → hour → forecast point.
pub type ForecastTable = BTreeMap<String, SiteForecast>;
