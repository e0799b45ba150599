//! # Refresh Orchestrator and Query API
//!
//! [`Engine`] owns all mutable state: the environmental snapshot, the tide-flow
//! series, the weights, both rate gates and the forecast table. Routing layers
//! call its query methods and get plain data back.
//!
//! ## Refresh sequence
//! 1. Ask both gates whether rain and waves may be fetched ([`Engine::plan_refresh`])
//! 2. Call the adapters concurrently, without touching the engine
//!    ([`RefreshPlan::fetch`])
//! 3. Replace every snapshot field with its fresh result, independently
//! 4. Regenerate the tide-flow series from the new water levels
//! 5. Mark the engine degraded if tide or wind is missing
//! 6. Rebuild the whole forecast table
//!
//! Steps 3 to 6 are [`Engine::apply_refresh`]. A caller sharing the engine
//! behind a lock holds it for steps 1 and 3 to 6 only, so queries never wait on
//! upstream I/O. [`Engine::refresh_at`] runs all three back to back.
//!
//! Rain and waves are optional: their absence never sets the degraded flag.
//!
//! Every time-dependent method has an `*_at(now)` twin so tests can drive the
//! clock.

use crate::config::Config;
use crate::forecast::{self, ScoredWindow};
use crate::gate::{Admission, GateError, GatePolicy, GateStatus, QuotaWindow, RateGate};
use crate::scoring::{InvalidWeight, Weights, WeightsPatch};
use crate::sources::tide::flow_series;
use crate::sources::Sources;
use crate::units::truncate_to_hour;
use crate::{
    EnvironmentalSnapshot, ForecastPoint, ForecastTable, RainSummary, Site, SiteForecast,
    TideFlowSeries, WaterLevel, WaveReading, WindReading,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug, PartialEq)]
pub enum EngineError {
    #[error("unknown site `{0}`")]
    UnknownSite(String),

    #[error(transparent)]
    InvalidWeight(#[from] InvalidWeight),
}

/// The two metered sources.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateKind {
    Waves,
    Rain,
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateKind::Waves => write!(f, "waves"),
            GateKind::Rain => write!(f, "rain"),
        }
    }
}

impl FromStr for GateKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waves" => Ok(GateKind::Waves),
            "rain" => Ok(GateKind::Rain),
            other => Err(format!("unknown gated source `{other}`")),
        }
    }
}

/// Engine tunables, usually derived from [`Config`].
#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub forecast_cap_hours: usize,
    pub wave_policy: GatePolicy,
    pub rain_policy: GatePolicy,
    pub weights: Weights,
}

impl EngineSettings {
    /// Derive settings from a loaded config.
    ///
    /// Config values are not trusted: invalid weights (negative or not finite)
    /// and cache durations too large for a `chrono::Duration` fall back to the
    /// defaults with a warning, the same way an unreadable config file does.
    pub fn from_config(config: &Config) -> Self {
        let defaults = Config::default();
        let wave_cache = i64::try_from(config.waves.cache_hours)
            .ok()
            .and_then(Duration::try_hours)
            .unwrap_or_else(|| {
                warn!(cache_hours = config.waves.cache_hours, "wave cache out of range");
                Duration::hours(defaults.waves.cache_hours as i64)
            });
        let rain_cache = i64::try_from(config.rain.cache_minutes)
            .ok()
            .and_then(Duration::try_minutes)
            .unwrap_or_else(|| {
                warn!(cache_minutes = config.rain.cache_minutes, "rain cache out of range");
                Duration::minutes(defaults.rain.cache_minutes as i64)
            });
        let weights = config.weights.validate().unwrap_or_else(|error| {
            warn!(%error, "invalid weights in config, using defaults");
            Weights::default()
        });

        EngineSettings {
            forecast_cap_hours: config.refresh.forecast_cap_hours,
            wave_policy: GatePolicy {
                ceiling: config.waves.daily_ceiling,
                cache_duration: wave_cache,
                window: QuotaWindow::Daily,
                enabled: true,
            },
            rain_policy: GatePolicy {
                ceiling: config.rain.per_minute_ceiling,
                cache_duration: rain_cache,
                window: QuotaWindow::PerMinute,
                enabled: true,
            },
            weights,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings::from_config(&Config::default())
    }
}

/// Health summary for status endpoints.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EngineStatus {
    /// Tide or wind was unavailable on the last refresh
    pub degraded: bool,
    pub last_refresh: Option<DateTime<Utc>>,
    pub site_count: usize,
    pub table_hours: usize,
}

/// Gated inputs the engine has admitted but not yet fetched.
///
/// Built by [`Engine::plan_refresh`], which has already counted any live
/// request against the gate quotas. Holds its own handle to the sources, so
/// it can be fetched after the engine (or the lock around it) is released.
pub struct RefreshPlan {
    now: DateTime<Utc>,
    sources: Arc<dyn Sources>,
    rain: Admission<RainSummary>,
    waves: Admission<WaveReading>,
}

/// A gated input after the fetch phase.
enum Gated<T> {
    /// Taken from the cache; nothing to record
    Served(Option<T>),
    /// Result of a live request; the gate must record it
    Fetched(Option<T>),
}

/// Adapter results waiting for [`Engine::apply_refresh`].
pub struct FetchedInputs {
    now: DateTime<Utc>,
    water_levels: Option<Vec<WaterLevel>>,
    wind: Option<WindReading>,
    rain: Gated<RainSummary>,
    waves: Gated<WaveReading>,
}

async fn resolve<T, F, Fut>(admission: Admission<T>, fetch: F) -> Gated<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    match admission {
        Admission::Serve(value) => Gated::Served(value),
        Admission::Fetch => Gated::Fetched(fetch().await),
    }
}

impl RefreshPlan {
    /// Call all four adapters concurrently.
    ///
    /// Tide and wind are always fetched. Rain and waves are fetched only if
    /// their gate admitted a live request; otherwise the cached value planned
    /// by the gate is carried through.
    pub async fn fetch(self) -> FetchedInputs {
        let sources: &dyn Sources = self.sources.as_ref();
        let (water_levels, wind, rain, waves) = tokio::join!(
            sources.water_levels(),
            sources.wind(),
            resolve(self.rain, || sources.rain()),
            resolve(self.waves, || sources.waves()),
        );
        FetchedInputs {
            now: self.now,
            water_levels,
            wind,
            rain,
            waves,
        }
    }
}

pub struct Engine {
    sites: Vec<Site>,
    sources: Arc<dyn Sources>,
    snapshot: EnvironmentalSnapshot,
    tide_flow: TideFlowSeries,
    weights: Weights,
    table: ForecastTable,
    forecast_cap_hours: usize,
    wave_gate: RateGate<WaveReading>,
    rain_gate: RateGate<RainSummary>,
    degraded: bool,
    last_refresh: Option<DateTime<Utc>>,
}

impl Engine {
    /// Build an engine with an empty table; nothing is fetched until the
    /// first refresh.
    ///
    /// The wave gate starts disabled when `sources` reports no usable wave
    /// source, so waves are never requested.
    pub fn new(sites: Vec<Site>, sources: Box<dyn Sources>, settings: EngineSettings) -> Self {
        let mut wave_gate = RateGate::new("waves", settings.wave_policy);
        if !sources.waves_enabled() {
            info!("wave source disabled, no API key configured");
            wave_gate.set_enabled(false);
        }
        Engine {
            sites,
            sources: Arc::from(sources),
            snapshot: EnvironmentalSnapshot::default(),
            tide_flow: TideFlowSeries::new(),
            weights: settings.weights,
            table: ForecastTable::new(),
            forecast_cap_hours: settings.forecast_cap_hours,
            wave_gate,
            rain_gate: RateGate::new("rain", settings.rain_policy),
            degraded: false,
            last_refresh: None,
        }
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    pub fn snapshot(&self) -> &EnvironmentalSnapshot {
        &self.snapshot
    }

    pub fn tide_flow(&self) -> &TideFlowSeries {
        &self.tide_flow
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn forecast_cap_hours(&self) -> usize {
        self.forecast_cap_hours
    }

    /// Run the full refresh sequence. Returns the degraded flag.
    pub async fn refresh(&mut self) -> bool {
        self.refresh_at(Utc::now()).await
    }

    /// Run the full refresh sequence at `now`.
    ///
    /// # Returns
    /// `true` if tide or wind was unavailable (the engine is degraded). The
    /// table is rebuilt either way, from whatever data did arrive.
    pub async fn refresh_at(&mut self, now: DateTime<Utc>) -> bool {
        let fetched = self.plan_refresh(now).fetch().await;
        self.apply_refresh(fetched)
    }

    /// First phase of a refresh: let the rain and wave gates decide whether a
    /// live request is allowed, counting it against the quota if so.
    pub fn plan_refresh(&mut self, now: DateTime<Utc>) -> RefreshPlan {
        RefreshPlan {
            now,
            sources: Arc::clone(&self.sources),
            rain: self.rain_gate.admit(now),
            waves: self.wave_gate.admit(now),
        }
    }

    /// Last phase of a refresh: record gated results, replace the snapshot,
    /// regenerate the tide-flow series and rebuild the table.
    ///
    /// # Returns
    /// The new degraded flag.
    pub fn apply_refresh(&mut self, fetched: FetchedInputs) -> bool {
        let now = fetched.now;
        let rain = match fetched.rain {
            Gated::Served(value) => value,
            Gated::Fetched(value) => self.rain_gate.record(now, value),
        };
        let waves = match fetched.waves {
            Gated::Served(value) => value,
            Gated::Fetched(value) => self.wave_gate.record(now, value),
        };
        let water_levels = fetched.water_levels;
        let wind = fetched.wind;

        self.degraded = water_levels.is_none() || wind.is_none();
        self.tide_flow = water_levels
            .as_deref()
            .map(flow_series)
            .unwrap_or_default();
        self.snapshot = EnvironmentalSnapshot {
            water_levels,
            wind,
            rain,
            waves,
            updated_at: Some(now),
        };
        self.last_refresh = Some(now);
        self.rebuild(now);

        if self.degraded {
            warn!(
                tide = self.snapshot.water_levels.is_some(),
                wind = self.snapshot.wind.is_some(),
                "refresh finished degraded"
            );
        } else {
            info!(
                rain = self.snapshot.rain.is_some(),
                waves = self.snapshot.waves.is_some(),
                flow_hours = self.tide_flow.len(),
                "refresh finished"
            );
        }
        self.degraded
    }

    /// Spend one wave request now, regardless of cache freshness.
    pub async fn force_wave_refresh(&mut self) -> Result<WaveReading, GateError> {
        self.force_wave_refresh_at(Utc::now()).await
    }

    /// Forced wave refresh at `now`: bypasses the cache but not the quota.
    ///
    /// # Returns
    /// The new reading, which replaces the snapshot's waves and rebuilds the
    /// table.
    ///
    /// # Errors
    /// Any [`GateError`] from the wave gate. The snapshot and table are left
    /// as they were.
    pub async fn force_wave_refresh_at(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<WaveReading, GateError> {
        let sources: &dyn Sources = self.sources.as_ref();
        let reading = self.wave_gate.force(now, move || sources.waves()).await?;
        info!(
            height_m = reading.height_m,
            period_s = reading.period_s,
            "forced wave refresh"
        );
        self.snapshot.waves = Some(reading);
        self.rebuild(now);
        Ok(reading)
    }

    /// Forecast for every site, `horizon_hours` rows each (capped).
    pub fn forecast_table(&self, horizon_hours: usize) -> ForecastTable {
        forecast::truncate(&self.table, horizon_hours.min(self.forecast_cap_hours))
    }

    /// The row for the current hour, if the table covers it.
    pub fn current(&self, site_id: &str) -> Result<Option<ForecastPoint>, EngineError> {
        self.current_at(site_id, Utc::now())
    }

    pub fn current_at(
        &self,
        site_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ForecastPoint>, EngineError> {
        let rows = self.site_rows(site_id)?;
        Ok(rows.and_then(|rows| rows.get(&truncate_to_hour(now)).copied()))
    }

    /// Best windows of `window_size` hours within the first `hours` rows.
    pub fn rank_windows(
        &self,
        site_id: &str,
        hours: usize,
        window_size: usize,
    ) -> Result<Vec<ScoredWindow>, EngineError> {
        let points: Vec<ForecastPoint> = self
            .site_rows(site_id)?
            .map(|rows| rows.values().take(hours).copied().collect())
            .unwrap_or_default();
        Ok(forecast::rank_windows(&points, window_size))
    }

    pub fn weights(&self) -> Weights {
        self.weights
    }

    /// Merge new weights and rebuild the table. Cached source data is kept.
    pub fn set_weights(&mut self, patch: &WeightsPatch) -> Result<Weights, EngineError> {
        self.set_weights_at(patch, Utc::now())
    }

    pub fn set_weights_at(
        &mut self,
        patch: &WeightsPatch,
        now: DateTime<Utc>,
    ) -> Result<Weights, EngineError> {
        self.weights = self.weights.apply(patch)?;
        info!(weights = ?self.weights, "weights updated");
        self.rebuild(now);
        Ok(self.weights)
    }

    pub fn gate_status(&mut self, kind: GateKind) -> GateStatus {
        self.gate_status_at(kind, Utc::now())
    }

    pub fn gate_status_at(&mut self, kind: GateKind, now: DateTime<Utc>) -> GateStatus {
        match kind {
            GateKind::Waves => self.wave_gate.status(now),
            GateKind::Rain => self.rain_gate.status(now),
        }
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            degraded: self.degraded,
            last_refresh: self.last_refresh,
            site_count: self.sites.len(),
            table_hours: self.table.values().next().map_or(0, |rows| rows.len()),
        }
    }

    /// Known site id → its rows (`None` before the first build).
    fn site_rows(&self, site_id: &str) -> Result<Option<&SiteForecast>, EngineError> {
        if !self.sites.iter().any(|site| site.id == site_id) {
            return Err(EngineError::UnknownSite(site_id.to_string()));
        }
        Ok(self.table.get(site_id))
    }

    fn rebuild(&mut self, now: DateTime<Utc>) {
        self.table = forecast::build_table(
            &self.sites,
            &self.snapshot,
            &self.tide_flow,
            &self.weights,
            now,
            self.forecast_cap_hours,
        );
    }
}
