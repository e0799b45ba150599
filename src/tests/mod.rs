//! # Engine Scenario Tests
//!
//! End-to-end checks of the refresh sequence, the metered-source gates and the
//! query API, driven through a scripted [`StubSources`] and an injected clock.

mod engine_tests;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use clarity_lib::engine::{Engine, EngineSettings};
use clarity_lib::sites::SITE_REGISTRY;
use clarity_lib::sources::Sources;
use clarity_lib::units::truncate_to_hour;
use clarity_lib::{RainSummary, WaterLevel, WaveReading, WindReading};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Upstream call counters.
#[derive(Default)]
pub struct Calls {
    pub water_levels: AtomicUsize,
    pub wind: AtomicUsize,
    pub rain: AtomicUsize,
    pub waves: AtomicUsize,
}

/// Scripted upstream values. Tests may swap them between refreshes.
pub struct Stub {
    pub water_levels: Mutex<Option<Vec<WaterLevel>>>,
    pub wind: Mutex<Option<WindReading>>,
    pub rain: Mutex<Option<RainSummary>>,
    pub waves: Mutex<Option<WaveReading>>,
    /// Added to the wave height on every call, so forced refreshes are visible
    pub wave_step_m: f64,
    pub waves_enabled: bool,
    pub calls: Calls,
}

impl Default for Stub {
    fn default() -> Self {
        Stub {
            water_levels: Mutex::new(None),
            wind: Mutex::new(None),
            rain: Mutex::new(None),
            waves: Mutex::new(None),
            wave_step_m: 0.0,
            waves_enabled: true,
            calls: Calls::default(),
        }
    }
}

#[derive(Clone)]
pub struct StubSources(pub Arc<Stub>);

impl StubSources {
    pub fn new(stub: Stub) -> Self {
        StubSources(Arc::new(stub))
    }

    pub fn set_wind(&self, wind: Option<WindReading>) {
        *self.0.wind.lock().unwrap() = wind;
    }

    pub fn set_water_levels(&self, levels: Option<Vec<WaterLevel>>) {
        *self.0.water_levels.lock().unwrap() = levels;
    }

    pub fn wave_calls(&self) -> usize {
        self.0.calls.waves.load(Ordering::SeqCst)
    }

    pub fn rain_calls(&self) -> usize {
        self.0.calls.rain.load(Ordering::SeqCst)
    }

    pub fn wind_calls(&self) -> usize {
        self.0.calls.wind.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sources for StubSources {
    async fn water_levels(&self) -> Option<Vec<WaterLevel>> {
        self.0.calls.water_levels.fetch_add(1, Ordering::SeqCst);
        self.0.water_levels.lock().unwrap().clone()
    }

    async fn wind(&self) -> Option<WindReading> {
        self.0.calls.wind.fetch_add(1, Ordering::SeqCst);
        *self.0.wind.lock().unwrap()
    }

    async fn rain(&self) -> Option<RainSummary> {
        self.0.calls.rain.fetch_add(1, Ordering::SeqCst);
        *self.0.rain.lock().unwrap()
    }

    async fn waves(&self) -> Option<WaveReading> {
        let previous = self.0.calls.waves.fetch_add(1, Ordering::SeqCst);
        self.0.waves.lock().unwrap().map(|reading| WaveReading {
            height_m: reading.height_m + self.0.wave_step_m * previous as f64,
            ..reading
        })
    }

    fn waves_enabled(&self) -> bool {
        self.0.waves_enabled
    }
}

pub fn engine(sources: &StubSources) -> Engine {
    Engine::new(
        SITE_REGISTRY.to_vec(),
        Box::new(sources.clone()),
        EngineSettings::default(),
    )
}

/// 2025-07-24 09:20 UTC, a fixed "now" for every scenario.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 24, 9, 20, 0).unwrap()
}

/// The `h`-th forecast hour after [`now`].
pub fn hour(h: i64) -> DateTime<Utc> {
    truncate_to_hour(now()) + Duration::hours(h)
}

/// Hourly levels from two hours before [`now`], shaped by `level(relative_hour)`.
pub fn tide(level: impl Fn(i64) -> f64) -> Vec<WaterLevel> {
    (-2..78)
        .map(|h| WaterLevel {
            timestamp: hour(h),
            level_m: level(h),
        })
        .collect()
}

pub fn calm_wind() -> WindReading {
    WindReading {
        direction_deg: 270.0,
        speed_kt: 0.0,
    }
}

pub fn swell(height_m: f64) -> WaveReading {
    WaveReading {
        height_m,
        period_s: 12.0,
        observed_at: now(),
    }
}
