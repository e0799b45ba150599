//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the
//! clarity-config.toml file. It covers refresh cadence, upstream endpoints,
//! rate-limit quotas for metered sources, and the default scoring weights.
//!
//! Every section has defaults, so a partial file (or no file at all) is valid.
//! URL templates may contain `{lat}`, `{lon}` and `{begin}` placeholders which
//! the source adapters fill in at request time.

use crate::scoring::Weights;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Default location of the config file, relative to the working directory.
pub const CONFIG_FILE: &str = "clarity-config.toml";

/// Environment variable consulted when `[waves] api_key` is not set.
pub const WAVE_API_KEY_ENV: &str = "STORMGLASS_API_KEY";

/// Application configuration loaded from clarity-config.toml
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub refresh: RefreshConfig,
    /// Reference point for the region-wide wind, rain, and wave lookups
    pub region: RegionConfig,
    pub tide: TideConfig,
    pub wind: WindConfig,
    pub rain: RainConfig,
    pub waves: WavesConfig,
    /// Default scoring weights applied at startup
    pub weights: Weights,
}

/// Refresh cadence and forecast limits
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Minutes between scheduled refreshes
    pub interval_minutes: u64,
    /// Maximum forecast horizon in hours
    pub forecast_cap_hours: usize,
    /// Timeout applied to every upstream HTTP request
    pub http_timeout_secs: u64,
    /// Window size used by the report when ranking best times
    pub default_window_hours: usize,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RegionConfig {
    pub latitude: f64,
    pub longitude: f64,
}

/// Units a water-level source reports in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelUnits {
    Feet,
    Meters,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct TideConfig {
    /// NOAA CO-OPS datagetter URL template
    pub url: String,
    /// Declared units; when absent they are inferred from the URL's `units=` parameter
    pub units: Option<LevelUnits>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct WindConfig {
    /// Candidate endpoints, tried in order until one yields direction and speed
    pub endpoints: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RainConfig {
    pub url: String,
    pub cache_minutes: u64,
    pub per_minute_ceiling: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct WavesConfig {
    pub url: String,
    /// Stormglass API key; falls back to the `STORMGLASS_API_KEY` env var
    pub api_key: Option<String>,
    pub cache_hours: u64,
    pub daily_ceiling: u32,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        RefreshConfig {
            interval_minutes: 30,
            forecast_cap_hours: 72,
            http_timeout_secs: 10,
            default_window_hours: crate::forecast::DEFAULT_WINDOW_HOURS,
        }
    }
}

impl Default for RegionConfig {
    fn default() -> Self {
        // Monterey, CA
        RegionConfig {
            latitude: 36.6002,
            longitude: -121.8947,
        }
    }
}

impl Default for TideConfig {
    fn default() -> Self {
        TideConfig {
            url: "https://api.tidesandcurrents.noaa.gov/api/prod/datagetter?product=predictions\
                  &application=clarity_tracker&station=9413450&begin_date={begin}&range=76\
                  &datum=MLLW&time_zone=gmt&units=metric&interval=h&format=json"
                .to_string(),
            units: None,
        }
    }
}

impl Default for WindConfig {
    fn default() -> Self {
        WindConfig {
            endpoints: vec![
                "https://api.tidesandcurrents.noaa.gov/api/prod/datagetter?product=wind\
                 &application=clarity_tracker&station=9413450&date=latest&time_zone=gmt\
                 &units=english&format=json"
                    .to_string(),
                "https://api.open-meteo.com/v1/forecast?latitude={lat}&longitude={lon}\
                 &current=wind_speed_10m,wind_direction_10m&wind_speed_unit=kn"
                    .to_string(),
            ],
        }
    }
}

impl Default for RainConfig {
    fn default() -> Self {
        RainConfig {
            url: "https://api.open-meteo.com/v1/forecast?latitude={lat}&longitude={lon}\
                  &hourly=precipitation&past_days=3&forecast_days=1&timezone=GMT"
                .to_string(),
            cache_minutes: 30,
            per_minute_ceiling: 10,
        }
    }
}

impl Default for WavesConfig {
    fn default() -> Self {
        WavesConfig {
            url: "https://api.stormglass.io/v2/weather/point?lat={lat}&lng={lon}\
                  &params=waveHeight,wavePeriod&source=sg,noaa"
                .to_string(),
            api_key: None,
            cache_hours: 3,
            daily_ceiling: 8,
        }
    }
}

impl WavesConfig {
    /// Configured key, or the env var when the file leaves it unset.
    /// Empty strings count as unset.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(WAVE_API_KEY_ENV).ok())
            .filter(|key| !key.trim().is_empty())
    }
}

impl Config {
    /// Load configuration from clarity-config.toml
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_FILE)
    }

    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), "loaded configuration");
                    config
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "invalid config file, using defaults"
                    );
                    Self::default()
                }
            },
            Err(_) => {
                info!(path = %path.display(), "no config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Write the current configuration to `path`
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path.as_ref(), contents)?;
        info!(path = %path.as_ref().display(), "configuration saved");
        Ok(())
    }
}
