//! # Clarity Tracker Application Entry Point
//!
//! Loads configuration, builds the live HTTP sources and the engine, and runs
//! an initial refresh. With `--stdout` it prints one report and exits;
//! otherwise it keeps refreshing on the configured interval until Ctrl-C.
//!
//! Flags:
//! - `--stdout`: one-shot report, for development and cron use
//! - `--hours=N`: report horizon (defaults to 24, capped by the config)
//! - `--config=PATH`: alternative config file
//! - `--init-config`: write the effective config to the config path and exit

// Test modules
#[cfg(test)]
mod tests;

use anyhow::Context;
use clarity_lib::config::{Config, CONFIG_FILE};
use clarity_lib::engine::{Engine, EngineSettings};
use clarity_lib::renderer::{draw_ascii, render_report};
use clarity_lib::scheduler::{self, Refresher};
use clarity_lib::sites::SITE_REGISTRY;
use clarity_lib::sources::HttpSources;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const DEFAULT_REPORT_HOURS: usize = 24;

/// Value of a `--name=value` flag.
fn flag_value(args: &[String], name: &str) -> Option<String> {
    let prefix = format!("--{}=", name);
    args.iter()
        .find_map(|arg| arg.strip_prefix(&prefix).map(str::to_string))
}

/// Scheduler period for `interval_minutes`, falling back to the default
/// interval when the value would overflow.
fn refresh_period(interval_minutes: u64) -> Duration {
    interval_minutes
        .checked_mul(60)
        .map(Duration::from_secs)
        .unwrap_or_else(|| {
            warn!(interval_minutes, "refresh interval out of range, using default");
            Duration::from_secs(Config::default().refresh.interval_minutes * 60)
        })
}

fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let development_mode = args.iter().any(|arg| arg == "--stdout");
    let report_hours = match flag_value(&args, "hours") {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("invalid --hours value `{}`", raw))?,
        None => DEFAULT_REPORT_HOURS,
    };
    let config_path = flag_value(&args, "config").unwrap_or_else(|| CONFIG_FILE.to_string());
    let config = Config::load_from_path(&config_path);

    if args.iter().any(|arg| arg == "--init-config") {
        config.save_to_path(&config_path)?;
        return Ok(());
    }

    let window_hours = config.refresh.default_window_hours;
    let period = refresh_period(config.refresh.interval_minutes);
    let settings = EngineSettings::from_config(&config);
    let sources = HttpSources::new(config).context("failed to build HTTP client")?;
    let mut engine = Engine::new(SITE_REGISTRY.to_vec(), Box::new(sources), settings);

    let rt = tokio::runtime::Runtime::new()?;

    // Startup refresh; later refreshes come from the scheduler
    let degraded = rt.block_on(engine.refresh());
    if degraded {
        warn!("starting with degraded data");
    }

    if development_mode {
        draw_ascii(&engine, report_hours, window_hours);
        return Ok(());
    }

    rt.block_on(async move {
        let refresher = Refresher::new(Arc::new(Mutex::new(engine)));
        let scheduler = scheduler::spawn(refresher, period, move |engine| {
            info!("\n{}", render_report(engine, report_hours, window_hours));
        });

        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?;
        info!("shutting down");
        scheduler.stop().await;
        Ok::<(), anyhow::Error>(())
    })
}
