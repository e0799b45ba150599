//! # Terminal Report Rendering
//!
//! Formats the engine's forecast as a plain-text table for `--stdout` mode and
//! for the scheduler's per-refresh log. One line per site: the score for the
//! current hour, a sparkline over the next hours and the best window.
//!
//! ```text
//! Clarity forecast, 2025-07-24 09:00 UTC
//! wind 12.0 kt from 270° | rain 3.2 mm/72h | waves 1.2 m @ 9 s
//!
//! site                            now  next 24h                  best 2h
//! San Carlos Beach (Breakwater)    87  ▇▇▇▆▅▅▆▇██▇▆▅▅▆▇█████▇▆▅  13:00-15:00 (91)
//! ```

use crate::engine::Engine;
use crate::EnvironmentalSnapshot;
use chrono::{DateTime, Utc};
use std::fmt::Write;

/// Sparkline glyphs from lowest to highest score.
const LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
const NAME_WIDTH: usize = 30;

/// One glyph per score, scaled over the fixed 0–100 range.
fn sparkline(scores: &[f64]) -> String {
    scores
        .iter()
        .map(|&score| {
            let normalized = score.clamp(0.0, 100.0) / 100.0;
            let index = (normalized * (LEVELS.len() - 1) as f64).round() as usize;
            LEVELS[index.min(LEVELS.len() - 1)]
        })
        .collect()
}

fn format_score(score: Option<f64>) -> String {
    match score {
        Some(score) => format!("{:>3.0}", score),
        None => " --".to_string(),
    }
}

fn format_conditions(snapshot: &EnvironmentalSnapshot) -> String {
    let wind = match snapshot.wind {
        Some(w) => format!("wind {:.1} kt from {:.0}°", w.speed_kt, w.direction_deg),
        None => "wind unavailable".to_string(),
    };
    let rain = match snapshot.rain {
        Some(r) => format!("rain {:.1} mm/72h", r.total_mm_72h),
        None => "rain unavailable".to_string(),
    };
    let waves = match snapshot.waves {
        Some(w) => format!("waves {:.1} m @ {:.0} s", w.height_m, w.period_s),
        None => "waves unavailable".to_string(),
    };
    format!("{} | {} | {}", wind, rain, waves)
}

/// Render `hours` of forecast with best windows of `window_hours`.
pub fn render_report(engine: &Engine, hours: usize, window_hours: usize) -> String {
    render_report_at(engine, hours, window_hours, Utc::now())
}

pub fn render_report_at(
    engine: &Engine,
    hours: usize,
    window_hours: usize,
    now: DateTime<Utc>,
) -> String {
    let hours = hours.min(engine.forecast_cap_hours());
    let table = engine.forecast_table(hours);
    let mut out = String::new();

    if engine.is_degraded() {
        let _ = writeln!(out, "⚠ DEGRADED: tide or wind data unavailable\n");
    }
    let _ = writeln!(out, "Clarity forecast, {}", now.format("%Y-%m-%d %H:%M UTC"));
    let _ = writeln!(out, "{}\n", format_conditions(engine.snapshot()));
    let _ = writeln!(
        out,
        "{:<width$} now  {:<spark$}  best {}h",
        "site",
        format!("next {}h", hours),
        window_hours,
        width = NAME_WIDTH,
        spark = hours.max(8),
    );

    for site in engine.sites() {
        let scores: Vec<f64> = table
            .get(site.id)
            .map(|rows| rows.values().map(|point| point.score).collect())
            .unwrap_or_default();
        let current = engine.current_at(site.id, now).ok().flatten().map(|p| p.score);
        let best = engine
            .rank_windows(site.id, hours, window_hours)
            .ok()
            .and_then(|windows| windows.into_iter().next())
            .map(|window| {
                format!(
                    "{}-{} ({:.0})",
                    window.start.format("%H:%M"),
                    window.end.format("%H:%M"),
                    window.average_score
                )
            })
            .unwrap_or_else(|| "--".to_string());

        let _ = writeln!(
            out,
            "{:<width$} {}  {:<spark$}  {}",
            site.name,
            format_score(current),
            sparkline(&scores),
            best,
            width = NAME_WIDTH,
            spark = hours.max(8),
        );
    }
    out
}

/// Print the report to stdout.
pub fn draw_ascii(engine: &Engine, hours: usize, window_hours: usize) {
    print!("{}", render_report(engine, hours, window_hours));
}
