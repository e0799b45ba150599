//! # Forecast Table and Best-Window Ranking
//!
//! The table holds one [`ForecastPoint`] per site per hour, starting at the
//! current hour. Wind, rain and waves come from the single current snapshot
//! and are held constant across the horizon; only tide flow varies hour by
//! hour, because it is the only signal with genuine predictive data.
//!
//! The table is always rebuilt whole. Hours with no tide-flow entry score
//! with zero flow, so source outages degrade inputs but never drop rows.

use crate::scoring::{score, Weights};
use crate::units::hours_from;
use crate::{
    EnvironmentalSnapshot, ForecastPoint, ForecastTable, Site, SiteForecast, TideFlowSeries,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Default best-window size in hours
pub const DEFAULT_WINDOW_HOURS: usize = 2;

/// A contiguous run of forecast hours and its mean score.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ScoredWindow {
    /// First hour of the window
    pub start: DateTime<Utc>,
    /// Exclusive end: one hour after the window's last hour
    pub end: DateTime<Utc>,
    pub average_score: f64,
}

/// Score every site for `hours` consecutive hours from the hour containing `now`.
pub fn build_table(
    sites: &[Site],
    snapshot: &EnvironmentalSnapshot,
    flow: &TideFlowSeries,
    weights: &Weights,
    now: DateTime<Utc>,
    hours: usize,
) -> ForecastTable {
    let timestamps = hours_from(now, hours);
    let rain_mm = snapshot.rain.map_or(0.0, |rain| rain.total_mm_72h);

    sites
        .iter()
        .map(|site| {
            let rows: SiteForecast = timestamps
                .iter()
                .map(|&timestamp| {
                    let tide_flow = flow.get(&timestamp).copied().unwrap_or(0.0);
                    let (score, components) = score(
                        site,
                        snapshot.wind.as_ref(),
                        tide_flow,
                        rain_mm,
                        snapshot.waves.as_ref(),
                        weights,
                    );
                    (
                        timestamp,
                        ForecastPoint {
                            timestamp,
                            score,
                            components,
                        },
                    )
                })
                .collect();
            (site.id.to_string(), rows)
        })
        .collect()
}

/// First `hours` rows of every site.
pub fn truncate(table: &ForecastTable, hours: usize) -> ForecastTable {
    table
        .iter()
        .map(|(id, rows)| {
            let kept = rows
                .iter()
                .take(hours)
                .map(|(ts, point)| (*ts, *point))
                .collect();
            (id.clone(), kept)
        })
        .collect()
}

/// Rank every contiguous window of `size` points by mean score.
///
/// `points` must be in chronological order. All overlapping windows are
/// considered; windows that would run past the last point are not. Ties keep
/// chronological order, so the earliest start wins.
pub fn rank_windows(points: &[ForecastPoint], size: usize) -> Vec<ScoredWindow> {
    if size == 0 {
        return Vec::new();
    }

    let mut windows: Vec<ScoredWindow> = points
        .windows(size)
        .filter_map(|window| {
            let first = window.first()?;
            let last = window.last()?;
            let total: f64 = window.iter().map(|p| p.score).sum();
            Some(ScoredWindow {
                start: first.timestamp,
                end: last.timestamp + Duration::hours(1),
                average_score: total / size as f64,
            })
        })
        .collect();

    // sort_by is stable
    windows.sort_by(|a, b| b.average_score.total_cmp(&a.average_score));
    windows
}
