use super::*;
use clarity_lib::engine::{EngineError, GateKind};
use clarity_lib::gate::GateError;
use clarity_lib::scoring::{InvalidWeight, WeightsPatch};

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

fn current_score(engine: &Engine, site: &str, at: DateTime<Utc>) -> f64 {
    engine
        .current_at(site, at)
        .unwrap()
        .map(|point| point.score)
        .unwrap()
}

/// Every site gets a full horizon of rows even when no source answers.
///
/// Outages degrade inputs, never the shape of the table.
#[tokio::test]
async fn table_is_complete_when_every_source_fails() {
    let sources = StubSources::new(Stub::default());
    let mut engine = engine(&sources);

    let degraded = engine.refresh_at(now()).await;
    assert!(degraded, "missing tide and wind should mark the engine degraded");

    let table = engine.forecast_table(24);
    assert_eq!(table.len(), SITE_REGISTRY.len());
    for (site, rows) in &table {
        assert_eq!(rows.len(), 24, "{} should have 24 rows", site);
        assert_eq!(rows.keys().next(), Some(&hour(0)));
        assert!(
            rows.values().all(|point| point.score == 100.0),
            "no evidence of a penalty should score 100"
        );
    }
}

/// Only the required sources (tide and wind) drive the degraded flag.
#[tokio::test]
async fn degraded_tracks_required_sources_only() {
    let sources = StubSources::new(Stub {
        water_levels: Mutex::new(Some(tide(|_| 1.0))),
        wind: Mutex::new(Some(calm_wind())),
        ..Stub::default()
    });
    let mut engine = engine(&sources);

    assert!(
        !engine.refresh_at(now()).await,
        "rain and waves are optional"
    );
    assert!(engine.snapshot().rain.is_none());
    assert!(engine.snapshot().waves.is_none());

    sources.set_wind(None);
    assert!(engine.refresh_at(now()).await);
    assert!(
        engine.snapshot().wind.is_none(),
        "a failed source must not leave its old reading behind"
    );
    assert!(engine.status().degraded);

    sources.set_wind(Some(calm_wind()));
    sources.set_water_levels(None);
    assert!(engine.refresh_at(now()).await);
    assert!(engine.tide_flow().is_empty());

    sources.set_water_levels(Some(tide(|_| 1.0)));
    assert!(!engine.refresh_at(now()).await);
}

/// Refreshing twice at the same instant with unchanged inputs gives the same table.
#[tokio::test]
async fn refresh_is_idempotent() {
    let sources = StubSources::new(Stub {
        water_levels: Mutex::new(Some(tide(|h| (h as f64 * 0.4).sin()))),
        wind: Mutex::new(Some(WindReading {
            direction_deg: 200.0,
            speed_kt: 12.0,
        })),
        rain: Mutex::new(Some(RainSummary {
            total_mm_72h: 9.0,
            hours_counted: 72,
        })),
        waves: Mutex::new(Some(swell(1.5))),
        ..Stub::default()
    });
    let mut engine = engine(&sources);

    engine.refresh_at(now()).await;
    let first = engine.forecast_table(72);
    engine.refresh_at(now()).await;
    assert_eq!(engine.forecast_table(72), first);
    assert_eq!(sources.wave_calls(), 1, "second refresh should hit the wave cache");
}

/// A rising tide of 0.5 m/h costs 4 points at the default tide weight.
#[tokio::test]
async fn tide_flow_feeds_hourly_scores() {
    let sources = StubSources::new(Stub {
        water_levels: Mutex::new(Some(tide(|h| 0.5 * h as f64))),
        wind: Mutex::new(Some(calm_wind())),
        ..Stub::default()
    });
    let mut engine = engine(&sources);
    engine.refresh_at(now()).await;

    let table = engine.forecast_table(6);
    for point in table["monastery"].values() {
        assert!(close(point.components.tide_flow, 1.0));
        assert!(close(point.score, 96.0), "got {}", point.score);
    }
}

/// The wave feed is called at most once per three-hour cache window.
#[tokio::test]
async fn wave_cache_spends_one_request_per_window() {
    let sources = StubSources::new(Stub {
        waves: Mutex::new(Some(swell(1.0))),
        ..Stub::default()
    });
    let mut engine = engine(&sources);

    engine.refresh_at(now()).await;
    engine.refresh_at(now() + Duration::hours(1)).await;
    engine.refresh_at(now() + Duration::minutes(179)).await;
    assert_eq!(sources.wave_calls(), 1);

    engine.refresh_at(now() + Duration::hours(3)).await;
    assert_eq!(sources.wave_calls(), 2);

    let status = engine.gate_status_at(GateKind::Waves, now() + Duration::hours(3));
    assert_eq!(status.requests_used, 2);
    assert_eq!(status.ceiling, 8);
    assert!(status.cache_valid);
    assert_eq!(status.last_fetched_at, Some(now() + Duration::hours(3)));
}

/// Once the daily quota is spent, forced refreshes fail and regular refreshes
/// keep serving the last reading however old it is.
#[tokio::test]
async fn spent_wave_quota_serves_stale_reading() {
    let sources = StubSources::new(Stub {
        waves: Mutex::new(Some(swell(1.0))),
        wave_step_m: 0.1,
        ..Stub::default()
    });
    let mut engine = engine(&sources);
    engine.refresh_at(now()).await;

    let forced_at = now() + Duration::minutes(10);
    for _ in 0..7 {
        engine.force_wave_refresh_at(forced_at).await.unwrap();
    }
    assert_eq!(sources.wave_calls(), 8);
    assert_eq!(
        engine.force_wave_refresh_at(forced_at).await,
        Err(GateError::RateLimitExceeded {
            used: 8,
            ceiling: 8
        })
    );

    let later = now() + Duration::hours(5);
    engine.refresh_at(later).await;
    assert_eq!(sources.wave_calls(), 8, "no request past the ceiling");
    let waves = engine.snapshot().waves.unwrap();
    assert!(close(waves.height_m, 1.7), "stale reading kept, got {}", waves.height_m);
    assert!(!engine.gate_status_at(GateKind::Waves, later).cache_valid);
}

/// The daily counter resets on the first access of a new UTC day, including
/// a plain status read.
#[tokio::test]
async fn wave_quota_resets_at_utc_midnight() {
    let sources = StubSources::new(Stub {
        waves: Mutex::new(Some(swell(1.0))),
        ..Stub::default()
    });
    let mut engine = engine(&sources);

    let late = Utc.with_ymd_and_hms(2025, 7, 24, 22, 30, 0).unwrap();
    engine.refresh_at(late).await;
    engine.force_wave_refresh_at(late).await.unwrap();
    assert_eq!(engine.gate_status_at(GateKind::Waves, late).requests_used, 2);

    let after_midnight = Utc.with_ymd_and_hms(2025, 7, 25, 0, 5, 0).unwrap();
    let status = engine.gate_status_at(GateKind::Waves, after_midnight);
    assert_eq!(status.requests_used, 0);
    assert!(status.cache_valid, "cache age is independent of the quota window");

    let expired = Utc.with_ymd_and_hms(2025, 7, 25, 1, 31, 0).unwrap();
    engine.refresh_at(expired).await;
    assert_eq!(engine.gate_status_at(GateKind::Waves, expired).requests_used, 1);
    assert_eq!(sources.wave_calls(), 3);
}

/// A forced wave refresh replaces the reading and rescores immediately.
#[tokio::test]
async fn forced_wave_refresh_rescores() {
    let sources = StubSources::new(Stub {
        water_levels: Mutex::new(Some(tide(|_| 1.0))),
        wind: Mutex::new(Some(calm_wind())),
        waves: Mutex::new(Some(swell(1.0))),
        wave_step_m: 1.0,
        ..Stub::default()
    });
    let mut engine = engine(&sources);
    engine.refresh_at(now()).await;
    // 1 m at 12 s on a fully exposed site
    assert!(close(current_score(&engine, "monastery", now()), 90.0));
    assert!(close(current_score(&engine, "whalers-cove", now()), 97.0));

    let reading = engine.force_wave_refresh_at(now()).await.unwrap();
    assert!(close(reading.height_m, 2.0));
    assert_eq!(engine.snapshot().waves, Some(reading));
    assert!(close(current_score(&engine, "monastery", now()), 80.0));
}

/// Without an API key the wave gate never calls upstream.
#[tokio::test]
async fn missing_wave_key_disables_waves() {
    let sources = StubSources::new(Stub {
        waves: Mutex::new(Some(swell(1.0))),
        waves_enabled: false,
        ..Stub::default()
    });
    let mut engine = engine(&sources);

    engine.refresh_at(now()).await;
    assert!(engine.snapshot().waves.is_none());
    assert_eq!(
        engine.force_wave_refresh_at(now()).await,
        Err(GateError::Disabled)
    );
    assert_eq!(sources.wave_calls(), 0);
    assert!(!engine.gate_status_at(GateKind::Waves, now()).enabled);
}

/// Rain goes through its own per-minute gate with a 30-minute cache.
#[tokio::test]
async fn rain_is_cached_for_thirty_minutes() {
    let sources = StubSources::new(Stub {
        rain: Mutex::new(Some(RainSummary {
            total_mm_72h: 30.0,
            hours_counted: 72,
        })),
        ..Stub::default()
    });
    let mut engine = engine(&sources);

    engine.refresh_at(now()).await;
    engine.refresh_at(now() + Duration::minutes(29)).await;
    assert_eq!(sources.rain_calls(), 1);
    engine.refresh_at(now() + Duration::minutes(30)).await;
    assert_eq!(sources.rain_calls(), 2);

    // 30 mm over 72 h -> penalty 10
    assert!(close(current_score(&engine, "breakwater", now()), 90.0));
    let status = engine.gate_status_at(GateKind::Rain, now() + Duration::minutes(30));
    assert_eq!(status.ceiling, 10);
}

/// Weight changes rebuild the table from cached inputs without refetching.
#[tokio::test]
async fn weight_update_rebuilds_without_fetching() {
    let sources = StubSources::new(Stub {
        water_levels: Mutex::new(Some(tide(|_| 1.0))),
        // 10 kt straight onshore at Monastery (bearing 90)
        wind: Mutex::new(Some(WindReading {
            direction_deg: 90.0,
            speed_kt: 10.0,
        })),
        ..Stub::default()
    });
    let mut engine = engine(&sources);
    engine.refresh_at(now()).await;
    let before = current_score(&engine, "monastery", now());

    let weights = engine
        .set_weights_at(
            &WeightsPatch {
                onshore: Some(0.0),
                ..WeightsPatch::default()
            },
            now(),
        )
        .unwrap();
    assert_eq!(weights.onshore, 0.0);
    assert_eq!(weights.wind, 1.0, "unpatched weights keep their value");

    let after = current_score(&engine, "monastery", now());
    assert!(close(after - before, 5.0), "onshore 10 × 0.5 removed, got {}", after - before);
    assert_eq!(sources.wind_calls(), 1);

    let rejected = engine.set_weights_at(
        &WeightsPatch {
            wind: Some(-1.0),
            ..WeightsPatch::default()
        },
        now(),
    );
    assert_eq!(
        rejected,
        Err(EngineError::InvalidWeight(InvalidWeight {
            name: "wind",
            value: -1.0
        }))
    );
    assert_eq!(engine.weights().wind, 1.0);
    assert!(close(current_score(&engine, "monastery", now()), after));
}

/// Queries reject site ids that are not in the registry.
#[tokio::test]
async fn unknown_site_is_an_error() {
    let sources = StubSources::new(Stub::default());
    let mut engine = engine(&sources);
    engine.refresh_at(now()).await;

    assert_eq!(
        engine.current_at("atlantis", now()),
        Err(EngineError::UnknownSite("atlantis".to_string()))
    );
    assert!(matches!(
        engine.rank_windows("atlantis", 24, 2),
        Err(EngineError::UnknownSite(_))
    ));
}

/// Best windows favour slack water; ties go to the earliest start.
#[tokio::test]
async fn best_windows_follow_slack_water() {
    // Flat until hour 5, then rising 1 m/h
    let sources = StubSources::new(Stub {
        water_levels: Mutex::new(Some(tide(|h| (h - 5).max(0) as f64))),
        wind: Mutex::new(Some(calm_wind())),
        ..Stub::default()
    });
    let mut engine = engine(&sources);
    engine.refresh_at(now()).await;

    let ranked = engine.rank_windows("monastery", 12, 2).unwrap();
    assert_eq!(ranked.len(), 11, "every overlapping 2-hour window of 12 hours");

    let starts: Vec<_> = ranked.iter().take(4).map(|w| w.start).collect();
    assert_eq!(starts, vec![hour(0), hour(1), hour(2), hour(3)]);
    assert!(close(ranked[0].average_score, 100.0));
    assert_eq!(ranked[0].end, hour(2));

    assert_eq!(ranked[4].start, hour(4));
    assert!(close(ranked[4].average_score, 98.0));
    assert_eq!(ranked.last().map(|w| w.start), Some(hour(10)));
    assert!(ranked
        .windows(2)
        .all(|pair| pair[0].average_score >= pair[1].average_score));

    assert!(engine.rank_windows("monastery", 12, 0).unwrap().is_empty());
    assert!(engine.rank_windows("monastery", 1, 2).unwrap().is_empty());
}

/// The current point follows the clock within the built horizon.
#[tokio::test]
async fn current_point_follows_clock() {
    let sources = StubSources::new(Stub::default());
    let mut engine = engine(&sources);
    assert_eq!(
        engine.current_at("monastery", now()),
        Ok(None),
        "no table before the first refresh"
    );

    engine.refresh_at(now()).await;
    let point = engine.current_at("monastery", now()).unwrap().unwrap();
    assert_eq!(point.timestamp, hour(0));

    let later = engine
        .current_at("monastery", now() + Duration::hours(3))
        .unwrap()
        .unwrap();
    assert_eq!(later.timestamp, hour(3));

    assert_eq!(
        engine.current_at("monastery", now() + Duration::hours(100)),
        Ok(None)
    );
}

/// Requested horizons beyond the cap are truncated to it.
#[tokio::test]
async fn horizon_is_capped() {
    let sources = StubSources::new(Stub::default());
    let mut engine = engine(&sources);
    engine.refresh_at(now()).await;

    let table = engine.forecast_table(500);
    assert!(table.values().all(|rows| rows.len() == 72));
    assert!(engine.forecast_table(0).values().all(|rows| rows.is_empty()));

    let status = engine.status();
    assert_eq!(status.site_count, SITE_REGISTRY.len());
    assert_eq!(status.table_hours, 72);
    assert_eq!(status.last_refresh, Some(now()));
}

/// A refresh split into plan, fetch and apply behaves like a single refresh:
/// the wave request is counted when planned and its result cached on apply.
#[tokio::test]
async fn split_refresh_counts_and_caches_waves() {
    let sources = StubSources::new(Stub {
        waves: Mutex::new(Some(swell(1.5))),
        ..Stub::default()
    });
    let mut engine = engine(&sources);

    let plan = engine.plan_refresh(now());
    assert_eq!(engine.gate_status_at(GateKind::Waves, now()).requests_used, 1);
    assert_eq!(sources.wave_calls(), 0, "planning must not call upstream");

    let fetched = plan.fetch().await;
    assert_eq!(sources.wave_calls(), 1);
    assert!(engine.snapshot().waves.is_none(), "nothing applied yet");

    engine.apply_refresh(fetched);
    assert_eq!(engine.snapshot().waves.map(|w| w.height_m), Some(1.5));

    // Fresh cache: the next plan serves it without a request
    let fetched = engine.plan_refresh(now() + Duration::minutes(10)).fetch().await;
    engine.apply_refresh(fetched);
    assert_eq!(sources.wave_calls(), 1);
    assert_eq!(engine.gate_status_at(GateKind::Waves, now()).requests_used, 1);
    assert_eq!(engine.snapshot().waves.map(|w| w.height_m), Some(1.5));
}

/// Refresh intervals that overflow when converted to seconds use the default.
#[test]
fn oversized_refresh_interval_uses_default() {
    use std::time::Duration as StdDuration;

    assert_eq!(crate::refresh_period(5), StdDuration::from_secs(300));
    assert_eq!(crate::refresh_period(u64::MAX), StdDuration::from_secs(30 * 60));
}
