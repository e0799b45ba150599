//! # Rate-Limited Cache Gate
//!
//! Wraps a metered upstream so it is never called more often than its quota
//! allows, while serving the freshest value the quota permits.
//!
//! ## Policy
//! 1. **Fresh cache** (`now − cached_at < cache_duration`): return the cached
//!    value. No network call, no quota spent.
//! 2. **Quota left**: count the request *before* looking at the result, then
//!    fetch. Success replaces the cache; failure serves the last cached value
//!    whatever its age (stale-if-error).
//! 3. **Quota spent**: serve the last cached value whatever its age
//!    (stale-if-throttled).
//!
//! The quota window (UTC day or UTC minute) is rolled on *every* access that
//! reads or increments the counter, including [`RateGate::status`], so a status
//! query never reports yesterday's count.
//!
//! ## Clock injection
//! Every method takes `now` instead of calling `Utc::now()`, which keeps the
//! quota and staleness arithmetic deterministic in tests.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::future::Future;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Length of a quota window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaWindow {
    Daily,
    PerMinute,
}

impl QuotaWindow {
    /// Marker identifying the window containing `now`.
    pub fn marker(self, now: DateTime<Utc>) -> String {
        match self {
            QuotaWindow::Daily => now.format("%Y-%m-%d").to_string(),
            QuotaWindow::PerMinute => now.format("%Y-%m-%dT%H:%M").to_string(),
        }
    }
}

/// Quota and cache limits for one metered source.
///
/// The policy is fixed at construction apart from `enabled`, which the engine
/// clears when the source cannot be called at all.
///
/// # Fields
/// - `ceiling`: live requests allowed per quota window; a failed request
///   still counts
/// - `cache_duration`: age below which the cached value is served without
///   touching the quota
/// - `window`: whether the counter resets per UTC day or per UTC minute
/// - `enabled`: when false the gate serves its cache (if any) and never calls
///   upstream
#[derive(Clone, Debug, PartialEq)]
pub struct GatePolicy {
    pub ceiling: u32,
    pub cache_duration: Duration,
    pub window: QuotaWindow,
    pub enabled: bool,
}

/// Outcome of asking the gate whether a live request may be made.
#[derive(Clone, Debug, PartialEq)]
pub enum Admission<T> {
    /// Serve this value (possibly `None`) without calling upstream
    Serve(Option<T>),
    /// One request has been counted; fetch and hand the result to
    /// [`RateGate::record`]
    Fetch,
}

/// Observability snapshot of a gate.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GateStatus {
    pub enabled: bool,
    pub requests_used: u32,
    pub ceiling: u32,
    pub cache_valid: bool,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

/// Errors from a forced refresh. Regular reads never fail.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum GateError {
    #[error("rate limit exceeded: {used}/{ceiling} requests used this window")]
    RateLimitExceeded { used: u32, ceiling: u32 },

    #[error("source is disabled")]
    Disabled,

    /// The request was made (and counted) but returned nothing usable
    #[error("upstream fetch failed")]
    FetchFailed,
}

/// Quota and cache state for one metered source.
#[derive(Debug)]
pub struct RateGate<T> {
    name: &'static str,
    policy: GatePolicy,
    cached_value: Option<T>,
    cached_at: Option<DateTime<Utc>>,
    requests_used: u32,
    window_marker: String,
}

impl<T: Clone> RateGate<T> {
    pub fn new(name: &'static str, policy: GatePolicy) -> Self {
        RateGate {
            name,
            policy,
            cached_value: None,
            cached_at: None,
            requests_used: 0,
            window_marker: String::new(),
        }
    }

    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.policy.enabled = enabled;
    }

    /// Last cached value regardless of age.
    pub fn cached(&self) -> Option<&T> {
        self.cached_value.as_ref()
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match (&self.cached_value, self.cached_at) {
            (Some(_), Some(at)) => now - at < self.policy.cache_duration,
            _ => false,
        }
    }

    /// Reset the counter when `now` falls in a new quota window.
    fn roll_window(&mut self, now: DateTime<Utc>) {
        let marker = self.policy.window.marker(now);
        if marker != self.window_marker {
            if self.requests_used > 0 {
                debug!(gate = self.name, previous = %self.window_marker, "quota window reset");
            }
            self.requests_used = 0;
            self.window_marker = marker;
        }
    }

    /// Decide whether a regular read may call upstream.
    ///
    /// Returns [`Admission::Fetch`] only when the cache is stale, the gate is
    /// enabled and quota is left; in that case the request is already counted.
    /// Every other path serves the last cached value whatever its age.
    ///
    /// Split from [`RateGate::get`] so a caller can release its own locks while
    /// the upstream request is in flight.
    pub fn admit(&mut self, now: DateTime<Utc>) -> Admission<T> {
        if self.is_fresh(now) {
            debug!(gate = self.name, "serving fresh cache");
            return Admission::Serve(self.cached_value.clone());
        }
        if !self.policy.enabled {
            return Admission::Serve(self.cached_value.clone());
        }

        self.roll_window(now);
        if self.requests_used >= self.policy.ceiling {
            debug!(
                gate = self.name,
                used = self.requests_used,
                ceiling = self.policy.ceiling,
                "quota spent, serving last cached value"
            );
            return Admission::Serve(self.cached_value.clone());
        }
        self.count_request();
        Admission::Fetch
    }

    /// Store the result of an admitted fetch.
    ///
    /// # Returns
    /// - the fresh value on success, which also becomes the cache
    /// - the last cached value (stale-if-error) when `value` is `None`
    pub fn record(&mut self, now: DateTime<Utc>, value: Option<T>) -> Option<T> {
        match value {
            Some(value) => {
                self.store(now, value.clone());
                Some(value)
            }
            None => {
                warn!(gate = self.name, "fetch failed, serving last cached value");
                self.cached_value.clone()
            }
        }
    }

    /// Read through the gate; never fails, may return a stale value or `None`.
    ///
    /// Equivalent to [`RateGate::admit`], then `fetch` and [`RateGate::record`]
    /// when admitted.
    pub async fn get<F, Fut>(&mut self, now: DateTime<Utc>, fetch: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        match self.admit(now) {
            Admission::Serve(value) => value,
            Admission::Fetch => {
                let value = fetch().await;
                self.record(now, value)
            }
        }
    }

    /// Administrative refresh: skips the freshness check but not the quota.
    ///
    /// # Errors
    /// - [`GateError::Disabled`] when the gate is disabled; nothing is counted
    /// - [`GateError::RateLimitExceeded`] when the window's quota is spent
    /// - [`GateError::FetchFailed`] when the request was made (and counted)
    ///   but returned nothing; the cache is left untouched
    pub async fn force<F, Fut>(&mut self, now: DateTime<Utc>, fetch: F) -> Result<T, GateError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        if !self.policy.enabled {
            return Err(GateError::Disabled);
        }
        self.roll_window(now);
        if self.requests_used >= self.policy.ceiling {
            return Err(GateError::RateLimitExceeded {
                used: self.requests_used,
                ceiling: self.policy.ceiling,
            });
        }
        self.count_request();
        let value = fetch().await.ok_or(GateError::FetchFailed)?;
        self.store(now, value.clone());
        Ok(value)
    }

    /// Requests are counted before their outcome is known.
    fn count_request(&mut self) {
        self.requests_used += 1;
        info!(
            gate = self.name,
            used = self.requests_used,
            ceiling = self.policy.ceiling,
            "live upstream request"
        );
    }

    fn store(&mut self, now: DateTime<Utc>, value: T) {
        self.cached_value = Some(value);
        self.cached_at = Some(now);
    }

    /// Current quota and cache state. Rolls the quota window first, so the
    /// count never reflects a previous day or minute.
    pub fn status(&mut self, now: DateTime<Utc>) -> GateStatus {
        self.roll_window(now);
        GateStatus {
            enabled: self.policy.enabled,
            requests_used: self.requests_used,
            ceiling: self.policy.ceiling,
            cache_valid: self.is_fresh(now),
            last_fetched_at: self.cached_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::cell::Cell;

    fn wave_gate() -> RateGate<u32> {
        RateGate::new(
            "waves",
            GatePolicy {
                ceiling: 8,
                cache_duration: Duration::hours(3),
                window: QuotaWindow::Daily,
                enabled: true,
            },
        )
    }

    fn t(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 24, h, m, 0).unwrap()
    }

    #[tokio::test]
    async fn fresh_cache_spends_no_quota() {
        let mut gate = wave_gate();
        let counter = Cell::new(0);
        let calls = &counter;
        let fetch = move || async move {
            calls.set(calls.get() + 1);
            Some(calls.get())
        };

        assert_eq!(gate.get(t(6, 0), fetch).await, Some(1));
        assert_eq!(gate.get(t(7, 0), fetch).await, Some(1));
        assert_eq!(counter.get(), 1);
        assert_eq!(gate.status(t(7, 0)).requests_used, 1);
    }

    #[test]
    fn admission_counts_before_the_result_is_recorded() {
        let mut gate = wave_gate();
        assert_eq!(gate.admit(t(6, 0)), Admission::Fetch);
        assert_eq!(gate.status(t(6, 0)).requests_used, 1);
        assert_eq!(gate.cached(), None);

        assert_eq!(gate.record(t(6, 0), Some(4)), Some(4));
        assert_eq!(gate.admit(t(7, 0)), Admission::Serve(Some(4)));

        // Expired, admitted, then failed: the stale value survives
        assert_eq!(gate.admit(t(10, 0)), Admission::Fetch);
        assert_eq!(gate.record(t(10, 0), None), Some(4));
        assert_eq!(gate.status(t(10, 0)).requests_used, 2);
    }

    #[tokio::test]
    async fn expired_cache_spends_exactly_one() {
        let mut gate = wave_gate();
        gate.get(t(6, 0), || async { Some(1) }).await;
        assert_eq!(gate.get(t(9, 0), || async { Some(2) }).await, Some(2));
        assert_eq!(gate.status(t(9, 0)).requests_used, 2);
    }

    #[tokio::test]
    async fn exhausted_quota_serves_stale_value() {
        let mut gate = RateGate::new(
            "waves",
            GatePolicy {
                ceiling: 2,
                cache_duration: Duration::hours(3),
                window: QuotaWindow::Daily,
                enabled: true,
            },
        );
        gate.get(t(0, 0), || async { Some(10) }).await;
        gate.get(t(4, 0), || async { Some(20) }).await;
        assert_eq!(gate.status(t(4, 0)).requests_used, 2);

        let flag = Cell::new(false);
        let called = &flag;
        let value = gate
            .get(t(8, 0), move || async move {
                called.set(true);
                Some(30)
            })
            .await;
        assert_eq!(value, Some(20));
        assert!(!flag.get());
        assert_eq!(gate.status(t(8, 0)).requests_used, 2);

        assert_eq!(
            gate.force(t(8, 0), || async { Some(40) }).await,
            Err(GateError::RateLimitExceeded { used: 2, ceiling: 2 })
        );
    }

    #[tokio::test]
    async fn failed_fetch_counts_and_serves_stale() {
        let mut gate = wave_gate();
        gate.get(t(0, 0), || async { Some(5) }).await;
        assert_eq!(gate.get(t(4, 0), || async { None }).await, Some(5));
        let status = gate.status(t(4, 0));
        assert_eq!(status.requests_used, 2);
        assert_eq!(status.last_fetched_at, Some(t(0, 0)));
        assert!(!status.cache_valid);
    }

    #[tokio::test]
    async fn force_bypasses_freshness() {
        let mut gate = wave_gate();
        gate.get(t(6, 0), || async { Some(1) }).await;
        assert_eq!(gate.force(t(6, 30), || async { Some(2) }).await, Ok(2));
        assert_eq!(gate.get(t(7, 0), || async { Some(3) }).await, Some(2));
        assert_eq!(gate.status(t(7, 0)).requests_used, 2);
    }

    #[tokio::test]
    async fn failed_force_still_spends_quota() {
        let mut gate = wave_gate();
        assert_eq!(gate.force(t(6, 0), || async { None }).await, Err(GateError::FetchFailed));
        assert_eq!(gate.status(t(6, 0)).requests_used, 1);
    }

    #[tokio::test]
    async fn status_resets_after_day_boundary() {
        let mut gate = wave_gate();
        gate.get(t(20, 0), || async { Some(1) }).await;
        gate.force(t(23, 0), || async { Some(2) }).await.unwrap();
        assert_eq!(gate.status(t(23, 59)).requests_used, 2);

        let next_day = Utc.with_ymd_and_hms(2025, 7, 25, 0, 1, 0).unwrap();
        assert_eq!(gate.status(next_day).requests_used, 0);
    }

    #[tokio::test]
    async fn per_minute_window_resets() {
        let mut gate = RateGate::new(
            "rain",
            GatePolicy {
                ceiling: 1,
                cache_duration: Duration::zero(),
                window: QuotaWindow::PerMinute,
                enabled: true,
            },
        );
        let at = |s| Utc.with_ymd_and_hms(2025, 7, 24, 12, 0, s).unwrap();
        assert_eq!(gate.get(at(0), || async { Some(1) }).await, Some(1));
        assert_eq!(gate.get(at(30), || async { Some(2) }).await, Some(1));
        let next = Utc.with_ymd_and_hms(2025, 7, 24, 12, 1, 0).unwrap();
        assert_eq!(gate.get(next, || async { Some(3) }).await, Some(3));
    }

    #[tokio::test]
    async fn disabled_gate_never_fetches() {
        let mut gate = wave_gate();
        gate.set_enabled(false);
        let flag = Cell::new(false);
        let called = &flag;
        let value = gate
            .get(t(6, 0), move || async move {
                called.set(true);
                Some(1)
            })
            .await;
        assert_eq!(value, None);
        assert!(!flag.get());
        assert_eq!(gate.force(t(6, 0), || async { Some(1) }).await, Err(GateError::Disabled));
        assert!(!gate.status(t(6, 0)).enabled);
    }
}
