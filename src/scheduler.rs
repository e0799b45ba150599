//! Timer-driven refresh.
//!
//! [`Refresher`] wraps the shared engine with an in-flight flag: a refresh
//! requested while another is still running is skipped, never queued, so a
//! slow upstream cannot cause refreshes to pile up. The engine lock is taken
//! only to plan and to apply a refresh, never across upstream requests, so
//! queries see either the old table or the new one. [`spawn`] drives it from a
//! `tokio` interval until [`Scheduler::stop`] is called.

use crate::engine::Engine;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// The engine as shared between the scheduler and query callers.
pub type SharedEngine = Arc<Mutex<Engine>>;

/// Resets the in-flight flag when dropped, even if the refresh panics.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct Refresher {
    engine: SharedEngine,
    in_flight: Arc<AtomicBool>,
}

impl Refresher {
    pub fn new(engine: SharedEngine) -> Self {
        Refresher {
            engine,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run one refresh. Returns the degraded flag, or `None` if a refresh was
    /// already running.
    pub async fn refresh(&self) -> Option<bool> {
        self.refresh_at(Utc::now()).await
    }

    pub async fn refresh_at(&self, now: DateTime<Utc>) -> Option<bool> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("refresh already in flight, skipping");
            return None;
        }
        let _guard = InFlight(&self.in_flight);
        let plan = self.engine.lock().await.plan_refresh(now);
        let fetched = plan.fetch().await;
        let degraded = self.engine.lock().await.apply_refresh(fetched);
        Some(degraded)
    }
}

/// Handle to a running refresh loop.
pub struct Scheduler {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Scheduler {
    /// Stop the loop. A refresh already running is allowed to finish.
    pub async fn stop(self) {
        // Err means the loop already exited
        let _ = self.shutdown.send(());
        if let Err(error) = self.handle.await {
            warn!(%error, "refresh loop ended abnormally");
        }
    }
}

/// Refresh every `period` and call `on_refresh` after each completed refresh.
///
/// The first refresh happens one `period` after spawning; callers run the
/// startup refresh themselves.
pub fn spawn<F>(refresher: Refresher, period: Duration, on_refresh: F) -> Scheduler
where
    F: Fn(&Engine) + Send + 'static,
{
    let (shutdown, mut stop) = oneshot::channel();
    let period = period.max(Duration::from_secs(1));

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // interval fires immediately; skip that tick
        ticker.tick().await;
        info!(period_secs = period.as_secs(), "refresh loop started");

        loop {
            tokio::select! {
                _ = &mut stop => {
                    info!("refresh loop stopped");
                    break;
                }
                _ = ticker.tick() => {
                    debug!("scheduled refresh");
                    if refresher.refresh().await.is_some() {
                        let engine = refresher.engine().lock().await;
                        on_refresh(&engine);
                    }
                }
            }
        }
    });

    Scheduler { shutdown, handle }
}
