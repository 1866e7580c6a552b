//! Minute ticker that starts scheduled tasks once they are due.

use std::time::Duration;
use tokio::time::MissedTickBehavior;

use super::Daemon;

/// Runs on the worker pool until shutdown.
pub(super) fn spawn(daemon: Daemon, period_seconds: u64) {
    let period = Duration::from_secs(period_seconds.max(1));
    let pool = daemon.pool().clone();
    pool.spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::debug!("Scheduled task ticker every {}s", period.as_secs());
        loop {
            tokio::select! {
                _ = daemon.pool().cancelled() => break,
                _ = interval.tick() => {
                    let now = chrono::Local::now().naive_local();
                    let started = daemon.kick_due(now);
                    if started > 0 {
                        tracing::info!(started, "Scheduled tasks started");
                    }
                }
            }
        }
    });
}
