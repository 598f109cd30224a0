//! Reconciliation background worker.
//!
//! Ticks the scheduler on a fixed interval and whenever capacity is freed.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument};

use super::handle::SchedulerHandle;

pub struct ReconcileWorker {
    scheduler: SchedulerHandle,
    interval: Duration,
}

impl ReconcileWorker {
    pub fn new(scheduler: SchedulerHandle, interval: Duration) -> Self {
        Self {
            scheduler,
            interval,
        }
    }

    /// Run until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "Starting reconcile worker"
        );

        let capacity = self.scheduler.capacity_signal();
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Wait a full period before the first tick.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => self.tick("interval").await,
                _ = capacity.notified() => self.tick("capacity").await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Reconcile worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self, trigger: &'static str) {
        match self.scheduler.reconcile_now().await {
            Ok(report) if report.changed() => info!(
                trigger,
                dropped = report.dropped,
                direct = report.direct,
                stolen = report.stolen,
                stale = report.stale,
                probed = report.probed,
                still_pending = report.still_pending,
                "Reconciliation complete"
            ),
            Ok(report) => debug!(
                trigger,
                still_pending = report.still_pending,
                "Nothing to reconcile"
            ),
            Err(e) => error!(trigger, error = %e, "Reconciliation failed"),
        }
    }
}
