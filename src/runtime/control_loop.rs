//! Tokio control loop driving scheduler ticks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::core::executor::WorkloadExecutor;
use crate::core::forecast::ForecastGateway;
use crate::core::history::HistoryStore;
use crate::core::scheduler::{DeferralQueue, DeferralScheduler};

/// Handle to a running control loop.
pub struct ControlLoopHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ControlLoopHandle {
    /// Stop ticking and wait for the in-progress tick to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            error!(error = %err, "control loop task failed");
        }
    }

    /// Whether the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawn a loop calling [`DeferralScheduler::tick`] every `tick_interval`.
///
/// Each tick is followed by [`DeferralScheduler::purge_finished`] with the
/// scheduler's `finished_retention`, so finished requests do not accumulate.
/// Must be called from within a tokio runtime. A tick that overruns the
/// interval delays the next one instead of bursting.
pub fn spawn_control_loop<G, E, H, Q>(
    scheduler: Arc<DeferralScheduler<G, E, H, Q>>,
    tick_interval: Duration,
) -> ControlLoopHandle
where
    G: ForecastGateway,
    E: WorkloadExecutor,
    H: HistoryStore,
    Q: DeferralQueue,
{
    let (shutdown, mut stop) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(?tick_interval, "control loop started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = scheduler.tick().await;
                    if report.processed > 0 {
                        debug!(
                            processed = report.processed,
                            executed = report.executed,
                            forced = report.forced,
                            redeferred = report.redeferred,
                            retried = report.retried,
                            failed = report.failed,
                            "tick complete"
                        );
                    }
                    scheduler.purge_finished(scheduler.settings().finished_retention);
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        info!("control loop stopped");
    });
    ControlLoopHandle { shutdown, task }
}
