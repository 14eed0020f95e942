//! Background driver for the distribution coordinator.
//!
//! The surrounding service usually owns the scheduling of
//! `analyze_distribution`; this driver covers the standalone case: a tokio
//! task that invokes the strategy, sleeps for the delay the strategy asked
//! for (with jitter, so coordinators across a fleet do not fire in phase),
//! and supports an explicit wake for membership events plus graceful
//! shutdown.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::traits::PartitionAssignmentStrategy;

/// Add +/- 15% pseudo-random jitter to an interval so that coordinators
/// restarted together do not analyze in lockstep.
fn with_jitter(base: Duration) -> Duration {
    let factor = 0.85 + fastrand::f64() * 0.30;
    Duration::from_secs_f64(base.as_secs_f64() * factor)
}

/// Handle to a running [`DistributionCoordinator`] task.
pub struct CoordinatorHandle {
    shutdown_tx: broadcast::Sender<()>,
    wake_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl CoordinatorHandle {
    /// Wake the coordinator ahead of schedule, e.g. after a membership
    /// event. Lossy: a wake during an in-progress analysis coalesces.
    pub fn wake(&self) {
        let _ = self.wake_tx.try_send(());
    }

    /// Stop the coordinator and wait for the task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}

/// Drives a [`PartitionAssignmentStrategy`] on its self-computed schedule.
pub struct DistributionCoordinator;

impl DistributionCoordinator {
    /// Spawn the coordinator loop on the current tokio runtime.
    ///
    /// `default_interval` is used whenever the strategy expresses no delay
    /// preference.
    pub fn spawn<S>(mut strategy: S, default_interval: Duration) -> CoordinatorHandle
    where
        S: PartitionAssignmentStrategy + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let (wake_tx, mut wake_rx) = mpsc::channel(1);

        let handle = tokio::spawn(async move {
            info!("distribution coordinator started");

            loop {
                let delay = strategy
                    .analyze_distribution()
                    .filter(|d| !d.is_zero())
                    .unwrap_or(default_interval);
                let sleep_for = with_jitter(delay);
                debug!(sleep_ms = sleep_for.as_millis() as u64, "coordinator idle");

                tokio::select! {
                    _ = tokio::time::sleep(sleep_for) => {}
                    _ = wake_rx.recv() => {
                        debug!("coordinator woken explicitly");
                    }
                    _ = shutdown_rx.recv() => {
                        info!("distribution coordinator stopping");
                        break;
                    }
                }
            }
        });

        CoordinatorHandle {
            shutdown_tx,
            wake_tx,
            handle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_bounds() {
        let base = Duration::from_secs(10);
        for _ in 0..100 {
            let jittered = with_jitter(base);
            assert!(jittered >= Duration::from_millis(8500));
            assert!(jittered <= Duration::from_millis(11500));
        }
    }
}
