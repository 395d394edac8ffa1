//! Background eviction of idle rate limit buckets.
//!
//! Admission correctness never depends on the sweeper; it only bounds the
//! memory held for clients that stopped sending requests.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::limiter::SlidingWindowLimiter;

/// Handle to a running sweep task.
///
/// Dropping the handle stops the task at its next wake-up.
#[derive(Debug)]
pub struct Sweeper {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn a task that sweeps `limiter` every `interval`.
    ///
    /// The first sweep runs one full interval after spawning.
    pub fn spawn(
        limiter: Arc<SlidingWindowLimiter>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        info!(interval_secs = interval.as_secs_f64(), "Starting rate limit sweeper");

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let before = limiter.key_count();
                        limiter.sweep(clock.now_ms());
                        debug!(
                            keys_before = before,
                            keys_after = limiter.key_count(),
                            "Periodic sweep finished"
                        );
                    }
                    _ = &mut shutdown_rx => break,
                }
            }

            info!("Rate limit sweeper stopped");
        });

        Self { shutdown_tx, task }
    }

    /// Stop the sweep task and wait for it to finish.
    pub async fn shutdown(self) {
        // The task may already be gone if the runtime is shutting down
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            warn!(error = %e, "Rate limit sweeper ended abnormally");
        }
    }
}
