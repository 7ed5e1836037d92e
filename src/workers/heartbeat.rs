//! Liveness of `processing` jobs.
//!
//! The worker touches the record while it runs; the sweeper fails jobs whose
//! worker died without reaching a terminal status.

use crate::modules::video::repository::{JobStore, RecordError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Touches the job record periodically until dropped.
pub struct HeartbeatGuard {
    handle: JoinHandle<()>,
}

impl HeartbeatGuard {
    pub fn start(jobs: Arc<dyn JobStore>, key: String, every: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; processing was just recorded.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(e) = jobs.heartbeat(&key).await {
                    warn!(key = %key, "Heartbeat failed: {}", e);
                }
            }
        });

        Self { handle }
    }
}

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Fails `processing` jobs whose heartbeat went quiet.
pub struct StaleJobSweeper {
    jobs: Arc<dyn JobStore>,
    threshold: Duration,
    every: Duration,
}

impl StaleJobSweeper {
    pub fn new(jobs: Arc<dyn JobStore>, threshold: Duration, every: Duration) -> Self {
        Self { jobs, threshold, every }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            "Starting stale job sweeper (threshold {:?}, interval {:?})",
            self.threshold, self.every
        );

        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!("Stale job sweep failed: {}", e);
                    }
                }
            }
        }

        info!("Stale job sweeper stopped");
    }

    pub async fn sweep_once(&self) -> Result<Vec<String>, RecordError> {
        let failed = self.jobs.fail_stale(self.threshold).await?;
        for key in &failed {
            warn!(key = %key, "⏱️ Job marked failed after missing heartbeats");
        }
        Ok(failed)
    }
}
