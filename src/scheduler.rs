//! Background job scheduler
//!
//! Three loops: connection syncs plus leaderboard refreshes on their own
//! intervals, and a daily pass for featured-slot rotation and milestone
//! checks. `start` and `stop` are idempotent.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::aggregator::Aggregator;
use crate::config::Config;
use crate::featured;
use crate::milestones;
use crate::storage::Store;

const ROTATION_INTERVAL_SECS: u64 = 24 * 60 * 60;

pub struct Scheduler {
    store: Arc<Store>,
    aggregator: Arc<Aggregator>,
    config: Config,
    handles: Mutex<Option<Vec<JoinHandle<()>>>>,
}

impl Scheduler {
    pub fn new(store: Arc<Store>, aggregator: Arc<Aggregator>, config: Config) -> Self {
        Self {
            store,
            aggregator,
            config,
            handles: Mutex::new(None),
        }
    }

    /// Spawn the background loops. A second call while running is a no-op.
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        if handles.is_some() {
            warn!("Scheduler already running");
            return;
        }

        info!(
            "Starting scheduler (sync every {}m, leaderboard every {}m, rotation daily)",
            self.config.sync.interval_minutes, self.config.sync.leaderboard_interval_minutes
        );

        let sync = {
            let aggregator = self.aggregator.clone();
            let period = Duration::from_secs(self.config.sync.interval_minutes as u64 * 60);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                loop {
                    interval.tick().await;
                    let (ok, failed) = aggregator.sync_stale_connections(false).await;
                    info!("Sync pass finished: {} ok, {} failed", ok, failed);
                }
            })
        };

        let leaderboard = {
            let aggregator = self.aggregator.clone();
            let period =
                Duration::from_secs(self.config.sync.leaderboard_interval_minutes as u64 * 60);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                loop {
                    interval.tick().await;
                    if let Err(e) = aggregator.update_leaderboard() {
                        error!("Leaderboard refresh failed: {}", e);
                    }
                }
            })
        };

        let daily = {
            let store = self.store.clone();
            let featured_config = self.config.featured.clone();
            tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_secs(ROTATION_INTERVAL_SECS));
                loop {
                    interval.tick().await;
                    let rotated = {
                        let mut rng = rand::thread_rng();
                        featured::rotate_featured(&store, &featured_config, &mut rng)
                    };
                    match rotated {
                        Ok(report) => info!(
                            "Rotation: {} expired, {} extended, {} featured",
                            report.expired, report.extended, report.newly_featured
                        ),
                        Err(e) => error!("Featured rotation failed: {}", e),
                    }
                    match milestones::check_milestones(&store) {
                        Ok(n) if n > 0 => info!("Recorded {} new milestones", n),
                        Ok(_) => {}
                        Err(e) => error!("Milestone check failed: {}", e),
                    }
                }
            })
        };

        *handles = Some(vec![sync, leaderboard, daily]);
    }

    /// Abort the loops. Safe to call when not running.
    pub fn stop(&self) {
        if let Some(handles) = self.handles.lock().take() {
            for handle in handles {
                handle.abort();
            }
            info!("Scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handles.lock().is_some()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> Arc<Scheduler> {
        let store = Arc::new(Store::in_memory().unwrap());
        let config = Config::default();
        let aggregator = Arc::new(Aggregator::new(store.clone(), &config, "key".to_string()));
        Arc::new(Scheduler::new(store, aggregator, config))
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let scheduler = scheduler();
        assert!(!scheduler.is_running());

        scheduler.start();
        assert!(scheduler.is_running());
        scheduler.start();
        assert!(scheduler.is_running());

        scheduler.stop();
        assert!(!scheduler.is_running());
        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn restart_after_stop() {
        let scheduler = scheduler();
        scheduler.start();
        scheduler.stop();
        scheduler.start();
        assert!(scheduler.is_running());
        scheduler.stop();
    }
}
