//! Periodic temp-store eviction.
//!
//! One background task owned by the process lifecycle: started at init,
//! stopped at shutdown. The first sweep runs immediately to clear stale
//! artifacts from a previous run; sweeps run inline in the task, so two
//! sweeps of the same directory can never overlap.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::ConfigHandle;
use crate::media::store;

pub struct CleanupScheduler {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl CleanupScheduler {
    pub fn spawn(config: ConfigHandle) -> Self {
        let hours = config.config().cleanup.interval_hours.max(1);
        Self::spawn_with_period(config, Duration::from_secs(hours * 3600))
    }

    pub fn spawn_with_period(config: ConfigHandle, period: Duration) -> Self {
        let (shutdown, mut rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            info!(period_secs = period.as_secs(), "cleanup scheduler started");
            let mut interval = tokio::time::interval(period);

            loop {
                tokio::select! {
                    _ = interval.tick() => sweep(&config),
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("cleanup scheduler stopped");
        });

        Self { shutdown, handle }
    }

    /// Signal shutdown and wait for the task to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

fn sweep(config: &ConfigHandle) {
    let cfg = config.handler();
    if let Err(e) = store::evict(&cfg.temp_dir_path(), cfg.max_temp_age()) {
        error!("temp store sweep failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn test_startup_sweep_and_stop() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("viewonce_old_1_x.jpg");
        std::fs::write(&stale, b"x").unwrap();

        let mut config = Config::default();
        config.handler.temp_dir = dir.path().to_string_lossy().into_owned();
        config.handler.max_temp_age_hours = 0;

        let scheduler = CleanupScheduler::spawn_with_period(
            ConfigHandle::new(config, None),
            Duration::from_millis(50),
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!stale.exists());

        // Stop must not hang or leak the task.
        tokio::time::timeout(Duration::from_secs(1), scheduler.stop())
            .await
            .unwrap();
    }
}
