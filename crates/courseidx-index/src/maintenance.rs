//! Periodic queue housekeeping.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::queue::JobQueue;

/// Background task removing finished jobs older than a horizon.
pub struct Maintenance {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Run `clean_completed(retention_hours)` every `interval`, starting
/// immediately.
pub fn spawn_maintenance(queue: Arc<JobQueue>, interval: Duration, retention_hours: u64) -> Maintenance {
    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let period = interval.max(Duration::from_secs(1));

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match queue.clean_completed(retention_hours) {
                        Ok(0) => debug!("maintenance found nothing to clean"),
                        Ok(removed) => info!(removed, retention_hours, "removed finished jobs"),
                        Err(e) => warn!(error = %e, "queue maintenance failed"),
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    });

    Maintenance { shutdown, handle }
}

impl Maintenance {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "maintenance task ended abnormally");
        }
    }
}
