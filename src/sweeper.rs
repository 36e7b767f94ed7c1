use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::cache::PickupCache;
use crate::error::PickupError;
use crate::models::timestamp_now;
use crate::queue::{WriteJob, WriteQueue};

/// Periodically retires pickups whose rider stopped reporting.
///
/// A silent record is unbound and marked inactive in memory right away, then
/// archived and removed through the write queue in a single step pinned to
/// the version read here. A ping that landed on another instance in the
/// meantime wins: nothing is archived and the key is resynced instead.
pub struct InactivitySweeper {
    cache: Arc<PickupCache>,
    queue: WriteQueue,
    interval: Duration,
    threshold: chrono::Duration,
}

impl InactivitySweeper {
    pub fn new(
        cache: Arc<PickupCache>,
        queue: WriteQueue,
        interval: Duration,
        threshold: Duration,
    ) -> Self {
        Self {
            cache,
            queue,
            interval,
            threshold: chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Runs a single pass as of `now`. Returns how many records were retired.
    pub fn sweep_once(&self, now: NaiveDateTime) -> usize {
        let silent = self.cache.store().demote_silent(now, self.threshold);
        for record in &silent {
            info!(
                "Pickup {} silent since {}, setting inactive",
                record.phone_number, record.latest_time
            );
            if let Err(err) = self.queue.enqueue(WriteJob::archive_at_version(record)) {
                warn!("Could not queue archive for {}: {}", record.phone_number, err);
            }
        }
        silent.len()
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), PickupError> {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Inactivity sweeper running every {:?}, threshold {}s",
            self.interval,
            self.threshold.num_seconds()
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once(timestamp_now());
                }
                _ = shutdown.recv() => break,
            }
        }
        info!("Inactivity sweeper stopped");
        Ok(())
    }
}
