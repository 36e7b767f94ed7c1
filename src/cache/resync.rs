use tracing::{info, warn};

use super::PickupCache;
use crate::error::PickupError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncOutcome {
    /// Authoritative rows were loaded over the cached copy.
    Loaded(usize),
    /// No live row exists; the cached copy was demoted to inactive.
    Demoted,
    /// No live row and nothing cached.
    Absent,
}

impl PickupCache {
    /// Reloads the live row(s) for `phone_number` into the store.
    ///
    /// Running it twice with no backing-store change in between leaves the
    /// store in the same state. A failed query leaves the store untouched, and
    /// a row older than a copy committed meanwhile does not replace it.
    pub async fn resync(&self, phone_number: &str) -> Result<ResyncOutcome, PickupError> {
        let rows = self.backend.fetch_live(phone_number).await.map_err(|err| {
            warn!("Resync query for {} failed: {}", phone_number, err);
            PickupError::BackingStoreUnavailable(err)
        })?;

        if rows.is_empty() {
            return Ok(if self.store.demote(phone_number) {
                info!("Row {} no longer live. Set to inactive in memory.", phone_number);
                ResyncOutcome::Demoted
            } else {
                ResyncOutcome::Absent
            });
        }

        let count = rows.len();
        for record in rows {
            info!(
                phone_number = %record.phone_number,
                version = record.version,
                "Loaded current pickup"
            );
            self.store.commit(record);
        }
        Ok(ResyncOutcome::Loaded(count))
    }

    /// Reloads the whole live table. Cached keys without a live row are demoted.
    pub async fn resync_all(&self) -> Result<usize, PickupError> {
        let rows = self
            .backend
            .fetch_all_live()
            .await
            .map_err(PickupError::BackingStoreUnavailable)?;
        let loaded = rows.len();
        let demoted = self.store.replace_all(rows);
        info!("Finished loading {} pickups, {} demoted", loaded, demoted);
        Ok(loaded)
    }
}
