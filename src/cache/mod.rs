//! Instance-local cache of live pickups kept consistent with the shared store.
//!
//! `RecordStore` holds what this instance believes is current. Writes go
//! through [`PickupCache::apply_versioned_write`], which only commits what the
//! backing store accepted, and anything that loses a race is repaired by
//! [`PickupCache::resync`].

use std::sync::Arc;

use tracing::warn;

use crate::db::PickupBackend;
use crate::error::PickupError;

pub mod resync;
pub mod store;
pub mod versioned;

pub use resync::ResyncOutcome;
pub use store::RecordStore;
pub use versioned::Mutation;

pub struct PickupCache {
    store: RecordStore,
    backend: Arc<dyn PickupBackend>,
}

impl PickupCache {
    pub fn new(backend: Arc<dyn PickupBackend>) -> Self {
        Self {
            store: RecordStore::new(),
            backend,
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn backend(&self) -> &dyn PickupBackend {
        self.backend.as_ref()
    }

    /// Fails closed when the backing store does not answer a ping.
    pub async fn ensure_available(&self) -> Result<(), PickupError> {
        self.backend.ping().await.map_err(|err| {
            warn!("Backing store ping failed: {}", err);
            PickupError::BackingStoreUnavailable(err)
        })
    }
}
