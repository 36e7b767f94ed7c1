use thiserror::Error;

use crate::models::PickupStatus;

/// Failures raised by a backing store implementation.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("backing store unavailable: {0}")]
    Unavailable(String),
}

/// Error surface of the pickup cache and the operations built on it.
#[derive(Debug, Error)]
pub enum PickupError {
    /// Another writer advanced the row first. The key has already been resynced.
    #[error("stale version {expected_version} for {phone_number}")]
    StaleVersionConflict {
        phone_number: String,
        expected_version: i64,
    },

    #[error("backing store unavailable: {0}")]
    BackingStoreUnavailable(#[source] BackendError),

    #[error("no active pickup for {0}")]
    RecordNotFound(String),

    #[error("device binding does not match pickup for {0}")]
    BindingMismatch(String),

    #[error("pickup {phone_number} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        phone_number: String,
        from: PickupStatus,
        to: PickupStatus,
    },

    /// `pastpickups` reported no row written for the archive copy.
    #[error("archive of {0} wrote no rows")]
    ArchiveRejected(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("notification channel lost: {0}")]
    NotificationChannelLost(String),

    #[error("write queue closed")]
    QueueClosed,
}

impl PickupError {
    /// Status code the HTTP layer writes into its `{"status": ..}` body.
    pub fn response_code(&self) -> i32 {
        match self {
            PickupError::BindingMismatch(_) => -2,
            _ => -1,
        }
    }
}

impl From<BackendError> for PickupError {
    fn from(err: BackendError) -> Self {
        PickupError::BackingStoreUnavailable(err)
    }
}
