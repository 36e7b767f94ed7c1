use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::error::BackendError;
use crate::models::PickupRecord;

/// Row-level operations on the shared relational store.
///
/// Every write returns the number of rows the store reports as affected.
/// Versioned writes match `phone_number` and `expected_version` and advance the
/// stored version to `expected_version + 1`; callers treat `0` as a lost race.
#[async_trait]
pub trait PickupBackend: Send + Sync {
    async fn ping(&self) -> Result<(), BackendError>;

    /// Inserts `record` at version 0 unless the phone number already has a live row.
    async fn insert_live(&self, record: &PickupRecord) -> Result<u64, BackendError>;

    /// Overwrites every column of the live row.
    async fn replace_live(
        &self,
        record: &PickupRecord,
        expected_version: i64,
    ) -> Result<u64, BackendError>;

    /// Writes status, device binding and the confirm/complete timestamps.
    async fn update_status(
        &self,
        record: &PickupRecord,
        expected_version: i64,
    ) -> Result<u64, BackendError>;

    /// Writes the latest location and time.
    async fn update_location(
        &self,
        record: &PickupRecord,
        expected_version: i64,
    ) -> Result<u64, BackendError>;

    /// Copies `record` into `pastpickups` as-is.
    async fn archive(&self, record: &PickupRecord) -> Result<u64, BackendError>;

    /// Deletes the live row created at `initial_time`. Never versioned.
    async fn remove_live(
        &self,
        phone_number: &str,
        initial_time: NaiveDateTime,
    ) -> Result<u64, BackendError>;

    /// Moves the live row into `pastpickups` as `record` in one statement,
    /// only while the row is still the incarnation and version `record` was
    /// read at. Nothing is archived when the row has moved on.
    async fn archive_live_at_version(&self, record: &PickupRecord) -> Result<u64, BackendError>;

    async fn fetch_live(&self, phone_number: &str) -> Result<Vec<PickupRecord>, BackendError>;

    async fn fetch_all_live(&self) -> Result<Vec<PickupRecord>, BackendError>;
}
