use chrono::NaiveDateTime;
use tracing::{info, warn};

use super::PickupCache;
use crate::error::PickupError;
use crate::models::{Location, PickupRecord, PickupStatus};

/// State change applied to one phone number under a version check.
#[derive(Debug, Clone)]
pub enum Mutation {
    /// First request for a phone number with no live row. Lands at version 0.
    Create(PickupRecord),
    /// New request over a still-live row, e.g. after an app relaunch.
    Replace(PickupRecord),
    Status {
        status: PickupStatus,
        at: NaiveDateTime,
    },
    Location(Location),
}

impl Mutation {
    fn label(&self) -> &'static str {
        match self {
            Mutation::Create(_) => "create",
            Mutation::Replace(_) => "replace",
            Mutation::Status { .. } => "status",
            Mutation::Location(_) => "location",
        }
    }

    /// Computes the record as it should read once the write is accepted.
    fn next_record(
        &self,
        current: Option<PickupRecord>,
        phone_number: &str,
        expected_version: i64,
    ) -> Result<PickupRecord, PickupError> {
        let mut next = match (self, current) {
            (Mutation::Create(record), _) => {
                let mut record = record.clone();
                record.version = 0;
                return Ok(record);
            }
            (_, None) => return Err(PickupError::RecordNotFound(phone_number.to_string())),
            (Mutation::Replace(record), Some(_)) => record.clone(),
            (Mutation::Status { status, at }, Some(mut current)) => {
                current.status = *status;
                match status {
                    PickupStatus::Confirmed => current.confirm_time = Some(*at),
                    PickupStatus::Completed => current.complete_time = Some(*at),
                    _ => {}
                }
                current
            }
            (Mutation::Location(location), Some(mut current)) => {
                current.latest_location = *location;
                current.latest_time = location.observed_at;
                current
            }
        };
        next.version = expected_version + 1;
        Ok(next)
    }
}

impl PickupCache {
    /// Writes `mutation` for `phone_number` if the backing store still holds
    /// `expected_version`, then commits the result with the advanced version.
    ///
    /// A write that affects no rows, or that fails outright, is treated as a
    /// lost race: the key is resynced and `StaleVersionConflict` is returned.
    /// Nothing is retried here; the client drives retries.
    pub async fn apply_versioned_write(
        &self,
        phone_number: &str,
        expected_version: i64,
        mutation: Mutation,
    ) -> Result<PickupRecord, PickupError> {
        if let Mutation::Create(record) | Mutation::Replace(record) = &mutation {
            if record.phone_number != phone_number {
                return Err(PickupError::InvalidRequest(format!(
                    "record for {} written under {}",
                    record.phone_number, phone_number
                )));
            }
        }

        self.ensure_available().await?;

        let next = mutation.next_record(self.store.get(phone_number), phone_number, expected_version)?;

        let written = match &mutation {
            Mutation::Create(_) => self.backend.insert_live(&next).await,
            Mutation::Replace(_) => self.backend.replace_live(&next, expected_version).await,
            Mutation::Status { .. } => self.backend.update_status(&next, expected_version).await,
            Mutation::Location(_) => self.backend.update_location(&next, expected_version).await,
        };

        match written {
            Ok(rows) if rows > 0 => {
                if !matches!(mutation, Mutation::Location(_)) {
                    info!(
                        "OK - {} {} now at version {}",
                        phone_number,
                        mutation.label(),
                        next.version
                    );
                }
                self.store.commit(next.clone());
                Ok(next)
            }
            Ok(_) => {
                warn!(
                    "0 rows affected for {} {} at version {}. Instance had a stale entry.",
                    mutation.label(),
                    phone_number,
                    expected_version
                );
                self.resync_after_conflict(phone_number).await;
                Err(PickupError::StaleVersionConflict {
                    phone_number: phone_number.to_string(),
                    expected_version,
                })
            }
            Err(err) => {
                warn!(
                    "{} write for {} failed ({}). Treating as stale.",
                    mutation.label(),
                    phone_number,
                    err
                );
                self.resync_after_conflict(phone_number).await;
                Err(PickupError::StaleVersionConflict {
                    phone_number: phone_number.to_string(),
                    expected_version,
                })
            }
        }
    }

    async fn resync_after_conflict(&self, phone_number: &str) {
        if let Err(err) = self.resync(phone_number).await {
            warn!("Resync after conflict on {} failed: {}", phone_number, err);
        }
    }
}
