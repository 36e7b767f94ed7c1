//! In-memory stand-in for the shared Postgres store.
//!
//! Several `MemoryBackend` handles can share one `SharedDb`, each with its own
//! origin tag, to model instances racing on the same rows. Writes to the live
//! table queue the JSON payloads the notify trigger would publish.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use serde_json::json;

use crate::db::PickupBackend;
use crate::error::BackendError;
use crate::models::PickupRecord;

struct MemoryDb {
    live: Vec<PickupRecord>,
    archive: Vec<PickupRecord>,
    notifications: Vec<String>,
    available: bool,
    failing_writes: bool,
    rejecting_archives: bool,
}

#[derive(Clone)]
pub struct SharedDb {
    inner: Arc<Mutex<MemoryDb>>,
}

impl SharedDb {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryDb {
                live: Vec::new(),
                archive: Vec::new(),
                notifications: Vec::new(),
                available: true,
                failing_writes: false,
                rejecting_archives: false,
            })),
        }
    }

    pub fn connect(&self, origin: &str) -> MemoryBackend {
        MemoryBackend {
            db: self.clone(),
            origin: origin.to_string(),
        }
    }

    /// Inserts a row without publishing a notification.
    pub fn seed(&self, record: PickupRecord) {
        self.inner.lock().live.push(record);
    }

    pub fn live(&self, phone_number: &str) -> Option<PickupRecord> {
        self.inner
            .lock()
            .live
            .iter()
            .find(|r| r.phone_number == phone_number)
            .cloned()
    }

    pub fn archived(&self, phone_number: &str) -> Vec<PickupRecord> {
        self.inner
            .lock()
            .archive
            .iter()
            .filter(|r| r.phone_number == phone_number)
            .cloned()
            .collect()
    }

    pub fn take_notifications(&self) -> Vec<String> {
        std::mem::take(&mut self.inner.lock().notifications)
    }

    pub fn set_available(&self, available: bool) {
        self.inner.lock().available = available;
    }

    pub fn fail_writes(&self, failing: bool) {
        self.inner.lock().failing_writes = failing;
    }

    /// Archive inserts succeed but report no rows affected.
    pub fn reject_archives(&self, rejecting: bool) {
        self.inner.lock().rejecting_archives = rejecting;
    }
}

pub struct MemoryBackend {
    db: SharedDb,
    origin: String,
}

impl MemoryBackend {
    fn write<F>(&self, operation: &str, phone_number: &str, apply: F) -> Result<u64, BackendError>
    where
        F: FnOnce(&mut MemoryDb) -> u64,
    {
        let mut db = self.db.inner.lock();
        if !db.available || db.failing_writes {
            return Err(BackendError::Unavailable("write rejected".into()));
        }
        let affected = apply(&mut *db);
        for _ in 0..affected {
            db.notifications.push(
                json!({
                    "phone_number": phone_number,
                    "origin": self.origin,
                    "operation": operation,
                })
                .to_string(),
            );
        }
        Ok(affected)
    }

    fn versioned<F>(
        &self,
        record: &PickupRecord,
        expected_version: i64,
        apply: F,
    ) -> Result<u64, BackendError>
    where
        F: FnOnce(&mut PickupRecord),
    {
        self.write("UPDATE", &record.phone_number, |db| {
            match db
                .live
                .iter_mut()
                .find(|r| r.phone_number == record.phone_number && r.version == expected_version)
            {
                Some(row) => {
                    apply(row);
                    row.version = expected_version + 1;
                    1
                }
                None => 0,
            }
        })
    }
}

#[async_trait]
impl PickupBackend for MemoryBackend {
    async fn ping(&self) -> Result<(), BackendError> {
        if self.db.inner.lock().available {
            Ok(())
        } else {
            Err(BackendError::Unavailable("ping failed".into()))
        }
    }

    async fn insert_live(&self, record: &PickupRecord) -> Result<u64, BackendError> {
        self.write("INSERT", &record.phone_number, |db| {
            if db.live.iter().any(|r| r.phone_number == record.phone_number) {
                return 0;
            }
            let mut row = record.clone();
            row.version = 0;
            db.live.push(row);
            1
        })
    }

    async fn replace_live(
        &self,
        record: &PickupRecord,
        expected_version: i64,
    ) -> Result<u64, BackendError> {
        self.versioned(record, expected_version, |row| *row = record.clone())
    }

    async fn update_status(
        &self,
        record: &PickupRecord,
        expected_version: i64,
    ) -> Result<u64, BackendError> {
        self.versioned(record, expected_version, |row| {
            row.status = record.status;
            row.device_binding = record.device_binding.clone();
            row.confirm_time = record.confirm_time;
            row.complete_time = record.complete_time;
        })
    }

    async fn update_location(
        &self,
        record: &PickupRecord,
        expected_version: i64,
    ) -> Result<u64, BackendError> {
        self.versioned(record, expected_version, |row| {
            row.latest_location = record.latest_location;
            row.latest_time = record.latest_time;
        })
    }

    async fn archive(&self, record: &PickupRecord) -> Result<u64, BackendError> {
        let mut db = self.db.inner.lock();
        if !db.available || db.failing_writes {
            return Err(BackendError::Unavailable("write rejected".into()));
        }
        if db.rejecting_archives {
            return Ok(0);
        }
        db.archive.push(record.clone());
        Ok(1)
    }

    async fn remove_live(
        &self,
        phone_number: &str,
        initial_time: NaiveDateTime,
    ) -> Result<u64, BackendError> {
        self.write("DELETE", phone_number, |db| {
            let before = db.live.len();
            db.live
                .retain(|r| !(r.phone_number == phone_number && r.initial_time == initial_time));
            (before - db.live.len()) as u64
        })
    }

    async fn archive_live_at_version(&self, record: &PickupRecord) -> Result<u64, BackendError> {
        self.write("DELETE", &record.phone_number, |db| {
            let before = db.live.len();
            db.live.retain(|r| {
                !(r.phone_number == record.phone_number
                    && r.initial_time == record.initial_time
                    && r.version == record.version)
            });
            let moved = (before - db.live.len()) as u64;
            if moved > 0 {
                db.archive.push(record.clone());
            }
            moved
        })
    }

    async fn fetch_live(&self, phone_number: &str) -> Result<Vec<PickupRecord>, BackendError> {
        let db = self.db.inner.lock();
        if !db.available {
            return Err(BackendError::Unavailable("query failed".into()));
        }
        Ok(db
            .live
            .iter()
            .filter(|r| r.phone_number == phone_number)
            .cloned()
            .collect())
    }

    async fn fetch_all_live(&self) -> Result<Vec<PickupRecord>, BackendError> {
        let db = self.db.inner.lock();
        if !db.available {
            return Err(BackendError::Unavailable("query failed".into()));
        }
        Ok(db.live.clone())
    }
}
