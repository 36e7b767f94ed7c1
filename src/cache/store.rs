use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Duration, NaiveDateTime};
use parking_lot::RwLock;

use crate::models::{PickupRecord, PickupStatus};

/// Live pickups believed current by this instance, keyed by phone number.
///
/// No method performs I/O, so the lock is only ever held across map work.
#[derive(Default)]
pub struct RecordStore {
    records: RwLock<HashMap<String, PickupRecord>>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, phone_number: &str) -> Option<PickupRecord> {
        self.records.read().get(phone_number).cloned()
    }

    pub fn put(&self, record: PickupRecord) {
        self.records
            .write()
            .insert(record.phone_number.clone(), record);
    }

    pub fn delete(&self, phone_number: &str) -> Option<PickupRecord> {
        self.records.write().remove(phone_number)
    }

    pub fn snapshot(&self) -> BTreeMap<String, PickupRecord> {
        self.records
            .read()
            .iter()
            .map(|(phone, record)| (phone.clone(), record.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Stores a record confirmed by the backing store. A copy of the same
    /// incarnation that already carries a newer version is kept instead.
    pub fn commit(&self, record: PickupRecord) -> bool {
        let mut records = self.records.write();
        if let Some(existing) = records.get(&record.phone_number) {
            if existing.same_incarnation(record.initial_time) && existing.version > record.version {
                return false;
            }
        }
        records.insert(record.phone_number.clone(), record);
        true
    }

    /// Marks the record inactive and unbinds its device. Returns false when absent.
    pub fn demote(&self, phone_number: &str) -> bool {
        match self.records.write().get_mut(phone_number) {
            Some(record) => {
                record.status = PickupStatus::Inactive;
                record.device_binding.clear();
                true
            }
            None => false,
        }
    }

    /// Removes the record only if it is still the incarnation created at `initial_time`.
    pub fn remove_if_initial(
        &self,
        phone_number: &str,
        initial_time: NaiveDateTime,
    ) -> Option<PickupRecord> {
        let mut records = self.records.write();
        match records.get(phone_number) {
            Some(record) if record.same_incarnation(initial_time) => records.remove(phone_number),
            _ => None,
        }
    }

    /// Loads a full copy of the live table. Keys missing from it are demoted
    /// and newer copies of the same incarnation are kept. Returns how many keys
    /// were demoted.
    pub fn replace_all(&self, live: Vec<PickupRecord>) -> usize {
        let mut records = self.records.write();
        let present: HashSet<String> = live.iter().map(|r| r.phone_number.clone()).collect();
        let mut demoted = 0;
        for (phone, record) in records.iter_mut() {
            if !present.contains(phone) && record.is_active() {
                record.status = PickupStatus::Inactive;
                record.device_binding.clear();
                demoted += 1;
            }
        }
        for record in live {
            if let Some(existing) = records.get(&record.phone_number) {
                if existing.same_incarnation(record.initial_time) && existing.version > record.version {
                    continue;
                }
            }
            records.insert(record.phone_number.clone(), record);
        }
        demoted
    }

    /// Demotes every active record whose latest ping is older than `threshold`
    /// and returns the demoted copies. Versions are left untouched.
    pub fn demote_silent(&self, now: NaiveDateTime, threshold: Duration) -> Vec<PickupRecord> {
        let mut records = self.records.write();
        let mut demoted = Vec::new();
        for record in records.values_mut() {
            if record.is_active() && now - record.latest_time > threshold {
                record.device_binding.clear();
                record.status = PickupStatus::Inactive;
                demoted.push(record.clone());
            }
        }
        demoted
    }
}
