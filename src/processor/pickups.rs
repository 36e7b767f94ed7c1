use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{Mutation, PickupCache};
use crate::error::PickupError;
use crate::models::{timestamp_now, Location, PickupRecord, PickupStatus};
use crate::queue::WriteQueue;

/// Who is calling. The HTTP layer decides this from the driver passphrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    Driver,
    Rider,
}

#[derive(Debug, Clone, Default)]
pub struct PickupRequest {
    pub phone_number: String,
    pub location: Option<Location>,
    pub device_binding: Option<String>,
}

impl PickupRequest {
    fn binding(&self) -> &str {
        self.device_binding.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PickupStats {
    pub uptime_secs: u64,
    pub active_pickups: usize,
    pub cached_pickups: usize,
}

/// Pickup operations served to riders and drivers.
pub struct PickupProcessor {
    cache: Arc<PickupCache>,
    queue: WriteQueue,
    completion_grace: Duration,
    started_at: Instant,
}

impl PickupProcessor {
    pub fn new(cache: Arc<PickupCache>, queue: WriteQueue, completion_grace: Duration) -> Self {
        Self {
            cache,
            queue,
            completion_grace,
            started_at: Instant::now(),
        }
    }

    /// Starts a pickup, or restarts one still held by the same device.
    pub async fn new_pickup(&self, request: PickupRequest) -> Result<PickupRecord, PickupError> {
        // 1. Validate
        let phone_number = validate_phone(&request.phone_number)?;
        let location = request.location.ok_or_else(|| {
            PickupError::InvalidRequest(format!("no location for new pickup {}", phone_number))
        })?;
        let now = timestamp_now();
        let location = Location {
            observed_at: now,
            ..location
        };

        // 2. Someone else may still hold the number
        let existing = self.cache.store().get(&phone_number);
        if let Some(existing) = &existing {
            if !existing.accepts_binding(request.binding()) {
                warn!("New pickup for {} rejected, device binding differs", phone_number);
                return Err(PickupError::BindingMismatch(phone_number));
            }
            // A completed ride keeps its row until it has been archived.
            if existing.status == PickupStatus::Completed {
                return Err(PickupError::InvalidTransition {
                    phone_number,
                    from: PickupStatus::Completed,
                    to: PickupStatus::Pending,
                });
            }
        }

        // 3. Write
        let record = PickupRecord::new(&phone_number, request.binding(), location);
        match existing {
            Some(existing) if existing.is_active() => {
                self.cache
                    .apply_versioned_write(&phone_number, existing.version, Mutation::Replace(record))
                    .await
            }
            _ => {
                self.cache
                    .apply_versioned_write(&phone_number, 0, Mutation::Create(record))
                    .await
            }
        }
    }

    /// Current state of an active pickup, recording the caller's location when
    /// one is supplied. `None` when the phone number has no active pickup.
    pub async fn get_pickup_info(
        &self,
        request: PickupRequest,
        caller: Caller,
    ) -> Result<Option<PickupRecord>, PickupError> {
        let phone_number = validate_phone(&request.phone_number)?;
        let current = match self.cache.store().get(&phone_number) {
            Some(record) if record.is_active() => record,
            _ => return Ok(None),
        };
        self.authorize(&current, &request, caller)?;

        match request.location {
            Some(location) => {
                let location = Location {
                    observed_at: timestamp_now(),
                    ..location
                };
                self.cache
                    .apply_versioned_write(&phone_number, current.version, Mutation::Location(location))
                    .await
                    .map(Some)
            }
            None => Ok(Some(current)),
        }
    }

    pub async fn confirm_pickup(&self, phone_number: &str) -> Result<PickupRecord, PickupError> {
        let phone_number = validate_phone(phone_number)?;
        let current = self.active_record(&phone_number)?;
        match current.status {
            PickupStatus::Pending => {
                self.cache
                    .apply_versioned_write(
                        &phone_number,
                        current.version,
                        Mutation::Status {
                            status: PickupStatus::Confirmed,
                            at: timestamp_now(),
                        },
                    )
                    .await
            }
            PickupStatus::Confirmed => Ok(current),
            from => Err(PickupError::InvalidTransition {
                phone_number,
                from,
                to: PickupStatus::Confirmed,
            }),
        }
    }

    /// Marks the pickup completed. The record stays readable for the
    /// completion grace period so the rider sees the final status, then it is
    /// archived and removed.
    pub async fn complete_pickup(&self, phone_number: &str) -> Result<PickupRecord, PickupError> {
        let phone_number = validate_phone(phone_number)?;
        let current = self.active_record(&phone_number)?;
        match current.status {
            PickupStatus::Pending | PickupStatus::Confirmed => {
                let completed = self
                    .cache
                    .apply_versioned_write(
                        &phone_number,
                        current.version,
                        Mutation::Status {
                            status: PickupStatus::Completed,
                            at: timestamp_now(),
                        },
                    )
                    .await?;
                self.schedule_retirement(&completed);
                Ok(completed)
            }
            PickupStatus::Completed => Ok(current),
            from => Err(PickupError::InvalidTransition {
                phone_number,
                from,
                to: PickupStatus::Completed,
            }),
        }
    }

    pub async fn cancel_pickup(
        &self,
        request: PickupRequest,
        caller: Caller,
    ) -> Result<(), PickupError> {
        let phone_number = validate_phone(&request.phone_number)?;
        let current = self.active_record(&phone_number)?;
        self.authorize(&current, &request, caller)?;
        if current.status == PickupStatus::Completed {
            return Err(PickupError::InvalidTransition {
                phone_number,
                from: PickupStatus::Completed,
                to: PickupStatus::Canceled,
            });
        }
        self.cache.ensure_available().await?;

        let mut canceled = current;
        canceled.latest_time = timestamp_now();
        canceled.device_binding.clear();
        self.queue.archive_and_remove(&canceled, PickupStatus::Canceled)?;
        info!("Pickup {} canceled by {:?}", phone_number, caller);
        Ok(())
    }

    /// Active pickups, for the driver view.
    pub fn pickup_list(&self) -> BTreeMap<String, PickupRecord> {
        let mut pickups = self.cache.store().snapshot();
        pickups.retain(|_, record| record.is_active());
        pickups
    }

    pub fn stats(&self) -> PickupStats {
        let snapshot = self.cache.store().snapshot();
        PickupStats {
            uptime_secs: self.started_at.elapsed().as_secs(),
            active_pickups: snapshot.values().filter(|r| r.is_active()).count(),
            cached_pickups: snapshot.len(),
        }
    }

    fn active_record(&self, phone_number: &str) -> Result<PickupRecord, PickupError> {
        match self.cache.store().get(phone_number) {
            Some(record) if record.is_active() => Ok(record),
            _ => Err(PickupError::RecordNotFound(phone_number.to_string())),
        }
    }

    fn authorize(
        &self,
        record: &PickupRecord,
        request: &PickupRequest,
        caller: Caller,
    ) -> Result<(), PickupError> {
        if caller == Caller::Rider && !record.binding_matches(request.binding()) {
            return Err(PickupError::BindingMismatch(record.phone_number.clone()));
        }
        Ok(())
    }

    fn schedule_retirement(&self, completed: &PickupRecord) {
        let cache = self.cache.clone();
        let queue = self.queue.clone();
        let grace = self.completion_grace;
        let phone_number = completed.phone_number.clone();
        let initial_time = completed.initial_time;

        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            match cache.store().get(&phone_number) {
                Some(record) if record.same_incarnation(initial_time) && record.is_active() => {
                    if let Err(err) = queue.archive_and_remove(&record, PickupStatus::Completed) {
                        warn!("Could not retire completed pickup {}: {}", phone_number, err);
                    }
                }
                _ => debug!("Completed pickup {} already retired", phone_number),
            }
        });
    }
}

/// Phone numbers are stored as exactly ten digits.
fn validate_phone(raw: &str) -> Result<String, PickupError> {
    let phone_number = raw.trim();
    if phone_number.len() == 10 && phone_number.bytes().all(|b| b.is_ascii_digit()) {
        Ok(phone_number.to_string())
    } else {
        Err(PickupError::InvalidRequest(format!(
            "phone number {:?} is not ten digits",
            raw
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResyncOutcome;
    use crate::db::memory::SharedDb;
    use crate::listener::{handle_notification, NotificationOutcome};
    use crate::queue::{self, WriteQueueWorker};
    use crate::sweeper::InactivitySweeper;

    const PHONE: &str = "5551234567";

    fn here() -> Option<Location> {
        Some(Location::new(38.9844, -76.4889, Some(90.0), timestamp_now()))
    }

    fn rider(binding: &str) -> PickupRequest {
        PickupRequest {
            phone_number: PHONE.to_string(),
            location: here(),
            device_binding: Some(binding.to_string()),
        }
    }

    async fn instance(db: &SharedDb, origin: &str) -> (PickupProcessor, WriteQueueWorker) {
        let cache = Arc::new(PickupCache::new(Arc::new(db.connect(origin))));
        cache.resync_all().await.unwrap();
        let (queue, worker) = queue::channel(cache.clone());
        (
            PickupProcessor::new(cache, queue, Duration::from_secs(60)),
            worker,
        )
    }

    #[tokio::test]
    async fn new_pickup_starts_pending_at_version_zero() {
        let db = SharedDb::new();
        let (processor, _worker) = instance(&db, "a").await;

        let record = processor.new_pickup(rider("device-a")).await.unwrap();
        assert_eq!(record.status, PickupStatus::Pending);
        assert_eq!(record.version, 0);
        assert_eq!(record.latest_location.heading(), Some(90.0));
        assert_eq!(db.live(PHONE).unwrap(), record);
    }

    #[tokio::test]
    async fn new_pickup_rejects_bad_input() {
        let db = SharedDb::new();
        let (processor, _worker) = instance(&db, "a").await;

        let mut short = rider("device-a");
        short.phone_number = "555123".into();
        assert!(matches!(
            processor.new_pickup(short).await,
            Err(PickupError::InvalidRequest(_))
        ));

        let mut nowhere = rider("device-a");
        nowhere.location = None;
        assert!(matches!(
            processor.new_pickup(nowhere).await,
            Err(PickupError::InvalidRequest(_))
        ));
        assert!(db.live(PHONE).is_none());
    }

    #[tokio::test]
    async fn other_device_cannot_take_over_active_pickup() {
        let db = SharedDb::new();
        let (processor, _worker) = instance(&db, "a").await;
        processor.new_pickup(rider("device-a")).await.unwrap();

        let err = processor.new_pickup(rider("device-b")).await.unwrap_err();
        assert_eq!(err.response_code(), -2);

        // Same device relaunching replaces the request in place.
        let relaunched = processor.new_pickup(rider("device-a")).await.unwrap();
        assert_eq!(relaunched.version, 1);
        assert_eq!(relaunched.status, PickupStatus::Pending);
    }

    #[tokio::test]
    async fn get_pickup_info_checks_binding_and_records_location() {
        let db = SharedDb::new();
        let (processor, _worker) = instance(&db, "a").await;
        assert!(processor
            .get_pickup_info(rider("device-a"), Caller::Rider)
            .await
            .unwrap()
            .is_none());

        processor.new_pickup(rider("device-a")).await.unwrap();

        let err = processor
            .get_pickup_info(rider("device-b"), Caller::Rider)
            .await
            .unwrap_err();
        assert!(matches!(err, PickupError::BindingMismatch(_)));

        let seen = processor
            .get_pickup_info(rider("device-a"), Caller::Rider)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen.version, 1);

        let driver_view = PickupRequest {
            phone_number: PHONE.into(),
            ..Default::default()
        };
        let seen = processor
            .get_pickup_info(driver_view, Caller::Driver)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen.version, 1);
    }

    #[tokio::test]
    async fn stale_confirm_resyncs_to_winner() {
        let db = SharedDb::new();
        let (a, _wa) = instance(&db, "a").await;
        a.new_pickup(rider("device-a")).await.unwrap();
        let (b, _wb) = instance(&db, "b").await;

        let confirmed = a.confirm_pickup(PHONE).await.unwrap();
        assert_eq!(confirmed.version, 1);

        let err = b.confirm_pickup(PHONE).await.unwrap_err();
        assert!(matches!(
            err,
            PickupError::StaleVersionConflict {
                expected_version: 0,
                ..
            }
        ));
        let seen = b.pickup_list().remove(PHONE).unwrap();
        assert_eq!(seen.version, 1);
        assert_eq!(seen.status, PickupStatus::Confirmed);

        // The retry now sees the winner's state.
        assert_eq!(b.confirm_pickup(PHONE).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn status_changes_need_an_active_pickup() {
        let db = SharedDb::new();
        let (processor, _worker) = instance(&db, "a").await;
        assert!(matches!(
            processor.confirm_pickup(PHONE).await,
            Err(PickupError::RecordNotFound(_))
        ));

        processor.new_pickup(rider("device-a")).await.unwrap();
        processor.complete_pickup(PHONE).await.unwrap();
        assert!(matches!(
            processor.confirm_pickup(PHONE).await,
            Err(PickupError::InvalidTransition {
                from: PickupStatus::Completed,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn completed_pickup_is_archived_after_grace() {
        let db = SharedDb::new();
        let (processor, mut worker) = instance(&db, "a").await;
        processor.new_pickup(rider("device-a")).await.unwrap();
        processor.confirm_pickup(PHONE).await.unwrap();

        let completed = processor.complete_pickup(PHONE).await.unwrap();
        assert!(completed.complete_time.is_some());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(worker.run_pending().await, 0);
        let seen = processor
            .get_pickup_info(rider("device-a"), Caller::Rider)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen.status, PickupStatus::Completed);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(worker.run_pending().await, 1);
        assert!(db.live(PHONE).is_none());
        let archived = db.archived(PHONE);
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].status, PickupStatus::Completed);
        assert!(processor.pickup_list().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn completed_ride_is_archived_before_number_is_reused() {
        let db = SharedDb::new();
        let (processor, mut worker) = instance(&db, "a").await;
        processor.new_pickup(rider("device-a")).await.unwrap();
        processor.confirm_pickup(PHONE).await.unwrap();
        let completed = processor.complete_pickup(PHONE).await.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(matches!(
            processor.new_pickup(rider("device-a")).await,
            Err(PickupError::InvalidTransition {
                from: PickupStatus::Completed,
                to: PickupStatus::Pending,
                ..
            })
        ));
        assert!(matches!(
            processor.cancel_pickup(rider("device-a"), Caller::Rider).await,
            Err(PickupError::InvalidTransition {
                from: PickupStatus::Completed,
                to: PickupStatus::Canceled,
                ..
            })
        ));
        assert_eq!(db.live(PHONE).unwrap().initial_time, completed.initial_time);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(worker.run_pending().await, 1);
        let archived = db.archived(PHONE);
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].status, PickupStatus::Completed);
        assert_eq!(archived[0].initial_time, completed.initial_time);

        let fresh = processor.new_pickup(rider("device-a")).await.unwrap();
        assert_eq!(fresh.version, 0);
        assert_eq!(fresh.status, PickupStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_completion_demotes_other_instance_after_grace() {
        let db = SharedDb::new();
        let (a, mut worker_a) = instance(&db, "shuttle-a").await;
        a.new_pickup(rider("device-a")).await.unwrap();
        let (b, _worker_b) = instance(&db, "shuttle-b").await;
        db.take_notifications();

        a.complete_pickup(PHONE).await.unwrap();
        for payload in db.take_notifications() {
            handle_notification(&b.cache, "shuttle-b", &payload).await;
        }
        let polling = PickupRequest {
            location: None,
            ..rider("device-a")
        };
        let seen = b
            .get_pickup_info(polling, Caller::Rider)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen.status, PickupStatus::Completed);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(worker_a.run_pending().await, 1);
        assert_eq!(db.archived(PHONE)[0].status, PickupStatus::Completed);

        let mut outcomes = Vec::new();
        for payload in db.take_notifications() {
            outcomes.push(handle_notification(&b.cache, "shuttle-b", &payload).await);
        }
        assert_eq!(
            outcomes,
            vec![NotificationOutcome::Resynced(ResyncOutcome::Demoted)]
        );
        let demoted = b.cache.store().get(PHONE).unwrap();
        assert_eq!(demoted.status, PickupStatus::Inactive);
        assert!(demoted.device_binding.is_empty());
        assert!(b
            .get_pickup_info(rider("device-a"), Caller::Rider)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn cancel_archives_and_new_request_restarts_at_zero() {
        let db = SharedDb::new();
        let (processor, mut worker) = instance(&db, "a").await;
        processor.new_pickup(rider("device-a")).await.unwrap();
        processor.confirm_pickup(PHONE).await.unwrap();

        let err = processor
            .cancel_pickup(rider("device-b"), Caller::Rider)
            .await
            .unwrap_err();
        assert_eq!(err.response_code(), -2);

        processor
            .cancel_pickup(rider("device-a"), Caller::Rider)
            .await
            .unwrap();
        assert!(processor.pickup_list().is_empty());
        worker.run_pending().await;
        assert_eq!(db.archived(PHONE)[0].status, PickupStatus::Canceled);

        let fresh = processor.new_pickup(rider("device-b")).await.unwrap();
        assert_eq!(fresh.version, 0);
        assert_eq!(fresh.status, PickupStatus::Pending);
    }

    #[tokio::test]
    async fn cancel_of_unknown_pickup_is_not_found() {
        let db = SharedDb::new();
        let (processor, _worker) = instance(&db, "a").await;
        let driver = PickupRequest {
            phone_number: PHONE.into(),
            ..Default::default()
        };
        assert!(matches!(
            processor.cancel_pickup(driver, Caller::Driver).await,
            Err(PickupError::RecordNotFound(_))
        ));
    }

    #[tokio::test]
    async fn swept_pickup_is_no_longer_reported() {
        let db = SharedDb::new();
        let twelve_minutes_ago = timestamp_now() - chrono::Duration::minutes(12);
        let location = Location::new(38.9844, -76.4889, None, twelve_minutes_ago);
        db.seed(PickupRecord::new(PHONE, "device-a", location));

        let cache = Arc::new(PickupCache::new(Arc::new(db.connect("a"))));
        cache.resync_all().await.unwrap();
        let (queue, mut worker) = queue::channel(cache.clone());
        let processor = PickupProcessor::new(cache.clone(), queue.clone(), Duration::from_secs(60));
        let sweeper = InactivitySweeper::new(
            cache.clone(),
            queue,
            Duration::from_secs(30),
            Duration::from_secs(600),
        );

        assert_eq!(sweeper.sweep_once(timestamp_now()), 1);
        assert!(cache.store().get(PHONE).unwrap().device_binding.is_empty());
        assert!(processor
            .get_pickup_info(rider("device-a"), Caller::Rider)
            .await
            .unwrap()
            .is_none());

        worker.run_pending().await;
        assert!(db.live(PHONE).is_none());
    }

    #[tokio::test]
    async fn stats_count_active_pickups() {
        let db = SharedDb::new();
        let (processor, _worker) = instance(&db, "a").await;
        processor.new_pickup(rider("device-a")).await.unwrap();

        let stats = processor.stats();
        assert_eq!(stats.active_pickups, 1);
        assert_eq!(stats.cached_pickups, 1);
    }
}
