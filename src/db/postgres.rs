use async_trait::async_trait;
use chrono::NaiveDateTime;
use futures::TryStreamExt;
use tracing::debug;

use super::queries;
use super::DbPool;
use crate::db::PickupBackend;
use crate::error::BackendError;
use crate::models::{PickupRecord, PickupRow};

/// `PickupBackend` over the shared Postgres pool.
#[derive(Clone)]
pub struct PgBackend {
    pool: DbPool,
}

impl PgBackend {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PickupBackend for PgBackend {
    async fn ping(&self) -> Result<(), BackendError> {
        sqlx::query(queries::PING).execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_live(&self, record: &PickupRecord) -> Result<u64, BackendError> {
        let result = sqlx::query(queries::INSERT_LIVE_PICKUP)
            .bind(&record.phone_number)
            .bind(&record.device_binding)
            .bind(record.initial_location.latitude)
            .bind(record.initial_location.longitude)
            .bind(record.initial_location.heading)
            .bind(record.initial_time)
            .bind(record.latest_location.latitude)
            .bind(record.latest_location.longitude)
            .bind(record.latest_location.heading)
            .bind(record.latest_time)
            .bind(record.confirm_time)
            .bind(record.complete_time)
            .bind(record.status.code())
            .execute(&self.pool)
            .await?;
        debug!("INSERT {} rows affected for {}", result.rows_affected(), record.phone_number);
        Ok(result.rows_affected())
    }

    async fn replace_live(
        &self,
        record: &PickupRecord,
        expected_version: i64,
    ) -> Result<u64, BackendError> {
        let result = sqlx::query(queries::REPLACE_LIVE_PICKUP)
            .bind(&record.phone_number)
            .bind(&record.device_binding)
            .bind(record.initial_location.latitude)
            .bind(record.initial_location.longitude)
            .bind(record.initial_location.heading)
            .bind(record.initial_time)
            .bind(record.latest_location.latitude)
            .bind(record.latest_location.longitude)
            .bind(record.latest_location.heading)
            .bind(record.latest_time)
            .bind(record.confirm_time)
            .bind(record.complete_time)
            .bind(record.status.code())
            .bind(expected_version)
            .execute(&self.pool)
            .await?;
        debug!("REPLACE {} rows affected for {}", result.rows_affected(), record.phone_number);
        Ok(result.rows_affected())
    }

    async fn update_status(
        &self,
        record: &PickupRecord,
        expected_version: i64,
    ) -> Result<u64, BackendError> {
        let result = sqlx::query(queries::UPDATE_PICKUP_STATUS)
            .bind(&record.phone_number)
            .bind(record.status.code())
            .bind(&record.device_binding)
            .bind(record.confirm_time)
            .bind(record.complete_time)
            .bind(expected_version)
            .execute(&self.pool)
            .await?;
        debug!("UPDATE status {} rows affected for {}", result.rows_affected(), record.phone_number);
        Ok(result.rows_affected())
    }

    async fn update_location(
        &self,
        record: &PickupRecord,
        expected_version: i64,
    ) -> Result<u64, BackendError> {
        let result = sqlx::query(queries::UPDATE_PICKUP_LOCATION)
            .bind(&record.phone_number)
            .bind(record.latest_location.latitude)
            .bind(record.latest_location.longitude)
            .bind(record.latest_location.heading)
            .bind(record.latest_time)
            .bind(expected_version)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn archive(&self, record: &PickupRecord) -> Result<u64, BackendError> {
        let result = sqlx::query(queries::INSERT_PAST_PICKUP)
            .bind(&record.phone_number)
            .bind(&record.device_binding)
            .bind(record.initial_location.latitude)
            .bind(record.initial_location.longitude)
            .bind(record.initial_location.heading)
            .bind(record.initial_time)
            .bind(record.latest_location.latitude)
            .bind(record.latest_location.longitude)
            .bind(record.latest_location.heading)
            .bind(record.latest_time)
            .bind(record.confirm_time)
            .bind(record.complete_time)
            .bind(record.status.code())
            .bind(record.version)
            .execute(&self.pool)
            .await?;
        debug!("INSERT past {} rows affected for {}", result.rows_affected(), record.phone_number);
        Ok(result.rows_affected())
    }

    async fn remove_live(
        &self,
        phone_number: &str,
        initial_time: NaiveDateTime,
    ) -> Result<u64, BackendError> {
        let result = sqlx::query(queries::DELETE_LIVE_PICKUP)
            .bind(phone_number)
            .bind(initial_time)
            .execute(&self.pool)
            .await?;
        debug!("DELETE {} rows affected for {}", result.rows_affected(), phone_number);
        Ok(result.rows_affected())
    }

    async fn archive_live_at_version(&self, record: &PickupRecord) -> Result<u64, BackendError> {
        let result = sqlx::query(queries::ARCHIVE_LIVE_PICKUP_AT_VERSION)
            .bind(&record.phone_number)
            .bind(&record.device_binding)
            .bind(record.initial_location.latitude)
            .bind(record.initial_location.longitude)
            .bind(record.initial_location.heading)
            .bind(record.initial_time)
            .bind(record.latest_location.latitude)
            .bind(record.latest_location.longitude)
            .bind(record.latest_location.heading)
            .bind(record.latest_time)
            .bind(record.confirm_time)
            .bind(record.complete_time)
            .bind(record.status.code())
            .bind(record.version)
            .execute(&self.pool)
            .await?;
        debug!(
            "Archive at version {}: {} rows moved for {}",
            record.version,
            result.rows_affected(),
            record.phone_number
        );
        Ok(result.rows_affected())
    }

    async fn fetch_live(&self, phone_number: &str) -> Result<Vec<PickupRecord>, BackendError> {
        let rows: Vec<PickupRow> = sqlx::query_as(queries::SELECT_LIVE_PICKUP_BY_PHONE)
            .bind(phone_number)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(PickupRecord::from).collect())
    }

    async fn fetch_all_live(&self) -> Result<Vec<PickupRecord>, BackendError> {
        let mut records = Vec::new();
        let mut rows = sqlx::query_as::<_, PickupRow>(queries::SELECT_LIVE_PICKUPS).fetch(&self.pool);
        while let Some(row) = rows.try_next().await? {
            records.push(PickupRecord::from(row));
        }
        Ok(records)
    }
}
