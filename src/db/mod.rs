use anyhow::Result;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use crate::config::AppConfig;

pub mod backend;
#[cfg(test)]
pub mod memory;
pub mod postgres;
pub mod queries;

pub use backend::PickupBackend;
pub use postgres::PgBackend;

pub type DbPool = Pool<Postgres>;

/// Origin tag identifying this process's writes in change notifications.
pub fn origin_tag() -> String {
    format!("shuttle-{}", Uuid::new_v4().simple())
}

/// Every pooled connection reports `origin` as its `application_name`, which
/// the notify trigger copies into each payload.
pub async fn init_pool(config: &AppConfig, origin: &str) -> Result<DbPool> {
    let options = PgConnectOptions::from_str(&config.database_url)?.application_name(origin);
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

pub async fn ensure_schema(pool: &DbPool) -> Result<()> {
    for statement in [
        queries::CREATE_INPROGRESS_TABLE,
        queries::CREATE_INPROGRESS_PHONE_INDEX,
        queries::CREATE_PASTPICKUPS_TABLE,
        queries::CREATE_NOTIFY_FUNCTION,
        queries::DROP_NOTIFY_TRIGGER,
        queries::CREATE_NOTIFY_TRIGGER,
    ] {
        sqlx::query(statement).execute(pool).await?;
    }
    info!("Pickup tables and change trigger ready");
    Ok(())
}
