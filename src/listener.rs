//! LISTEN/NOTIFY subscriber that keeps this instance's cache in step with
//! writes made by other instances.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use sqlx::postgres::PgListener;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::cache::{PickupCache, ResyncOutcome};
use crate::config::AppConfig;
use crate::db::{queries, DbPool};
use crate::error::PickupError;

/// Payload published by the `inprogress` trigger.
#[derive(Debug, Deserialize)]
pub struct ChangeNotification {
    pub phone_number: String,
    pub origin: String,
    pub operation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationOutcome {
    IgnoredSelf,
    Resynced(ResyncOutcome),
    /// Resync query failed; the cached copy was left as is.
    ResyncFailed,
    Malformed,
}

/// Resyncs the key named in `payload` unless this instance wrote it.
pub async fn handle_notification(
    cache: &PickupCache,
    own_origin: &str,
    payload: &str,
) -> NotificationOutcome {
    let change: ChangeNotification = match serde_json::from_str(payload) {
        Ok(change) => change,
        Err(err) => {
            warn!("Unreadable change notification {:?}: {}", payload, err);
            return NotificationOutcome::Malformed;
        }
    };

    if change.origin == own_origin {
        return NotificationOutcome::IgnoredSelf;
    }

    let phone_number = change.phone_number.trim();
    info!(
        "{} on {} from {}, resyncing",
        change.operation, phone_number, change.origin
    );
    match cache.resync(phone_number).await {
        Ok(outcome) => NotificationOutcome::Resynced(outcome),
        Err(err) => {
            error!("Resync of {} after notification failed: {}", phone_number, err);
            NotificationOutcome::ResyncFailed
        }
    }
}

/// Exponential backoff from `min`, doubling per attempt, capped at `max`.
pub fn reconnect_delay(attempt: u32, min: Duration, max: Duration) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    min.saturating_mul(factor).min(max)
}

#[derive(Debug, Clone, Copy)]
pub struct ListenerSettings {
    pub ping_interval: Duration,
    pub max_silence: Duration,
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
}

impl ListenerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            ping_interval: Duration::from_secs(config.listener_ping_interval_secs),
            max_silence: Duration::from_secs(config.listener_max_silence_secs),
            reconnect_min: Duration::from_secs(config.listener_reconnect_min_secs),
            reconnect_max: Duration::from_secs(config.listener_reconnect_max_secs),
        }
    }
}

/// Identity of the listening session, read back from the server.
#[derive(Debug, Clone)]
struct SessionIdentity {
    origin: String,
    pid: i32,
}

pub struct ChangeListener {
    pool: DbPool,
    cache: Arc<PickupCache>,
    origin: String,
    settings: ListenerSettings,
}

impl ChangeListener {
    pub fn new(
        pool: DbPool,
        cache: Arc<PickupCache>,
        origin: String,
        settings: ListenerSettings,
    ) -> Self {
        Self {
            pool,
            cache,
            origin,
            settings,
        }
    }

    /// Listens until shutdown, reconnecting with backoff whenever the
    /// connection is lost. Every new subscription reloads the whole live
    /// table, since changes made while unsubscribed were never announced.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), PickupError> {
        let mut attempt: u32 = 0;
        loop {
            let connected = tokio::select! {
                connected = self.connect() => connected,
                _ = shutdown.recv() => break,
            };

            match connected {
                Ok((listener, session)) => {
                    attempt = 0;
                    info!(
                        "Listening on {} as {} (pid {})",
                        queries::NOTIFY_CHANNEL,
                        session.origin,
                        session.pid
                    );
                    match self.cache.resync_all().await {
                        Ok(loaded) => debug!("Reloaded {} pickups after subscribing", loaded),
                        Err(err) => warn!("Reload after subscribing failed: {}", err),
                    }
                    match self.listen(listener, &session, &mut shutdown).await {
                        Ok(()) => break,
                        Err(err) => warn!("{}", err),
                    }
                }
                Err(err) => error!("Could not subscribe to {}: {}", queries::NOTIFY_CHANNEL, err),
            }

            let delay = reconnect_delay(
                attempt,
                self.settings.reconnect_min,
                self.settings.reconnect_max,
            );
            attempt = attempt.saturating_add(1);
            info!("Reconnecting listener in {:?} (attempt {})", delay, attempt);
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.recv() => break,
            }
        }
        info!("Change listener stopped");
        Ok(())
    }

    async fn connect(&self) -> Result<(PgListener, SessionIdentity), sqlx::Error> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(queries::NOTIFY_CHANNEL).await?;
        let (origin, pid): (String, i32) = sqlx::query_as(queries::SELECT_SESSION_IDENTITY)
            .fetch_one(&mut listener)
            .await?;
        if origin != self.origin {
            warn!(
                "Listener session reports origin {} instead of {}",
                origin, self.origin
            );
        }
        Ok((listener, SessionIdentity { origin, pid }))
    }

    /// Returns `Ok` on shutdown and `NotificationChannelLost` otherwise.
    async fn listen(
        &self,
        mut listener: PgListener,
        session: &SessionIdentity,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), PickupError> {
        loop {
            tokio::select! {
                _ = shutdown.recv() => return Ok(()),
                received = timeout(self.settings.ping_interval, listener.try_recv()) => match received {
                    Ok(Ok(Some(notification))) => {
                        handle_notification(&self.cache, &session.origin, notification.payload()).await;
                    }
                    Ok(Ok(None)) => {
                        return Err(PickupError::NotificationChannelLost(
                            "connection closed".into(),
                        ));
                    }
                    Ok(Err(err)) => {
                        return Err(PickupError::NotificationChannelLost(err.to_string()));
                    }
                    Err(_) => {
                        debug!("No notifications for {:?}, pinging", self.settings.ping_interval);
                        let ping = sqlx::query(queries::PING).execute(&mut listener);
                        match timeout(self.settings.max_silence, ping).await {
                            Ok(Ok(_)) => {}
                            Ok(Err(err)) => {
                                return Err(PickupError::NotificationChannelLost(err.to_string()));
                            }
                            Err(_) => {
                                return Err(PickupError::NotificationChannelLost(format!(
                                    "ping unanswered after {:?}",
                                    self.settings.max_silence
                                )));
                            }
                        }
                    }
                },
            }
        }
    }
}
