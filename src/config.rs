use anyhow::Result;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for every `*_SECS` setting: one year.
const MAX_PERIOD_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub log_level: String,
    pub sweep_interval_secs: u64,
    pub inactivity_threshold_secs: u64,
    pub completion_grace_secs: u64,
    pub listener_ping_interval_secs: u64,
    pub listener_max_silence_secs: u64,
    pub listener_reconnect_min_secs: u64,
    pub listener_reconnect_max_secs: u64,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let database_url = match lookup("DATABASE_URL") {
            Some(url) => url,
            None => {
                let db_host = var("DB_HOST", "localhost");
                let db_port = var("DB_PORT", "5432");
                let db_name = var("DB_DATABASE", "shuttle");
                let db_user = var("DB_USER", "shuttle");
                let db_pwd = var("DB_PWD", "shuttle");
                format!(
                    "postgres://{}:{}@{}:{}/{}",
                    db_user, db_pwd, db_host, db_port, db_name
                )
            }
        };

        let log_level = var("LOG_LEVEL", "info");

        let config = Self {
            database_url,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 50),
            log_level,
            sweep_interval_secs: parse_period(&lookup, "SWEEP_INTERVAL_SECS", 30, 1)?,
            inactivity_threshold_secs: parse_period(&lookup, "INACTIVITY_THRESHOLD_SECS", 300, 1)?,
            completion_grace_secs: parse_period(&lookup, "COMPLETION_GRACE_SECS", 60, 0)?,
            listener_ping_interval_secs: parse_period(&lookup, "LISTENER_PING_INTERVAL_SECS", 30, 1)?,
            listener_max_silence_secs: parse_period(&lookup, "LISTENER_MAX_SILENCE_SECS", 10, 1)?,
            listener_reconnect_min_secs: parse_period(&lookup, "LISTENER_RECONNECT_MIN_SECS", 10, 1)?,
            listener_reconnect_max_secs: parse_period(&lookup, "LISTENER_RECONNECT_MAX_SECS", 60, 1)?,
        };

        if config.listener_reconnect_min_secs > config.listener_reconnect_max_secs {
            anyhow::bail!(
                "LISTENER_RECONNECT_MIN_SECS ({}) exceeds LISTENER_RECONNECT_MAX_SECS ({})",
                config.listener_reconnect_min_secs,
                config.listener_reconnect_max_secs
            );
        }

        Ok(config)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn inactivity_threshold(&self) -> Duration {
        Duration::from_secs(self.inactivity_threshold_secs)
    }

    pub fn completion_grace(&self) -> Duration {
        Duration::from_secs(self.completion_grace_secs)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

/// Seconds setting that must fall within `min..=MAX_PERIOD_SECS`.
fn parse_period<F>(lookup: &F, key: &str, default: u64, min: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let secs: u64 = parse_or(lookup, key, default);
    if secs < min || secs > MAX_PERIOD_SECS {
        anyhow::bail!(
            "{} must be between {} and {} seconds, got {}",
            key,
            min,
            MAX_PERIOD_SECS,
            secs
        );
    }
    Ok(secs)
}
