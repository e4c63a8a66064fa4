use crate::database::local::settings as db;
use crate::database::remote::{SupabaseClient, SupabaseGateway, SyncError};
use crate::models::{format_timestamp, parse_timestamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::time::Duration;

pub const URL_ENV: &str = "GYM_SYNC_SUPABASE_URL";
pub const KEY_ENV: &str = "GYM_SYNC_SUPABASE_KEY";
pub const TOKEN_ENV: &str = "GYM_SYNC_ACCESS_TOKEN";

const LAST_SYNC_AT: &str = "last_sync_at";
const LAST_ERROR: &str = "last_error";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Failed replays allowed before an entry is parked
    pub max_retries: u32,
    /// Upper bound on a single remote call
    pub request_timeout: Duration,
    pub auto_sync_interval: Duration,
    pub probe_interval: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            request_timeout: Duration::from_millis(15_000),
            auto_sync_interval: Duration::from_secs(300),
            probe_interval: Duration::from_secs(30),
        }
    }
}

pub async fn load_sync_settings(pool: &SqlitePool) -> Result<SyncSettings, String> {
    let map = db::get_all_settings(pool).await?;
    let defaults = SyncSettings::default();

    Ok(SyncSettings {
        max_retries: map
            .get("max_retries")
            .and_then(|v| v.parse::<u32>().ok())
            .map(|v| v.max(1))
            .unwrap_or(defaults.max_retries),
        request_timeout: map
            .get("request_timeout_ms")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.request_timeout),
        auto_sync_interval: map
            .get("auto_sync_interval_secs")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.auto_sync_interval),
        probe_interval: map
            .get("probe_interval_secs")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.probe_interval),
    })
}

/// Persist the outcome of the latest sync run. `error = None` clears any
/// previous error.
pub async fn record_sync_outcome(
    pool: &SqlitePool,
    at: DateTime<Utc>,
    error: Option<&str>,
) -> Result<(), String> {
    db::update_setting(pool, LAST_SYNC_AT, &format_timestamp(at)).await?;
    match error {
        Some(message) => db::update_setting(pool, LAST_ERROR, message).await,
        None => db::remove_setting(pool, LAST_ERROR).await,
    }
}

pub async fn load_sync_outcome(
    pool: &SqlitePool,
) -> Result<(Option<DateTime<Utc>>, Option<String>), String> {
    let last_sync_at = db::get_setting(pool, LAST_SYNC_AT)
        .await?
        .map(|v| parse_timestamp(&v))
        .transpose()?;
    let last_error = db::get_setting(pool, LAST_ERROR).await?;

    Ok((last_sync_at, last_error))
}

/// Connection details for the remote store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub url: String,
    pub anon_key: String,
    pub access_token: Option<String>,
}

impl RemoteConfig {
    /// Gateway for this remote; requests give up after `timeout`.
    pub fn gateway(&self, timeout: Duration) -> Result<SupabaseGateway, SyncError> {
        let client = SupabaseClient::new(
            self.url.clone(),
            self.anon_key.clone(),
            self.access_token.clone().filter(|t| !t.is_empty()),
            timeout,
        )?;
        Ok(SupabaseGateway::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::local::init_memory_db;

    #[tokio::test]
    async fn defaults_when_unset() {
        let db = init_memory_db().await.unwrap();
        assert_eq!(
            load_sync_settings(&db.0).await.unwrap(),
            SyncSettings::default()
        );
    }

    #[tokio::test]
    async fn stored_values_override_defaults() {
        let db = init_memory_db().await.unwrap();
        db::update_setting(&db.0, "max_retries", "2").await.unwrap();
        db::update_setting(&db.0, "request_timeout_ms", "250").await.unwrap();
        db::update_setting(&db.0, "probe_interval_secs", "not a number")
            .await
            .unwrap();

        let settings = load_sync_settings(&db.0).await.unwrap();
        assert_eq!(settings.max_retries, 2);
        assert_eq!(settings.request_timeout, Duration::from_millis(250));
        assert_eq!(settings.probe_interval, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn sync_outcome_round_trip() {
        let db = init_memory_db().await.unwrap();
        assert_eq!(load_sync_outcome(&db.0).await.unwrap(), (None, None));

        let at = Utc::now();
        record_sync_outcome(&db.0, at, Some("sales: timed out"))
            .await
            .unwrap();
        let (last_sync_at, last_error) = load_sync_outcome(&db.0).await.unwrap();
        assert!(last_sync_at.is_some());
        assert_eq!(last_error.as_deref(), Some("sales: timed out"));

        record_sync_outcome(&db.0, at, None).await.unwrap();
        assert_eq!(load_sync_outcome(&db.0).await.unwrap().1, None);
    }

    #[test]
    fn remote_config_builds_a_gateway() {
        let config = RemoteConfig {
            url: "https://example.supabase.co/".to_string(),
            anon_key: "anon".to_string(),
            access_token: Some(String::new()),
        };
        assert!(config.gateway(Duration::from_secs(5)).is_ok());
    }
}
