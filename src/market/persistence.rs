use crate::alerts::AlertConfig;
use crate::error::AppError;
use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

pub const ALERT_CONFIG_KEY: &str = "treasury-gold-alerts";

fn now_unix_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), AppError>;
}

pub struct SqliteKvStore {
    pool: SqlitePool,
}

impl SqliteKvStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyValueStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("value")?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO kv_store (key, value, updated_at_ms) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value=excluded.value, updated_at_ms=excluded.updated_at_ms",
        )
        .bind(key)
        .bind(value)
        .bind(now_unix_ms())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn with_entry(key: &str, value: &str) -> Self {
        let store = Self::default();
        store.entries.lock().insert(key.to_string(), value.to_string());
        store
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.raw(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Loads the persisted alert settings. Absent, unreadable or corrupt values
/// fall back to the default configuration.
pub async fn load_alert_config(store: &dyn KeyValueStore) -> AlertConfig {
    let raw = match store.get(ALERT_CONFIG_KEY).await {
        Ok(Some(raw)) => raw,
        Ok(None) => return AlertConfig::default(),
        Err(error) => {
            tracing::warn!(%error, "alert settings unreadable, using defaults");
            return AlertConfig::default();
        }
    };

    let mut bytes = raw.into_bytes();
    match simd_json::serde::from_slice::<AlertConfig>(bytes.as_mut_slice()) {
        Ok(config) => config,
        Err(error) => {
            tracing::warn!(%error, "stored alert settings are corrupt, using defaults");
            AlertConfig::default()
        }
    }
}

pub async fn save_alert_config(
    store: &dyn KeyValueStore,
    config: &AlertConfig,
) -> Result<(), AppError> {
    let encoded = simd_json::serde::to_string(config)?;
    store.set(ALERT_CONFIG_KEY, &encoded).await
}
