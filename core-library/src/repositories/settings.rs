//! Typed key/value settings

use crate::error::{LibraryError, Result};
use crate::models::{Setting, SettingValue};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use tracing::warn;

const UPSERT_SQL: &str = r#"
INSERT INTO settings (key, value, type, description, created_at, updated_at)
VALUES (?, ?, ?, ?, ?, ?)
ON CONFLICT(key) DO UPDATE SET
    value = excluded.value,
    type = excluded.type,
    description = COALESCE(excluded.description, settings.description),
    updated_at = excluded.updated_at
"#;

/// Settings repository interface
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Setting>>;

    /// Typed value of a setting, `None` when the key is absent.
    async fn get_value(&self, key: &str) -> Result<Option<SettingValue>>;

    async fn set(&self, key: &str, value: &SettingValue, description: Option<&str>)
        -> Result<()>;

    /// Write several settings in one transaction.
    async fn set_many(&self, values: &[(String, SettingValue)]) -> Result<()>;

    /// Every setting, decoded. Rows that fail to decode are skipped with a warning.
    async fn get_all(&self) -> Result<BTreeMap<String, SettingValue>>;

    /// Raw rows ordered by key.
    async fn list(&self) -> Result<Vec<Setting>>;
}

/// SQLite implementation of [`SettingsRepository`]
pub struct SqliteSettingsRepository {
    pool: SqlitePool,
}

impl SqliteSettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

async fn write_setting(
    conn: &mut SqliteConnection,
    key: &str,
    value: &SettingValue,
    description: Option<&str>,
) -> Result<()> {
    if key.trim().is_empty() {
        return Err(LibraryError::invalid("key", "cannot be empty"));
    }
    let now = Utc::now().timestamp();

    sqlx::query(UPSERT_SQL)
        .bind(key)
        .bind(value.encode()?)
        .bind(value.setting_type().as_str())
        .bind(description)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[async_trait]
impl SettingsRepository for SqliteSettingsRepository {
    async fn get(&self, key: &str) -> Result<Option<Setting>> {
        let setting = sqlx::query_as::<_, Setting>("SELECT * FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(setting)
    }

    async fn get_value(&self, key: &str) -> Result<Option<SettingValue>> {
        self.get(key).await?.map(|s| s.parsed()).transpose()
    }

    async fn set(
        &self,
        key: &str,
        value: &SettingValue,
        description: Option<&str>,
    ) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        write_setting(&mut conn, key, value, description).await
    }

    async fn set_many(&self, values: &[(String, SettingValue)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in values {
            write_setting(&mut tx, key, value, None).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_all(&self) -> Result<BTreeMap<String, SettingValue>> {
        let mut values = BTreeMap::new();
        for setting in self.list().await? {
            match setting.parsed() {
                Ok(value) => {
                    values.insert(setting.key, value);
                }
                Err(e) => warn!(key = %setting.key, error = %e, "Skipping undecodable setting"),
            }
        }
        Ok(values)
    }

    async fn list(&self) -> Result<Vec<Setting>> {
        let settings = sqlx::query_as::<_, Setting>("SELECT * FROM settings ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        Ok(settings)
    }
}
