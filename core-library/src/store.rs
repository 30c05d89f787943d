//! # Store
//!
//! Process-wide owner of the catalog database. Construct one at startup and
//! share it behind an `Arc`.
//!
//! `connect` creates the pool, ensures the base schema, applies pending
//! migrations and runs a health check. Every other operation fails with
//! [`LibraryError::NotConnected`] until then, and again after `disconnect`.

use crate::db::{self, DatabaseConfig};
use crate::error::{LibraryError, Result};
use crate::migrations::{self, MigrationRunner};
use crate::models::{DatabaseStats, SchemaVersion, MUSIC_EXTENSIONS, VIDEO_EXTENSIONS};
use crate::repositories::{
    SqliteCategoryRepository, SqliteMediaRepository, SqliteSettingsRepository,
};
use crate::schema;
use chrono::Utc;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashSet;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

/// Result of [`Store::integrity_check`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub ok: bool,
    pub issues: Vec<String>,
}

impl IntegrityReport {
    pub fn from_issues(issues: Vec<String>) -> Self {
        Self {
            ok: issues.is_empty(),
            issues,
        }
    }
}

pub struct Store {
    config: DatabaseConfig,
    migrations: MigrationRunner,
    pool: RwLock<Option<SqlitePool>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("database_url", &self.config.database_url)
            .field("migrations", &self.migrations)
            .finish()
    }
}

impl Store {
    /// Store using the built-in migrations.
    pub fn new(config: DatabaseConfig) -> Self {
        Self::with_migrations(config, MigrationRunner::builtin())
    }

    pub fn with_migrations(config: DatabaseConfig, migrations: MigrationRunner) -> Self {
        Self {
            config,
            migrations,
            pool: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Backing file, `None` for in-memory stores.
    pub fn database_path(&self) -> Option<&Path> {
        self.config.database_path()
    }

    pub fn migrations(&self) -> &MigrationRunner {
        &self.migrations
    }

    /// Open the database. A no-op when already connected.
    ///
    /// # Errors
    /// Any failure to open, create the schema or migrate. A failed migration
    /// closes the pool again: the store must not run on a stale schema.
    #[instrument(skip(self), fields(database_url = %self.config.database_url))]
    pub async fn connect(&self) -> Result<()> {
        let mut guard = self.pool.write().await;
        if guard.is_some() {
            return Ok(());
        }

        let pool = db::create_pool(&self.config).await?;

        let prepared = async {
            schema::ensure_schema(&pool).await?;
            self.migrations.run(&pool).await?;
            db::health_check(&pool).await
        }
        .await;

        if let Err(e) = prepared {
            warn!(error = %e, "Store initialization failed");
            pool.close().await;
            return Err(e);
        }

        *guard = Some(pool);
        info!("Store connected");
        Ok(())
    }

    /// Close every connection. A no-op when not connected.
    pub async fn disconnect(&self) {
        let pool = self.pool.write().await.take();
        if let Some(pool) = pool {
            pool.close().await;
            info!("Store disconnected");
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.pool.read().await.is_some()
    }

    /// Clone of the live pool.
    pub async fn pool(&self) -> Result<SqlitePool> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or(LibraryError::NotConnected)
    }

    pub async fn media(&self) -> Result<SqliteMediaRepository> {
        Ok(SqliteMediaRepository::new(self.pool().await?))
    }

    pub async fn categories(&self) -> Result<SqliteCategoryRepository> {
        Ok(SqliteCategoryRepository::new(self.pool().await?))
    }

    pub async fn settings(&self) -> Result<SqliteSettingsRepository> {
        Ok(SqliteSettingsRepository::new(self.pool().await?))
    }

    /// Run `f` inside one transaction.
    ///
    /// Commits when `f` succeeds; rolls back and returns the error otherwise.
    ///
    /// ```rust,ignore
    /// let removed = store
    ///     .transaction(move |conn| Box::pin(async move { delete_urls(conn, &urls).await }))
    ///     .await?;
    /// ```
    pub async fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T>> + Send,
    {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;

        match f(&mut *tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Transaction rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Reclaim free pages and refresh planner statistics. Expensive.
    #[instrument(skip(self))]
    pub async fn optimize(&self) -> Result<()> {
        let pool = self.pool().await?;
        let started = std::time::Instant::now();

        sqlx::query("VACUUM").execute(&pool).await?;
        sqlx::query("ANALYZE").execute(&pool).await?;

        info!(
            duration_ms = started.elapsed().as_millis() as u64,
            "Database optimized"
        );
        Ok(())
    }

    /// Structural self-check: required tables, engine integrity, foreign
    /// keys and duplicate natural keys.
    #[instrument(skip(self))]
    pub async fn integrity_check(&self) -> Result<IntegrityReport> {
        let pool = self.pool().await?;
        let mut issues = Vec::new();

        let missing = schema::missing_tables(&pool).await?;
        for table in &missing {
            issues.push(format!("missing table {}", table));
        }

        let engine: Vec<String> = sqlx::query_scalar("PRAGMA integrity_check")
            .fetch_all(&pool)
            .await?;
        if engine.len() != 1 || engine[0] != "ok" {
            issues.extend(engine.into_iter().map(|line| format!("integrity: {}", line)));
        }

        let violations: Vec<(String,)> = sqlx::query_as("PRAGMA foreign_key_check")
            .fetch_all(&pool)
            .await?;
        for (table,) in violations {
            issues.push(format!("foreign key violation in {}", table));
        }

        if !missing.iter().any(|t| t == "media_files") {
            let duplicates: Vec<String> = sqlx::query_scalar(
                "SELECT url FROM media_files GROUP BY url HAVING COUNT(*) > 1",
            )
            .fetch_all(&pool)
            .await?;
            for url in duplicates {
                issues.push(format!("duplicate media url {}", url));
            }
        }

        if !missing.iter().any(|t| t == "media_categories") {
            let duplicates: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM (SELECT 1 FROM media_categories \
                 GROUP BY year, month, day, prepose HAVING COUNT(*) > 1)",
            )
            .fetch_one(&pool)
            .await?;
            if duplicates > 0 {
                issues.push(format!("{} duplicate category buckets", duplicates));
            }
        }

        let report = IntegrityReport::from_issues(issues);
        debug!(ok = report.ok, issues = report.issues.len(), "Integrity check finished");
        Ok(report)
    }

    /// Live aggregate counts.
    pub async fn collect_stats(&self) -> Result<DatabaseStats> {
        let pool = self.pool().await?;

        let (total_files, total_size): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(size), 0) FROM media_files")
                .fetch_one(&pool)
                .await?;
        let music_files = count_with_suffix(&pool, MUSIC_EXTENSIONS).await?;
        let video_files = count_with_suffix(&pool, VIDEO_EXTENSIONS).await?;
        let categories: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM media_categories")
            .fetch_one(&pool)
            .await?;
        let settings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM settings")
            .fetch_one(&pool)
            .await?;
        let last_scanned =
            sqlx::query_scalar::<_, Option<i64>>("SELECT last_scanned FROM database_stats WHERE id = 1")
                .fetch_optional(&pool)
                .await?
                .flatten();

        Ok(DatabaseStats {
            total_files,
            music_files,
            video_files,
            total_size,
            categories,
            settings,
            last_scanned,
        })
    }

    /// Recompute the stats snapshot row.
    ///
    /// `scanned_at` replaces `last_scanned` when given; otherwise the previous
    /// value is kept.
    pub async fn refresh_stats_snapshot(&self, scanned_at: Option<i64>) -> Result<DatabaseStats> {
        let mut stats = self.collect_stats().await?;
        if scanned_at.is_some() {
            stats.last_scanned = scanned_at;
        }

        let pool = self.pool().await?;
        sqlx::query(
            r#"
            INSERT INTO database_stats (
                id, total_files, total_size, music_files, video_files,
                categories, settings, last_scanned, updated_at
            ) VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                total_files = excluded.total_files,
                total_size = excluded.total_size,
                music_files = excluded.music_files,
                video_files = excluded.video_files,
                categories = excluded.categories,
                settings = excluded.settings,
                last_scanned = excluded.last_scanned,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(stats.total_files)
        .bind(stats.total_size)
        .bind(stats.music_files)
        .bind(stats.video_files)
        .bind(stats.categories)
        .bind(stats.settings)
        .bind(stats.last_scanned)
        .bind(Utc::now().timestamp())
        .execute(&pool)
        .await?;

        Ok(stats)
    }

    /// Snapshot written by the last refresh, without touching `media_files`.
    pub async fn cached_stats(&self) -> Result<Option<DatabaseStats>> {
        let pool = self.pool().await?;
        let stats = sqlx::query_as::<_, DatabaseStats>(
            "SELECT total_files, music_files, video_files, total_size, categories, settings, \
             last_scanned FROM database_stats WHERE id = 1",
        )
        .fetch_optional(&pool)
        .await?;
        Ok(stats)
    }

    /// Every asset path referenced by a media record or category.
    pub async fn referenced_assets(&self) -> Result<HashSet<String>> {
        let pool = self.pool().await?;
        let pictures: Vec<String> = sqlx::query_scalar(
            "SELECT picture FROM media_files WHERE picture IS NOT NULL AND picture != '' \
             UNION SELECT picture FROM media_categories WHERE picture IS NOT NULL AND picture != ''",
        )
        .fetch_all(&pool)
        .await?;
        Ok(pictures.into_iter().collect())
    }

    pub async fn schema_version(&self) -> Result<Option<String>> {
        let pool = self.pool().await?;
        migrations::current_version(&pool).await
    }

    pub async fn migration_history(&self) -> Result<Vec<SchemaVersion>> {
        let pool = self.pool().await?;
        self.migrations.history(&pool).await
    }
}

async fn count_with_suffix(pool: &SqlitePool, extensions: &[&str]) -> Result<i64> {
    let placeholders = vec!["?"; extensions.len()].join(", ");
    let sql = format!(
        "SELECT COUNT(*) FROM media_files WHERE LOWER(suffix) IN ({})",
        placeholders
    );
    let mut query = sqlx::query_scalar::<_, i64>(&sql);
    for ext in extensions {
        query = query.bind(*ext);
    }
    Ok(query.fetch_one(pool).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewMediaCategory, NewMediaFile};
    use crate::repositories::{delete_urls, CategoryRepository, MediaRepository};

    async fn connected() -> Store {
        let store = Store::new(DatabaseConfig::in_memory());
        store.connect().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let store = Store::new(DatabaseConfig::in_memory());
        assert!(matches!(store.pool().await, Err(LibraryError::NotConnected)));
        assert!(matches!(store.integrity_check().await, Err(LibraryError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_and_disconnect_are_idempotent() {
        let store = Store::new(DatabaseConfig::in_memory());
        store.connect().await.unwrap();
        store.connect().await.unwrap();
        assert!(store.is_connected().await);
        assert_eq!(store.schema_version().await.unwrap().as_deref(), Some("1.1.0"));

        store.disconnect().await;
        store.disconnect().await;
        assert!(!store.is_connected().await);
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_error() {
        let store = connected().await;
        store
            .media()
            .await
            .unwrap()
            .upsert_batch(&[NewMediaFile::new("/m/a.mp3", "a.mp3", ".mp3", 1)])
            .await
            .unwrap();

        let urls = vec!["/m/a.mp3".to_string()];
        let result: Result<u64> = store
            .transaction(move |conn| {
                Box::pin(async move {
                    delete_urls(conn, &urls).await?;
                    Err(LibraryError::Conflict("abort".into()))
                })
            })
            .await;
        assert!(result.is_err());

        let media = store.media().await.unwrap();
        assert!(media.find_by_url("/m/a.mp3").await.unwrap().is_some());

        let urls = vec!["/m/a.mp3".to_string()];
        let removed = store
            .transaction(move |conn| Box::pin(async move { delete_urls(conn, &urls).await }))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(media.find_by_url("/m/a.mp3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_integrity_check_passes_on_fresh_store() {
        let store = connected().await;
        let report = store.integrity_check().await.unwrap();
        assert!(report.ok, "{:?}", report.issues);
    }

    #[tokio::test]
    async fn test_integrity_check_reports_missing_table() {
        let store = connected().await;
        sqlx::query("DROP TABLE settings")
            .execute(&store.pool().await.unwrap())
            .await
            .unwrap();

        let report = store.integrity_check().await.unwrap();
        assert!(!report.ok);
        assert!(report.issues.iter().any(|i| i == "missing table settings"));
    }

    #[tokio::test]
    async fn test_stats_snapshot() {
        let store = connected().await;
        let media = store.media().await.unwrap();
        media
            .upsert_batch(&[
                NewMediaFile::new("/m/a.mp3", "a.mp3", ".mp3", 100),
                NewMediaFile::new("/m/b.FLAC", "b.FLAC", ".FLAC", 200),
                NewMediaFile::new("/v/c.mkv", "c.mkv", ".mkv", 300),
            ])
            .await
            .unwrap();
        store
            .categories()
            .await
            .unwrap()
            .upsert(&NewMediaCategory::for_date(2024, 1, 1, "m"))
            .await
            .unwrap();

        assert!(store.cached_stats().await.unwrap().is_none());

        let stats = store.refresh_stats_snapshot(Some(1_700_000_000)).await.unwrap();
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.music_files, 2);
        assert_eq!(stats.video_files, 1);
        assert_eq!(stats.total_size, 600);
        assert_eq!(stats.categories, 1);

        // A refresh without a scan keeps the last scan time
        let again = store.refresh_stats_snapshot(None).await.unwrap();
        assert_eq!(again.last_scanned, Some(1_700_000_000));
        assert_eq!(store.cached_stats().await.unwrap(), Some(again));
    }

    #[tokio::test]
    async fn test_referenced_assets_union() {
        let store = connected().await;
        let mut file = NewMediaFile::new("/m/a.mp3", "a.mp3", ".mp3", 1);
        file.picture = Some("images/a.jpg".into());
        store.media().await.unwrap().upsert_batch(&[file]).await.unwrap();
        store
            .categories()
            .await
            .unwrap()
            .upsert(
                &NewMediaCategory::for_date(2024, 1, 1, "m")
                    .with_picture(Some("images/b.jpg".into())),
            )
            .await
            .unwrap();

        let assets = store.referenced_assets().await.unwrap();
        assert_eq!(assets.len(), 2);
        assert!(assets.contains("images/a.jpg"));
        assert!(assets.contains("images/b.jpg"));
    }

    #[tokio::test]
    async fn test_optimize() {
        let store = connected().await;
        store.optimize().await.unwrap();
    }
}
