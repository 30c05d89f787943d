//! # Schema Migrations
//!
//! Versioned schema changes applied on top of the base schema.
//!
//! Migrations form a strictly ordered chain keyed by a dotted version string
//! (`1.0.0`, `1.1.0`, ...), compared numerically component by component.
//! `schema_version` logs every applied migration; the row with the greatest
//! `applied_at` is the current version.
//!
//! - **Fresh install**: no rows, every registered migration is applied in order.
//! - **Upgrade**: every migration newer than the current version is applied.
//! - **Rollback**: `down` runs newest first for every version after the target.
//!
//! Each migration body and its log row commit in one transaction, so a failed
//! migration leaves neither a half-applied schema nor a log entry.

use crate::error::{LibraryError, Result};
use crate::models::SchemaVersion;
use crate::schema::{self, MEDIA_FILE_COLUMNS, MEDIA_FILE_INDEXES};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqliteExecutor, SqlitePool};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// One step in the schema chain.
#[async_trait]
pub trait Migration: Send + Sync {
    fn version(&self) -> &str;

    fn description(&self) -> &str;

    async fn up(&self, conn: &mut SqliteConnection) -> Result<()>;

    async fn down(&self, conn: &mut SqliteConnection) -> Result<()>;
}

/// Migration made of plain SQL scripts.
#[derive(Debug, Clone)]
pub struct SqlMigration {
    version: String,
    description: String,
    up: String,
    down: String,
}

impl SqlMigration {
    pub fn new(
        version: impl Into<String>,
        description: impl Into<String>,
        up: impl Into<String>,
        down: impl Into<String>,
    ) -> Self {
        Self {
            version: version.into(),
            description: description.into(),
            up: up.into(),
            down: down.into(),
        }
    }
}

#[async_trait]
impl Migration for SqlMigration {
    fn version(&self) -> &str {
        &self.version
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn up(&self, conn: &mut SqliteConnection) -> Result<()> {
        schema::execute_script(conn, &self.up).await
    }

    async fn down(&self, conn: &mut SqliteConnection) -> Result<()> {
        schema::execute_script(conn, &self.down).await
    }
}

/// Numeric component-wise comparison; missing components count as zero.
///
/// ```
/// use core_library::migrations::compare_versions;
/// use std::cmp::Ordering;
///
/// assert_eq!(compare_versions("1.10.0", "1.9.0").unwrap(), Ordering::Greater);
/// assert_eq!(compare_versions("1.0", "1.0.0").unwrap(), Ordering::Equal);
/// ```
pub fn compare_versions(a: &str, b: &str) -> Result<Ordering> {
    let a = parse_version(a)?;
    let b = parse_version(b)?;
    let len = a.len().max(b.len());
    for i in 0..len {
        let left = a.get(i).copied().unwrap_or(0);
        let right = b.get(i).copied().unwrap_or(0);
        match left.cmp(&right) {
            Ordering::Equal => continue,
            other => return Ok(other),
        }
    }
    Ok(Ordering::Equal)
}

fn parse_version(version: &str) -> Result<Vec<u64>> {
    version
        .split('.')
        .map(|part| {
            part.parse::<u64>().map_err(|_| {
                LibraryError::Migration(format!("invalid version string '{}'", version))
            })
        })
        .collect()
}

/// Outcome of [`MigrationRunner::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationValidation {
    pub valid: bool,
    pub issues: Vec<String>,
    pub current_version: Option<String>,
    pub latest_version: Option<String>,
}

/// Ordered registry of migrations.
#[derive(Clone)]
pub struct MigrationRunner {
    migrations: Vec<Arc<dyn Migration>>,
}

impl std::fmt::Debug for MigrationRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRunner")
            .field("versions", &self.versions())
            .finish()
    }
}

impl MigrationRunner {
    /// Sort the migrations by version.
    ///
    /// # Errors
    /// `Migration` for an unparsable or duplicated version.
    pub fn new(mut migrations: Vec<Arc<dyn Migration>>) -> Result<Self> {
        for migration in &migrations {
            parse_version(migration.version())?;
        }

        migrations.sort_by(|a, b| {
            compare_versions(a.version(), b.version()).unwrap_or(Ordering::Equal)
        });

        for pair in migrations.windows(2) {
            if compare_versions(pair[0].version(), pair[1].version())? == Ordering::Equal {
                return Err(LibraryError::Migration(format!(
                    "duplicate migration version {}",
                    pair[1].version()
                )));
            }
        }

        Ok(Self { migrations })
    }

    /// The migrations shipped with the library.
    pub fn builtin() -> Self {
        Self {
            migrations: builtin_migrations(),
        }
    }

    pub fn versions(&self) -> Vec<&str> {
        self.migrations.iter().map(|m| m.version()).collect()
    }

    pub fn latest_version(&self) -> Option<&str> {
        self.migrations.last().map(|m| m.version())
    }

    /// Apply every pending migration; returns the versions applied.
    #[instrument(skip(self, pool))]
    pub async fn run(&self, pool: &SqlitePool) -> Result<Vec<String>> {
        let current = current_version(pool).await?;

        let mut pending = Vec::new();
        for migration in &self.migrations {
            let newer = match &current {
                None => true,
                Some(current) => {
                    compare_versions(migration.version(), current)? == Ordering::Greater
                }
            };
            if newer {
                pending.push(migration.clone());
            }
        }

        if pending.is_empty() {
            if let (Some(current), Some(latest)) = (&current, self.latest_version()) {
                if compare_versions(current, latest)? == Ordering::Greater {
                    warn!(
                        current = %current,
                        latest = %latest,
                        "Database schema is newer than the registered migrations"
                    );
                }
            }
            return Ok(Vec::new());
        }

        info!(
            current = current.as_deref().unwrap_or("none"),
            pending = pending.len(),
            "Applying schema migrations"
        );

        let mut applied = Vec::with_capacity(pending.len());
        for migration in pending {
            let version = migration.version().to_string();
            let mut tx = pool.begin().await?;

            if let Err(e) = migration.up(&mut tx).await {
                warn!(version = %version, error = %e, "Migration failed");
                return Err(LibraryError::Migration(format!("{}: {}", version, e)));
            }
            record_version(&mut tx, &version, migration.description()).await?;
            tx.commit().await?;

            info!(version = %version, description = migration.description(), "Migration applied");
            applied.push(version);
        }

        Ok(applied)
    }

    /// Undo every migration newer than `target`, newest first.
    ///
    /// # Errors
    /// `Migration` if `target` is not registered or not strictly older than
    /// the current version. Nothing is changed in that case.
    #[instrument(skip(self, pool))]
    pub async fn rollback_to(&self, pool: &SqlitePool, target: &str) -> Result<Vec<String>> {
        if !self.migrations.iter().any(|m| m.version() == target) {
            return Err(LibraryError::Migration(format!(
                "unknown rollback target {}",
                target
            )));
        }

        let current = current_version(pool)
            .await?
            .ok_or_else(|| LibraryError::Migration("no schema version recorded".to_string()))?;

        if compare_versions(target, &current)? != Ordering::Less {
            return Err(LibraryError::Migration(format!(
                "rollback target {} is not older than current version {}",
                target, current
            )));
        }

        let mut to_undo = Vec::new();
        for migration in self.migrations.iter().rev() {
            let above_target = compare_versions(migration.version(), target)? == Ordering::Greater;
            let at_or_below_current =
                compare_versions(migration.version(), &current)? != Ordering::Greater;
            if above_target && at_or_below_current {
                to_undo.push(migration.clone());
            }
        }

        let mut reverted = Vec::with_capacity(to_undo.len());
        for migration in to_undo {
            let version = migration.version().to_string();
            let mut tx = pool.begin().await?;

            if let Err(e) = migration.down(&mut tx).await {
                warn!(version = %version, error = %e, "Rollback failed");
                return Err(LibraryError::Migration(format!(
                    "rollback of {}: {}",
                    version, e
                )));
            }
            sqlx::query("DELETE FROM schema_version WHERE version = ?")
                .bind(&version)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;

            info!(version = %version, "Migration rolled back");
            reverted.push(version);
        }

        Ok(reverted)
    }

    /// Applied migrations, oldest first.
    pub async fn history(&self, pool: &SqlitePool) -> Result<Vec<SchemaVersion>> {
        let rows = sqlx::query_as::<_, SchemaVersion>(
            "SELECT version, description, applied_at FROM schema_version \
             ORDER BY applied_at ASC, rowid ASC",
        )
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    /// Check tables, recorded version and foreign keys.
    pub async fn validate(&self, pool: &SqlitePool) -> Result<MigrationValidation> {
        let mut issues = Vec::new();

        for table in schema::missing_tables(pool).await? {
            issues.push(format!("missing table {}", table));
        }

        let current = current_version(pool).await?;
        let latest = self.latest_version().map(str::to_string);

        match (&current, &latest) {
            (None, _) => issues.push("no schema version recorded".to_string()),
            (Some(current), Some(latest)) => {
                if compare_versions(current, latest)? == Ordering::Less {
                    issues.push(format!(
                        "schema version {} is behind latest {}",
                        current, latest
                    ));
                }
            }
            (Some(_), None) => {}
        }

        let violations: Vec<(String,)> = sqlx::query_as("PRAGMA foreign_key_check")
            .fetch_all(pool)
            .await?;
        for (table,) in violations {
            issues.push(format!("foreign key violation in {}", table));
        }

        Ok(MigrationValidation {
            valid: issues.is_empty(),
            issues,
            current_version: current,
            latest_version: latest,
        })
    }
}

/// Version in the row with the greatest `applied_at`.
pub async fn current_version<'e, E>(executor: E) -> Result<Option<String>>
where
    E: SqliteExecutor<'e>,
{
    let version = sqlx::query_scalar(
        "SELECT version FROM schema_version ORDER BY applied_at DESC, rowid DESC LIMIT 1",
    )
    .fetch_optional(executor)
    .await?;
    Ok(version)
}

/// Upsert the log row. `applied_at` is kept strictly increasing so the
/// current version is unambiguous even within one millisecond.
async fn record_version(
    conn: &mut SqliteConnection,
    version: &str,
    description: &str,
) -> Result<()> {
    let last: Option<i64> = sqlx::query_scalar("SELECT MAX(applied_at) FROM schema_version")
        .fetch_one(&mut *conn)
        .await?;
    let now = Utc::now().timestamp_millis();
    let applied_at = match last {
        Some(last) if last >= now => last + 1,
        _ => now,
    };

    sqlx::query(
        "INSERT INTO schema_version (version, description, applied_at) VALUES (?, ?, ?) \
         ON CONFLICT(version) DO UPDATE SET description = excluded.description, \
         applied_at = excluded.applied_at",
    )
    .bind(version)
    .bind(description)
    .bind(applied_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Rebuild `media_files` with or without the unique content hash constraint.
fn rebuild_media_files(unique_hash: bool) -> String {
    let insert = if unique_hash { "INSERT OR IGNORE" } else { "INSERT" };
    format!(
        "DROP TABLE IF EXISTS media_files_rebuild;\n\
         {create}\n\
         {insert} INTO media_files_rebuild ({cols}) SELECT {cols} FROM media_files ORDER BY id;\n\
         DROP TABLE media_files;\n\
         ALTER TABLE media_files_rebuild RENAME TO media_files;\n\
         {indexes}",
        create = schema::media_files_table("media_files_rebuild", unique_hash),
        insert = insert,
        cols = MEDIA_FILE_COLUMNS,
        indexes = MEDIA_FILE_INDEXES,
    )
}

fn builtin_migrations() -> Vec<Arc<dyn Migration>> {
    vec![
        Arc::new(SqlMigration::new("1.0.0", "Initial schema", "", "")),
        Arc::new(SqlMigration::new(
            "1.1.0",
            "Allow several files to share a content hash",
            rebuild_media_files(false),
            rebuild_media_files(true),
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    fn table_sql_for(name: &str) -> String {
        format!(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = '{}'",
            name
        )
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.0.0", "1.1.0").unwrap(), Ordering::Less);
        assert_eq!(compare_versions("1.10.0", "1.2.0").unwrap(), Ordering::Greater);
        assert_eq!(compare_versions("2", "1.9.9").unwrap(), Ordering::Greater);
        assert!(compare_versions("1.x", "1.0").is_err());
    }

    #[test]
    fn test_runner_sorts_and_rejects_duplicates() {
        let runner = MigrationRunner::new(vec![
            Arc::new(SqlMigration::new("1.10.0", "c", "", "")),
            Arc::new(SqlMigration::new("1.2.0", "b", "", "")),
            Arc::new(SqlMigration::new("1.0.0", "a", "", "")),
        ])
        .unwrap();
        assert_eq!(runner.versions(), vec!["1.0.0", "1.2.0", "1.10.0"]);

        let duplicate = MigrationRunner::new(vec![
            Arc::new(SqlMigration::new("1.0", "a", "", "")),
            Arc::new(SqlMigration::new("1.0.0", "b", "", "")),
        ]);
        assert!(duplicate.is_err());
    }

    #[tokio::test]
    async fn test_builtin_fresh_install() {
        let pool = create_test_pool().await.unwrap();
        let runner = MigrationRunner::builtin();

        let applied = runner.run(&pool).await.unwrap();
        assert_eq!(applied, vec!["1.0.0".to_string(), "1.1.0".to_string()]);
        assert_eq!(current_version(&pool).await.unwrap().as_deref(), Some("1.1.0"));

        // Nothing pending on the second run
        assert!(runner.run(&pool).await.unwrap().is_empty());

        let validation = runner.validate(&pool).await.unwrap();
        assert!(validation.valid, "{:?}", validation.issues);
    }

    #[tokio::test]
    async fn test_builtin_rollback_restores_unique_hash() {
        let pool = create_test_pool().await.unwrap();
        let runner = MigrationRunner::builtin();
        runner.run(&pool).await.unwrap();

        let reverted = runner.rollback_to(&pool, "1.0.0").await.unwrap();
        assert_eq!(reverted, vec!["1.1.0".to_string()]);

        let sql: String = sqlx::query_scalar(&table_sql_for("media_files"))
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(sql.contains("file_hash TEXT UNIQUE"));
        assert_eq!(current_version(&pool).await.unwrap().as_deref(), Some("1.0.0"));

        // Upgrading again drops the constraint
        runner.run(&pool).await.unwrap();
        let sql: String = sqlx::query_scalar(&table_sql_for("media_files"))
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(!sql.contains("file_hash TEXT UNIQUE"));
    }

    #[tokio::test]
    async fn test_rollback_fails_closed() {
        let pool = create_test_pool().await.unwrap();
        let runner = MigrationRunner::builtin();
        runner.run(&pool).await.unwrap();

        assert!(runner.rollback_to(&pool, "0.9.0").await.is_err());
        assert!(runner.rollback_to(&pool, "1.1.0").await.is_err());
        assert_eq!(runner.history(&pool).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_migration_is_not_recorded() {
        let pool = create_test_pool().await.unwrap();
        let runner = MigrationRunner::new(vec![
            Arc::new(SqlMigration::new("1.0.0", "ok", "", "")),
            Arc::new(SqlMigration::new(
                "1.1.0",
                "broken",
                "CREATE TABLE extra (id INTEGER); INSERT INTO missing_table VALUES (1);",
                "",
            )),
        ])
        .unwrap();

        let err = runner.run(&pool).await.unwrap_err();
        assert!(matches!(err, LibraryError::Migration(_)));
        assert_eq!(current_version(&pool).await.unwrap().as_deref(), Some("1.0.0"));

        let extra: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'extra'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(extra, 0);
    }
}
