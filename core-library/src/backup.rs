//! # Backups
//!
//! Snapshots of the catalog database written with SQLite's `VACUUM INTO`,
//! indexed by a `metadata.json` file in the backup directory (newest first).
//!
//! Restores replace the live file while the [`Store`] is disconnected, then
//! reconnect and validate. A restore that fails validation puts the previous
//! file back, so the store always ends connected to a usable database.

use crate::error::{LibraryError, Result};
use crate::store::{IntegrityReport, Store};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Format version written into every new backup record.
pub const BACKUP_VERSION: &str = "1.0.0";

const INDEX_FILE: &str = "metadata.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub id: String,
    pub file_name: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    /// Media records in the database when the snapshot was taken
    pub file_count: u64,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BackupIndex {
    backups: Vec<BackupRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupStats {
    pub total_backups: usize,
    pub total_size: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Progress of the current or last restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestorePhase {
    Idle,
    PreBackup,
    Disconnected,
    Copying,
    Reconnected,
    Validating,
    Committed,
    RollingBack,
    Failed,
}

/// Successful restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub backup_id: String,
    /// Snapshot of the replaced database, when one could be taken
    pub pre_restore_backup: Option<String>,
    pub integrity: IntegrityReport,
}

/// Decides whether a freshly restored database is acceptable.
#[async_trait]
pub trait RestoreValidator: Send + Sync {
    async fn validate(&self, store: &Store) -> Result<IntegrityReport>;
}

/// Accepts a restore when [`Store::integrity_check`] finds no issues.
#[derive(Debug, Default, Clone, Copy)]
pub struct IntegrityValidator;

#[async_trait]
impl RestoreValidator for IntegrityValidator {
    async fn validate(&self, store: &Store) -> Result<IntegrityReport> {
        store.integrity_check().await
    }
}

pub struct BackupCoordinator {
    store: Arc<Store>,
    backup_dir: PathBuf,
    max_backups: usize,
    validator: Arc<dyn RestoreValidator>,
    lock: Mutex<()>,
    phase: watch::Sender<RestorePhase>,
}

impl BackupCoordinator {
    pub fn new(store: Arc<Store>, backup_dir: impl Into<PathBuf>, max_backups: usize) -> Self {
        let (phase, _) = watch::channel(RestorePhase::Idle);
        Self {
            store,
            backup_dir: backup_dir.into(),
            max_backups: max_backups.max(1),
            validator: Arc::new(IntegrityValidator),
            lock: Mutex::new(()),
            phase,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn RestoreValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn restore_phase(&self) -> RestorePhase {
        *self.phase.borrow()
    }

    /// Receiver that observes every restore phase transition.
    pub fn watch_restore_phase(&self) -> watch::Receiver<RestorePhase> {
        self.phase.subscribe()
    }

    /// Snapshot the live database and apply the retention limit.
    #[instrument(skip(self))]
    pub async fn create_backup(&self, label: Option<&str>) -> Result<BackupRecord> {
        let _guard = self.lock.lock().await;
        self.snapshot(label, None).await
    }

    /// Backups whose snapshot file still exists, newest first.
    pub async fn list_backups(&self) -> Result<Vec<BackupRecord>> {
        let _guard = self.lock.lock().await;
        let index = self.load_index().await?;

        let mut present = Vec::with_capacity(index.backups.len());
        for record in index.backups {
            if fs::try_exists(self.backup_dir.join(&record.file_name))
                .await
                .unwrap_or(false)
            {
                present.push(record);
            } else {
                debug!(backup_id = %record.id, "Backup file missing, treating as deleted");
            }
        }
        Ok(present)
    }

    pub async fn get_backup(&self, id: &str) -> Result<Option<BackupRecord>> {
        Ok(self.list_backups().await?.into_iter().find(|b| b.id == id))
    }

    pub async fn backup_stats(&self) -> Result<BackupStats> {
        let backups = self.list_backups().await?;
        Ok(BackupStats {
            total_backups: backups.len(),
            total_size: backups.iter().map(|b| b.size).sum(),
            oldest: backups.iter().map(|b| b.created_at).min(),
            newest: backups.iter().map(|b| b.created_at).max(),
        })
    }

    /// Remove a backup and its snapshot file.
    ///
    /// # Errors
    /// `NotFound` if no index entry has this id. A missing snapshot file is
    /// not an error.
    #[instrument(skip(self))]
    pub async fn delete_backup(&self, id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut index = self.load_index().await?;

        let position = index
            .backups
            .iter()
            .position(|b| b.id == id)
            .ok_or_else(|| LibraryError::not_found("Backup", id))?;
        let record = index.backups.remove(position);

        remove_if_exists(&self.backup_dir.join(&record.file_name)).await?;
        self.save_index(&index).await?;

        info!(backup_id = %id, "Backup deleted");
        Ok(())
    }

    /// Replace the live database with a backup.
    ///
    /// Takes a best-effort snapshot of the current database first. When the
    /// restored database cannot be opened or fails validation, the previous
    /// file is put back and `Integrity` is returned. The store is reconnected
    /// on every path.
    #[instrument(skip(self))]
    pub async fn restore_backup(&self, id: &str) -> Result<RestoreReport> {
        let _guard = self.lock.lock().await;
        self.phase.send_replace(RestorePhase::Idle);

        let index = self.load_index().await?;
        let record = index
            .backups
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or_else(|| LibraryError::not_found("Backup", id))?;

        let backup_path = self.backup_dir.join(&record.file_name);
        if !fs::try_exists(&backup_path).await.unwrap_or(false) {
            return Err(LibraryError::not_found("Backup file", record.file_name));
        }
        check_version(&record.version)?;

        let live_path = self
            .store
            .database_path()
            .map(Path::to_path_buf)
            .ok_or_else(|| {
                LibraryError::invalid("database", "in-memory databases cannot be restored")
            })?;
        let temp_path = sidecar(&live_path, ".temp");

        self.phase.send_replace(RestorePhase::PreBackup);
        let pre_restore_backup = match self.snapshot(Some("pre-restore"), Some(id)).await {
            Ok(pre) => Some(pre.id),
            Err(e) => {
                warn!(error = %e, "Pre-restore backup failed, continuing");
                None
            }
        };

        self.store.disconnect().await;
        self.phase.send_replace(RestorePhase::Disconnected);

        self.phase.send_replace(RestorePhase::Copying);
        if let Err(e) = swap_in(&live_path, &backup_path, &temp_path).await {
            error!(error = %e, "Restore copy failed");
            return Err(self.roll_back(&live_path, &temp_path, e).await);
        }

        if let Err(e) = self.store.connect().await {
            error!(error = %e, "Restored database could not be opened");
            let issues = vec![format!("restored database could not be opened: {}", e)];
            return Err(self
                .roll_back(&live_path, &temp_path, LibraryError::Integrity { issues })
                .await);
        }
        self.phase.send_replace(RestorePhase::Reconnected);

        self.phase.send_replace(RestorePhase::Validating);
        let integrity = match self.validator.validate(&self.store).await {
            Ok(report) if report.ok => report,
            Ok(report) => {
                warn!(issues = ?report.issues, "Restored database failed validation");
                let cause = LibraryError::Integrity {
                    issues: report.issues,
                };
                return Err(self.roll_back(&live_path, &temp_path, cause).await);
            }
            Err(e) => {
                let cause = LibraryError::Integrity {
                    issues: vec![format!("validation error: {}", e)],
                };
                return Err(self.roll_back(&live_path, &temp_path, cause).await);
            }
        };

        if let Err(e) = remove_if_exists(&temp_path).await {
            warn!(error = %e, "Failed to remove restore sidecar");
        }
        self.phase.send_replace(RestorePhase::Committed);
        info!(backup_id = %id, "Backup restored");

        Ok(RestoreReport {
            backup_id: record.id,
            pre_restore_backup,
            integrity,
        })
    }

    /// Put the sidecar back over the live path and reconnect. Returns the
    /// error to report to the caller.
    async fn roll_back(&self, live: &Path, temp: &Path, cause: LibraryError) -> LibraryError {
        self.phase.send_replace(RestorePhase::RollingBack);
        self.store.disconnect().await;

        if fs::try_exists(temp).await.unwrap_or(false) {
            if let Err(e) = remove_journal_files(live).await {
                warn!(error = %e, "Failed to clear journal files before rollback");
            }
            match fs::copy(temp, live).await {
                Ok(_) => {
                    if let Err(e) = fs::remove_file(temp).await {
                        warn!(error = %e, "Failed to remove restore sidecar");
                    }
                }
                Err(e) => error!(error = %e, "Failed to restore previous database"),
            }
        }

        match self.store.connect().await {
            Ok(()) => {
                self.phase.send_replace(RestorePhase::Reconnected);
            }
            Err(e) => error!(error = %e, "Reconnect after rollback failed"),
        }
        self.phase.send_replace(RestorePhase::Failed);
        cause
    }

    /// Write a snapshot and index it. `keep` names a backup retention must
    /// not remove, such as the one about to be restored.
    async fn snapshot(&self, label: Option<&str>, keep: Option<&str>) -> Result<BackupRecord> {
        let pool = self.store.pool().await?;
        fs::create_dir_all(&self.backup_dir).await?;

        let created_at = Utc::now();
        let id = Uuid::new_v4().simple().to_string()[..8].to_string();
        let file_name = format!(
            "backup-{}-{}.db",
            id,
            created_at.format("%Y%m%dT%H%M%S%3fZ")
        );
        let path = self.backup_dir.join(&file_name);

        let file_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM media_files")
            .fetch_one(&pool)
            .await?;

        sqlx::query("VACUUM INTO ?")
            .bind(path.to_string_lossy().into_owned())
            .execute(&pool)
            .await?;

        let size = fs::metadata(&path).await?.len();
        let record = BackupRecord {
            id,
            file_name,
            size,
            created_at,
            file_count: file_count as u64,
            version: BACKUP_VERSION.to_string(),
            label: label.map(str::to_string),
        };

        let mut index = self.load_index().await?;
        index.backups.insert(0, record.clone());
        let protected: Vec<&str> = std::iter::once(record.id.as_str()).chain(keep).collect();
        self.enforce_retention(&mut index, &protected).await;
        self.save_index(&index).await?;

        info!(
            backup_id = %record.id,
            size_bytes = record.size,
            file_count = record.file_count,
            "Backup created"
        );
        Ok(record)
    }

    /// Drop the oldest backups beyond `max_backups`, never one named in
    /// `protected`. The index may stay over the limit when every surplus
    /// entry is protected.
    async fn enforce_retention(&self, index: &mut BackupIndex, protected: &[&str]) {
        index.backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        while index.backups.len() > self.max_backups {
            let Some(position) = index
                .backups
                .iter()
                .rposition(|b| !protected.contains(&b.id.as_str()))
            else {
                warn!(
                    count = index.backups.len(),
                    max_backups = self.max_backups,
                    "Retention limit exceeded by protected backups"
                );
                break;
            };
            let expired = index.backups.remove(position);
            match remove_if_exists(&self.backup_dir.join(&expired.file_name)).await {
                Ok(()) => debug!(backup_id = %expired.id, "Expired backup removed"),
                Err(e) => {
                    warn!(backup_id = %expired.id, error = %e, "Failed to remove expired backup")
                }
            }
        }
    }

    async fn load_index(&self) -> Result<BackupIndex> {
        let path = self.backup_dir.join(INDEX_FILE);
        match fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BackupIndex::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_index(&self, index: &BackupIndex) -> Result<()> {
        fs::create_dir_all(&self.backup_dir).await?;
        let path = self.backup_dir.join(INDEX_FILE);
        let tmp = self.backup_dir.join(format!("{}.tmp", INDEX_FILE));
        fs::write(&tmp, serde_json::to_vec_pretty(index)?).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// Backups are compatible when their major version matches [`BACKUP_VERSION`].
fn check_version(found: &str) -> Result<()> {
    let major = |v: &str| v.split('.').next().map(str::to_string);
    if major(found) != major(BACKUP_VERSION) || found.is_empty() {
        return Err(LibraryError::VersionIncompatible {
            found: found.to_string(),
            expected: BACKUP_VERSION.to_string(),
        });
    }
    Ok(())
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn remove_journal_files(live: &Path) -> Result<()> {
    remove_if_exists(&sidecar(live, "-wal")).await?;
    remove_if_exists(&sidecar(live, "-shm")).await
}

/// Keep the live file as `<db>.temp` and copy the backup over it.
async fn swap_in(live: &Path, backup: &Path, temp: &Path) -> Result<()> {
    if fs::try_exists(live).await? {
        fs::copy(live, temp).await?;
    }
    remove_journal_files(live).await?;
    fs::copy(backup, live).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_version_same_major() {
        assert!(check_version("1.0.0").is_ok());
        assert!(check_version("1.4.2").is_ok());
        assert!(matches!(
            check_version("2.0.0"),
            Err(LibraryError::VersionIncompatible { .. })
        ));
        assert!(check_version("").is_err());
    }

    #[test]
    fn test_sidecar_appends_suffix() {
        assert_eq!(
            sidecar(Path::new("/data/library.db"), ".temp"),
            PathBuf::from("/data/library.db.temp")
        );
        assert_eq!(
            sidecar(Path::new("/data/library.db"), "-wal"),
            PathBuf::from("/data/library.db-wal")
        );
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = BackupRecord {
            id: "abcd1234".into(),
            file_name: "backup-abcd1234.db".into(),
            size: 10,
            created_at: Utc::now(),
            file_count: 3,
            version: BACKUP_VERSION.into(),
            label: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["fileName"], "backup-abcd1234.db");
        assert_eq!(json["fileCount"], 3);
        assert!(json.get("label").is_none());
    }
}
