//! Pre-deploy snapshots of live state, and restoring them.
//!
//! Layout under the backup root, on the target:
//!
//! ```text
//! <backup_root>/
//!   backup-20260101-120000-123/
//!     backup.json   # manifest
//!     data/         # copy of the live path
//! ```
//!
//! Ids sort lexicographically in creation order, so the newest backup is the
//! last directory name.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::retry::Exhausted;
use crate::service::ServiceControl;
use crate::target::{DeployTarget, TargetError};

pub const BACKUP_PREFIX: &str = "backup-";
pub const MANIFEST_FILE: &str = "backup.json";
const DATA_DIR: &str = "data";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    pub id: String,
    pub source_path: PathBuf,
    pub snapshot_path: PathBuf,
    pub created_at: DateTime<Utc>,
    /// False when there was nothing live to copy (first deploy).
    pub source_existed: bool,
    #[serde(default)]
    pub tree_hash: Option<String>,
    /// Release that was live when the snapshot was taken, if known.
    #[serde(default)]
    pub release: Option<String>,
}

pub fn backup_id(at: DateTime<Utc>) -> String {
    format!("{BACKUP_PREFIX}{}", at.format("%Y%m%d-%H%M%S-%3f"))
}

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error(transparent)]
    Target(#[from] TargetError),
    #[error("backup {id} has an unreadable manifest: {detail}")]
    Manifest { id: String, detail: String },
    #[error("could not allocate a free backup id under {0}")]
    IdExhausted(String),
}

impl BackupError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BackupError::Target(err) if err.is_cancelled())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    #[error("no backup available to restore")]
    NoBackup,
    #[error("could not stop the service before restoring {id}: {source}")]
    Stop {
        id: String,
        #[source]
        source: Exhausted,
    },
    #[error("backup {id} is corrupt: expected tree hash {expected}, found {actual}")]
    Corrupt {
        id: String,
        expected: String,
        actual: String,
    },
    #[error("could not replace live state from {id}: {source}")]
    Replace {
        id: String,
        #[source]
        source: TargetError,
    },
    #[error("restored {id} but the service did not start: {source}")]
    Restart {
        id: String,
        #[source]
        source: Exhausted,
    },
}

/// Snapshots and restores one live path on one target.
#[derive(Debug, Clone)]
pub struct BackupManager {
    target: Arc<dyn DeployTarget>,
    service: ServiceControl,
    backup_root: PathBuf,
    live_path: PathBuf,
}

impl BackupManager {
    pub fn new(
        target: Arc<dyn DeployTarget>,
        service: ServiceControl,
        backup_root: impl Into<PathBuf>,
        live_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            target,
            service,
            backup_root: backup_root.into(),
            live_path: live_path.into(),
        }
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    pub fn live_path(&self) -> &Path {
        &self.live_path
    }

    fn dir_for(&self, id: &str) -> PathBuf {
        self.backup_root.join(id)
    }

    async fn allocate_id(&self) -> Result<(String, DateTime<Utc>), BackupError> {
        let now = Utc::now();
        for offset in 0..1000 {
            let at = now + ChronoDuration::milliseconds(offset);
            let id = backup_id(at);
            if !self.target.exists(&self.dir_for(&id)).await? {
                return Ok((id, at));
            }
        }
        Err(BackupError::IdExhausted(self.backup_root.display().to_string()))
    }

    /// Copy the live path into a new timestamped backup.
    pub async fn snapshot(&self, release: Option<&str>) -> Result<Backup, BackupError> {
        let (id, created_at) = self.allocate_id().await?;
        let dir = self.dir_for(&id);
        let snapshot_path = dir.join(DATA_DIR);

        info!(backup = %id, live = %self.live_path.display(), "taking backup");
        let info = self.target.snapshot(&self.live_path, &snapshot_path).await?;
        if !info.source_existed {
            info!(backup = %id, "live path does not exist yet; recording empty backup");
        }

        let backup = Backup {
            id,
            source_path: self.live_path.clone(),
            snapshot_path,
            created_at,
            source_existed: info.source_existed,
            tree_hash: info.tree_hash,
            release: release.map(str::to_string),
        };
        let manifest = serde_json::to_string_pretty(&backup).map_err(|err| BackupError::Manifest {
            id: backup.id.clone(),
            detail: err.to_string(),
        })?;
        self.target
            .write_file(&dir.join(MANIFEST_FILE), &manifest)
            .await?;
        Ok(backup)
    }

    /// Check the snapshot, stop the service, put the snapshot back in place,
    /// start the service. A corrupt snapshot is refused before the service is
    /// touched.
    ///
    /// Restoring the same backup twice leaves the same end state.
    pub async fn restore(&self, backup: &Backup) -> Result<(), RestoreError> {
        info!(backup = %backup.id, live = %backup.source_path.display(), "restoring backup");
        let replace_err = |source| RestoreError::Replace {
            id: backup.id.clone(),
            source,
        };
        if backup.source_existed
            && let Some(expected) = &backup.tree_hash
        {
            let actual = self
                .target
                .hash_tree(&backup.snapshot_path)
                .await
                .map_err(replace_err)?;
            if let Some(actual) = actual.filter(|actual| actual != expected) {
                return Err(RestoreError::Corrupt {
                    id: backup.id.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        self.service.stop().await.map_err(|source| RestoreError::Stop {
            id: backup.id.clone(),
            source,
        })?;

        if backup.source_existed {
            self.target
                .restore_snapshot(&backup.snapshot_path, &backup.source_path)
                .await
                .map_err(replace_err)?;
        } else {
            debug!(backup = %backup.id, "backup predates the first deploy; removing live path");
            self.target
                .remove_dir(&backup.source_path)
                .await
                .map_err(replace_err)?;
        }

        self.service.start().await.map_err(|source| RestoreError::Restart {
            id: backup.id.clone(),
            source,
        })?;
        info!(backup = %backup.id, "restore complete");
        Ok(())
    }

    /// All readable backups, oldest first.
    pub async fn list(&self) -> Result<Vec<Backup>, BackupError> {
        let mut backups = Vec::new();
        for name in self.target.list_dirs(&self.backup_root).await? {
            if !name.starts_with(BACKUP_PREFIX) {
                continue;
            }
            match self.read_manifest(&name).await {
                Ok(Some(backup)) => backups.push(backup),
                Ok(None) => debug!(backup = %name, "no manifest; skipping"),
                Err(err) => warn!(backup = %name, error = %err, "skipping unreadable backup"),
            }
        }
        backups.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(backups)
    }

    pub async fn latest(&self) -> Result<Option<Backup>, BackupError> {
        Ok(self.list().await?.pop())
    }

    pub async fn find(&self, id: &str) -> Result<Option<Backup>, BackupError> {
        self.read_manifest(id).await
    }

    async fn read_manifest(&self, id: &str) -> Result<Option<Backup>, BackupError> {
        let path = self.dir_for(id).join(MANIFEST_FILE);
        let Some(text) = self.target.read_to_string(&path).await? else {
            return Ok(None);
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|err| BackupError::Manifest {
                id: id.to_string(),
                detail: err.to_string(),
            })
    }

    /// Delete a backup after a successful run.
    pub async fn discard(&self, backup: &Backup) -> Result<(), BackupError> {
        info!(backup = %backup.id, "discarding backup");
        self.target.remove_dir(&self.dir_for(&backup.id)).await?;
        Ok(())
    }
}
