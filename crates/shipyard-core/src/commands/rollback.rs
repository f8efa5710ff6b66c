//! Rollback command: manual restore of a retained backup.

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::TargetLock;
use crate::backup::{Backup, RestoreError};
use crate::context::RunContext;
use crate::orchestrator::{RollbackStatus, new_run_id};
use crate::types::ExitCode;

#[derive(Debug, Clone, Default)]
pub struct RollbackOptions {
    /// Backup to restore. `None` restores the latest.
    pub backup_id: Option<String>,
}

impl RollbackOptions {
    pub fn latest() -> Self {
        Self::default()
    }

    pub fn with_backup(mut self, id: impl Into<String>) -> Self {
        self.backup_id = Some(id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackReport {
    pub dry_run: bool,
    pub backup: Option<Backup>,
    pub status: RollbackStatus,
    pub exit_code: i32,
}

#[derive(Debug)]
pub struct RollbackCommand {
    ctx: RunContext,
    lock: TargetLock,
}

impl RollbackCommand {
    pub fn new(ctx: RunContext) -> Self {
        Self {
            ctx,
            lock: TargetLock::default(),
        }
    }

    pub fn lock(&self) -> &TargetLock {
        &self.lock
    }

    pub async fn execute(&self, options: &RollbackOptions) -> anyhow::Result<RollbackReport> {
        if self.ctx.is_dry_run() {
            info!(backup = options.backup_id.as_deref().unwrap_or("latest"), "[dry-run] would restore backup");
            return Ok(RollbackReport {
                dry_run: true,
                backup: None,
                status: RollbackStatus::Simulated,
                exit_code: ExitCode::Success.code(),
            });
        }

        self.lock.acquire(&self.ctx, &new_run_id(chrono::Utc::now()))?;
        let result = self.restore(options).await;
        self.lock.release();
        result
    }

    async fn restore(&self, options: &RollbackOptions) -> anyhow::Result<RollbackReport> {
        let backups = self.ctx.backups();
        let backup = match &options.backup_id {
            Some(id) => backups.find(id).await?,
            None => backups.latest().await?,
        };

        let Some(backup) = backup else {
            let err = RestoreError::NoBackup;
            warn!(
                root = %backups.backup_root().display(),
                requested = options.backup_id.as_deref().unwrap_or("latest"),
                "{err}"
            );
            return Ok(RollbackReport {
                dry_run: false,
                backup: None,
                status: RollbackStatus::Unavailable,
                exit_code: ExitCode::RollbackFailed.code(),
            });
        };

        match backups.restore(&backup).await {
            Ok(()) => Ok(RollbackReport {
                dry_run: false,
                status: RollbackStatus::Succeeded {
                    backup_id: backup.id.clone(),
                },
                backup: Some(backup),
                exit_code: ExitCode::Success.code(),
            }),
            Err(err) => {
                error!(backup = %backup.id, error = %err, "rollback failed; live state needs manual recovery");
                Ok(RollbackReport {
                    dry_run: false,
                    status: RollbackStatus::Failed {
                        backup_id: backup.id.clone(),
                        error: err.to_string(),
                    },
                    backup: Some(backup),
                    exit_code: ExitCode::RollbackFailed.code(),
                })
            }
        }
    }
}
