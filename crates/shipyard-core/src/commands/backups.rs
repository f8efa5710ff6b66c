//! Backups command: list what a rollback could restore.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::backup::Backup;
use crate::context::RunContext;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupsReport {
    pub backup_root: PathBuf,
    pub live_path: PathBuf,
    /// Oldest first; the last entry is what `rollback` restores by default.
    pub backups: Vec<Backup>,
}

impl BackupsReport {
    pub fn latest(&self) -> Option<&Backup> {
        self.backups.last()
    }
}

#[derive(Debug)]
pub struct BackupsCommand {
    ctx: RunContext,
}

impl BackupsCommand {
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx }
    }

    pub async fn execute(&self) -> anyhow::Result<BackupsReport> {
        let backups = self.ctx.backups();
        Ok(BackupsReport {
            backup_root: backups.backup_root().to_path_buf(),
            live_path: backups.live_path().to_path_buf(),
            backups: backups.list().await?,
        })
    }
}
