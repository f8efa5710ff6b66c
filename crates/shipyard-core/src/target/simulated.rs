use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use super::{DeployTarget, SnapshotInfo, TargetError};
use crate::retry::OperationSpec;

/// Dry-run stand-in for a real target. Logs every call, mutates nothing.
#[derive(Debug, Clone)]
pub struct SimulatedTarget {
    label: String,
}

impl SimulatedTarget {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

#[async_trait]
impl DeployTarget for SimulatedTarget {
    fn describe(&self) -> String {
        self.label.clone()
    }

    fn command_spec(&self, command: &str) -> OperationSpec {
        OperationSpec::Shell {
            command: command.to_string(),
            cwd: None,
        }
    }

    async fn exists(&self, _path: &Path) -> Result<bool, TargetError> {
        Ok(true)
    }

    async fn push_artifact(&self, artifact: &Path, live: &Path) -> Result<(), TargetError> {
        info!(
            deploy_target = %self.label,
            artifact = %artifact.display(),
            live = %live.display(),
            "[dry-run] would replace live directory with artifact"
        );
        Ok(())
    }

    async fn snapshot(&self, live: &Path, dest: &Path) -> Result<SnapshotInfo, TargetError> {
        info!(deploy_target = %self.label, live = %live.display(), dest = %dest.display(), "[dry-run] would snapshot");
        Ok(SnapshotInfo {
            source_existed: true,
            tree_hash: None,
        })
    }

    async fn restore_snapshot(&self, snapshot: &Path, live: &Path) -> Result<(), TargetError> {
        info!(
            deploy_target = %self.label,
            snapshot = %snapshot.display(),
            live = %live.display(),
            "[dry-run] would restore snapshot"
        );
        Ok(())
    }

    async fn write_file(&self, path: &Path, contents: &str) -> Result<(), TargetError> {
        info!(deploy_target = %self.label, path = %path.display(), bytes = contents.len(), "[dry-run] would write file");
        Ok(())
    }

    async fn read_to_string(&self, _path: &Path) -> Result<Option<String>, TargetError> {
        Ok(None)
    }

    async fn list_dirs(&self, _dir: &Path) -> Result<Vec<String>, TargetError> {
        Ok(Vec::new())
    }

    async fn remove_dir(&self, path: &Path) -> Result<(), TargetError> {
        info!(deploy_target = %self.label, path = %path.display(), "[dry-run] would remove");
        Ok(())
    }
}
