use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{DeployTarget, SnapshotInfo, TargetError};
use crate::fs::{copy_tree, hash_tree, remove_path, replace_path};
use crate::retry::OperationSpec;

/// Live state in a directory on this machine.
#[derive(Debug, Clone, Default)]
pub struct LocalTarget {
    /// Working directory for service-control commands.
    workdir: Option<PathBuf>,
}

impl LocalTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    async fn blocking<T, F>(&self, action: &str, f: F) -> Result<T, TargetError>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|err| TargetError::io(self.describe(), action, err))?
            .map_err(|err| TargetError::io(self.describe(), action, format!("{err:#}")))
    }
}

#[async_trait]
impl DeployTarget for LocalTarget {
    fn describe(&self) -> String {
        "localhost".to_string()
    }

    fn command_spec(&self, command: &str) -> OperationSpec {
        OperationSpec::Shell {
            command: command.to_string(),
            cwd: self.workdir.clone(),
        }
    }

    async fn exists(&self, path: &Path) -> Result<bool, TargetError> {
        let path = path.to_path_buf();
        self.blocking("stat", move || Ok(std::fs::symlink_metadata(&path).is_ok()))
            .await
    }

    async fn push_artifact(&self, artifact: &Path, live: &Path) -> Result<(), TargetError> {
        debug!(artifact = %artifact.display(), live = %live.display(), "replacing live directory");
        let (artifact, live) = (artifact.to_path_buf(), live.to_path_buf());
        self.blocking("push artifact", move || replace_path(&artifact, &live))
            .await
    }

    async fn snapshot(&self, live: &Path, dest: &Path) -> Result<SnapshotInfo, TargetError> {
        let (live, dest) = (live.to_path_buf(), dest.to_path_buf());
        self.blocking("snapshot", move || {
            if std::fs::symlink_metadata(&live).is_err() {
                return Ok(SnapshotInfo {
                    source_existed: false,
                    tree_hash: None,
                });
            }
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            copy_tree(&live, &dest)?;
            Ok(SnapshotInfo {
                source_existed: true,
                tree_hash: Some(hash_tree(&dest)?),
            })
        })
        .await
    }

    async fn restore_snapshot(&self, snapshot: &Path, live: &Path) -> Result<(), TargetError> {
        let (snapshot, live) = (snapshot.to_path_buf(), live.to_path_buf());
        self.blocking("restore", move || replace_path(&snapshot, &live))
            .await
    }

    async fn write_file(&self, path: &Path, contents: &str) -> Result<(), TargetError> {
        let path = path.to_path_buf();
        let contents = contents.to_string();
        self.blocking("write file", move || {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, contents)?;
            Ok(())
        })
        .await
    }

    async fn read_to_string(&self, path: &Path) -> Result<Option<String>, TargetError> {
        let path = path.to_path_buf();
        self.blocking("read file", move || match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        })
        .await
    }

    async fn list_dirs(&self, dir: &Path) -> Result<Vec<String>, TargetError> {
        let dir = dir.to_path_buf();
        self.blocking("list directory", move || {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(err) => return Err(err.into()),
            };
            let mut names = Vec::new();
            for entry in entries {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    names.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
            names.sort();
            Ok(names)
        })
        .await
    }

    async fn remove_dir(&self, path: &Path) -> Result<(), TargetError> {
        let path = path.to_path_buf();
        self.blocking("remove", move || match remove_path(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        })
        .await
    }

    async fn hash_tree(&self, path: &Path) -> Result<Option<String>, TargetError> {
        let path = path.to_path_buf();
        self.blocking("hash", move || hash_tree(&path).map(Some))
            .await
    }
}
