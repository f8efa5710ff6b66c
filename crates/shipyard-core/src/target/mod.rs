//! The host that holds live deployment state.
//!
//! Phases and the backup manager never touch the filesystem or ssh directly;
//! they go through a [`DeployTarget`], chosen once per run:
//! [`LocalTarget`] for a directory on this machine, [`RemoteTarget`] for a
//! directory reached over ssh, [`SimulatedTarget`] for dry-runs.

mod local;
mod remote;
mod simulated;

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::retry::{Exhausted, OperationSpec};

pub use local::LocalTarget;
pub use remote::{RemoteTarget, scp_command};
pub use simulated::SimulatedTarget;

/// What a snapshot captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    /// False on a first deploy: there was no live path to copy.
    pub source_existed: bool,
    /// Content fingerprint of the snapshot, when the target can compute one.
    pub tree_hash: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("{action} failed on {target}: {detail}")]
    Io {
        target: String,
        action: String,
        detail: String,
    },
    #[error(transparent)]
    Operation(#[from] Exhausted),
}

impl TargetError {
    pub(crate) fn io(target: impl fmt::Display, action: impl Into<String>, err: impl fmt::Display) -> Self {
        TargetError::Io {
            target: target.to_string(),
            action: action.into(),
            detail: err.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TargetError::Operation(exhausted) if exhausted.is_cancelled())
    }
}

#[async_trait]
pub trait DeployTarget: Send + Sync + fmt::Debug {
    /// Human-readable name, also used as the run-lock key.
    fn describe(&self) -> String;

    /// How a service-control or probe command runs on this target.
    fn command_spec(&self, command: &str) -> OperationSpec;

    async fn exists(&self, path: &Path) -> Result<bool, TargetError>;

    /// Replace `live` with the contents of the local `artifact` path.
    async fn push_artifact(&self, artifact: &Path, live: &Path) -> Result<(), TargetError>;

    /// Copy `live` to `dest`. A missing `live` is recorded, not an error.
    async fn snapshot(&self, live: &Path, dest: &Path) -> Result<SnapshotInfo, TargetError>;

    /// Replace `live` with a copy of `snapshot`. Safe to repeat.
    async fn restore_snapshot(&self, snapshot: &Path, live: &Path) -> Result<(), TargetError>;

    async fn write_file(&self, path: &Path, contents: &str) -> Result<(), TargetError>;

    /// `Ok(None)` when the file does not exist.
    async fn read_to_string(&self, path: &Path) -> Result<Option<String>, TargetError>;

    /// Names of the immediate subdirectories of `dir`; empty if `dir` is missing.
    async fn list_dirs(&self, dir: &Path) -> Result<Vec<String>, TargetError>;

    /// Remove a path recursively. Removing a missing path succeeds.
    async fn remove_dir(&self, path: &Path) -> Result<(), TargetError>;

    /// Content fingerprint of `path`, if this target supports it.
    async fn hash_tree(&self, _path: &Path) -> Result<Option<String>, TargetError> {
        Ok(None)
    }
}
