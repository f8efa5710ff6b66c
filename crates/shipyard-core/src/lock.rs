//! One deployment at a time per target.
//!
//! A run takes `<lock_dir>/<target-key>.lock`, created with `create_new` so
//! two processes cannot both succeed. The file records who holds it. It is
//! removed when the [`RunLock`] is released or dropped.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOwner {
    pub run_id: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub target: String,
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error(
        "another deployment to {target} is in progress ({}); remove {} if it is stale",
        describe_holder(.holder),
        .path.display()
    )]
    Held {
        target: String,
        path: PathBuf,
        holder: Option<LockOwner>,
    },
    #[error("failed to manage lock file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn describe_holder(holder: &Option<LockOwner>) -> String {
    match holder {
        Some(owner) => format!(
            "run {}, pid {}, since {}",
            owner.run_id,
            owner.pid,
            owner.started_at.to_rfc3339()
        ),
        None => "holder unknown".to_string(),
    }
}

/// File-name-safe key for a target description.
pub fn lock_key(target: &str) -> String {
    let key: String = target
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    if key.is_empty() { "default".to_string() } else { key }
}

#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    owner: LockOwner,
    released: AtomicBool,
}

impl RunLock {
    pub fn acquire(lock_dir: &Path, target: &str, run_id: &str) -> Result<Self, LockError> {
        std::fs::create_dir_all(lock_dir).map_err(|source| LockError::Io {
            path: lock_dir.to_path_buf(),
            source,
        })?;
        let path = lock_dir.join(format!("{}.lock", lock_key(target)));
        let owner = LockOwner {
            run_id: run_id.to_string(),
            pid: std::process::id(),
            started_at: Utc::now(),
            target: target.to_string(),
        };

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(&path)
                    .ok()
                    .and_then(|text| serde_json::from_str(&text).ok());
                return Err(LockError::Held {
                    target: target.to_string(),
                    path,
                    holder,
                });
            }
            Err(source) => return Err(LockError::Io { path, source }),
        };

        let body = serde_json::to_vec_pretty(&owner).map_err(|err| LockError::Io {
            path: path.clone(),
            source: err.into(),
        })?;
        if let Err(source) = file.write_all(&body) {
            let _ = std::fs::remove_file(&path);
            return Err(LockError::Io { path, source });
        }
        debug!(lock = %path.display(), "acquired run lock");

        Ok(Self {
            path,
            owner,
            released: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn owner(&self) -> &LockOwner {
        &self.owner
    }

    /// Remove the lock file. Safe to call more than once, from any thread.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(lock = %self.path.display(), "released run lock"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(lock = %self.path.display(), error = %err, "failed to remove run lock"),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_acquire_names_the_holder() {
        let tmp = TempDir::new().unwrap();
        let first = RunLock::acquire(tmp.path(), "deploy@web:22", "run-1").unwrap();

        let err = RunLock::acquire(tmp.path(), "deploy@web:22", "run-2").unwrap_err();

        match err {
            LockError::Held { holder, .. } => assert_eq!(holder.unwrap().run_id, "run-1"),
            other => panic!("unexpected error {other:?}"),
        }
        drop(first);
        RunLock::acquire(tmp.path(), "deploy@web:22", "run-3").unwrap();
    }

    #[test]
    fn different_targets_do_not_conflict() {
        let tmp = TempDir::new().unwrap();
        let _a = RunLock::acquire(tmp.path(), "a", "r1").unwrap();
        let _b = RunLock::acquire(tmp.path(), "b", "r2").unwrap();
    }

    #[test]
    fn release_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let lock = RunLock::acquire(tmp.path(), "t", "r").unwrap();
        lock.release();
        lock.release();
        assert!(!lock.path().exists());
    }

    #[test]
    fn keys_are_filename_safe() {
        assert_eq!(lock_key("deploy@web.example.com:22"), "deploy_web.example.com_22");
        assert_eq!(lock_key(""), "default");
    }
}
