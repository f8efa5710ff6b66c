//! High-level commands for shipyard operations.
//!
//! Each command wraps a [`RunContext`] and returns a serializable report.
//! Frontends render the report and map it to a process exit code; commands
//! never exit the process themselves.

pub mod backups;
pub mod deploy;
pub mod rollback;
pub mod verify;

pub use backups::{BackupsCommand, BackupsReport};
pub use deploy::DeployCommand;
pub use rollback::{RollbackCommand, RollbackOptions, RollbackReport};
pub use verify::{VerifyCommand, VerifyReport};

use std::sync::OnceLock;

use tracing::debug;

use crate::context::RunContext;
use crate::lock::{LockError, RunLock};

/// Run lock held by a command while it may mutate the target.
///
/// The lock is shared with the signal cleanup handler, which may release it
/// before the command finishes unwinding.
#[derive(Debug, Default)]
pub struct TargetLock {
    held: OnceLock<RunLock>,
}

impl TargetLock {
    /// Take the per-target lock. Dry-runs never lock.
    pub fn acquire(&self, ctx: &RunContext, run_id: &str) -> Result<(), LockError> {
        if ctx.is_dry_run() {
            debug!("dry-run; not taking the run lock");
            return Ok(());
        }
        if self.held.get().is_some() {
            return Ok(());
        }
        let lock = RunLock::acquire(&ctx.config().lock_dir(), &ctx.target_key(), run_id)?;
        let _ = self.held.set(lock);
        Ok(())
    }

    pub fn is_acquired(&self) -> bool {
        self.held.get().is_some()
    }

    pub fn release(&self) {
        if let Some(lock) = self.held.get() {
            lock.release();
        }
    }
}
