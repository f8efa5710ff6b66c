//! Shared core types used across phases, the orchestrator and frontends.

use serde::{Deserialize, Serialize};

/// Flags that shape a single run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFlags {
    /// Unattended mode: skip the confirmation pause before distribution.
    pub force: bool,
    /// Replace every mutating call with a logged no-op.
    pub dry_run: bool,
    /// Emit per-attempt and per-probe diagnostics.
    pub verbose: bool,
    /// Do not snapshot live state before distribution.
    pub skip_backup: bool,
}

/// Process exit codes.
///
/// These are a stable contract for calling automation: each failure class
/// maps to its own code so callers can branch without parsing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitCode {
    /// All phases completed and verification was healthy.
    Success,
    /// Unclassified error (bad config, I/O outside a phase).
    General,
    /// Preflight or version preparation failed.
    Validation,
    /// Build failed.
    Build,
    /// Distribution or the pre-deploy backup failed.
    Deployment,
    /// Verification gate reported at least one failing probe.
    Verification,
    /// A policy rollback was attempted and failed.
    RollbackFailed,
    /// The run was interrupted by a signal.
    Interrupted,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::General => 1,
            ExitCode::Validation => 2,
            ExitCode::Build => 3,
            ExitCode::Deployment => 4,
            ExitCode::Verification => 5,
            ExitCode::RollbackFailed => 6,
            ExitCode::Interrupted => 130,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExitCode::Success => "success",
            ExitCode::General => "error",
            ExitCode::Validation => "validation failure",
            ExitCode::Build => "build failure",
            ExitCode::Deployment => "deployment failure",
            ExitCode::Verification => "verification failure",
            ExitCode::RollbackFailed => "rollback failure",
            ExitCode::Interrupted => "interrupted",
        }
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::Success
    }
}
