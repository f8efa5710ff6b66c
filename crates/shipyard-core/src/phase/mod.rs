//! The six release phases.
//!
//! | # | Phase                | Mutates live | Rolls back on failure | Exit code |
//! |---|----------------------|--------------|-----------------------|-----------|
//! | 1 | Preflight            | no           | no                    | 2         |
//! | 2 | VersionPrepare       | no           | no                    | 2         |
//! | 3 | Build                | no           | no                    | 3         |
//! | 4 | Distribute           | yes          | yes                   | 4         |
//! | 5 | Verify               | no           | yes                   | 5         |
//! | 6 | OperationalReadiness | no           | never fails           | -         |
//!
//! Phases return typed errors; only the orchestrator decides about rollback
//! and the exit code.

mod build;
mod distribute;
mod preflight;
mod readiness;
mod verify;
mod version;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::backup::BackupError;
use crate::context::RunContext;
use crate::health::VerificationReport;
use crate::orchestrator::DeploymentRun;
use crate::retry::Exhausted;
use crate::target::TargetError;
use crate::types::ExitCode;

pub use build::{BuildArtifact, BuildPhase};
pub use distribute::DistributePhase;
pub use preflight::PreflightPhase;
pub use readiness::ReadinessPhase;
pub use verify::{VerifyPhase, build_gate};
pub use version::VersionPreparePhase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Preflight,
    VersionPrepare,
    Build,
    Distribute,
    Verify,
    OperationalReadiness,
}

impl PhaseKind {
    pub const ALL: [PhaseKind; 6] = [
        PhaseKind::Preflight,
        PhaseKind::VersionPrepare,
        PhaseKind::Build,
        PhaseKind::Distribute,
        PhaseKind::Verify,
        PhaseKind::OperationalReadiness,
    ];

    /// 1-based position in the fixed sequence.
    pub fn index(self) -> usize {
        match self {
            PhaseKind::Preflight => 1,
            PhaseKind::VersionPrepare => 2,
            PhaseKind::Build => 3,
            PhaseKind::Distribute => 4,
            PhaseKind::Verify => 5,
            PhaseKind::OperationalReadiness => 6,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PhaseKind::Preflight => "preflight",
            PhaseKind::VersionPrepare => "version-prepare",
            PhaseKind::Build => "build",
            PhaseKind::Distribute => "distribute",
            PhaseKind::Verify => "verify",
            PhaseKind::OperationalReadiness => "operational-readiness",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            PhaseKind::Preflight => "Preflight checks",
            PhaseKind::VersionPrepare => "Prepare release version",
            PhaseKind::Build => "Build artifact",
            PhaseKind::Distribute => "Distribute to target",
            PhaseKind::Verify => "Verify deployment",
            PhaseKind::OperationalReadiness => "Operational readiness",
        }
    }

    /// Safe to run again after a partial run.
    pub fn idempotent(self) -> bool {
        !matches!(self, PhaseKind::VersionPrepare | PhaseKind::Distribute)
    }

    pub fn mutates_live(self) -> bool {
        self == PhaseKind::Distribute
    }

    pub fn requires_rollback_on_failure(self) -> bool {
        matches!(self, PhaseKind::Distribute | PhaseKind::Verify)
    }

    pub fn failure_exit_code(self) -> ExitCode {
        match self {
            PhaseKind::Preflight | PhaseKind::VersionPrepare => ExitCode::Validation,
            PhaseKind::Build => ExitCode::Build,
            PhaseKind::Distribute => ExitCode::Deployment,
            PhaseKind::Verify => ExitCode::Verification,
            PhaseKind::OperationalReadiness => ExitCode::General,
        }
    }

    /// Phases are strictly sequential: the predecessor is index - 1.
    pub fn predecessor(self) -> Option<PhaseKind> {
        let index = self.index();
        (index > 1).then(|| Self::ALL[index - 2])
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PhaseError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Exhausted(#[from] Exhausted),
    #[error(
        "verification failed: {} of {} probe(s) did not pass",
        .0.failures().count(),
        .0.results.len()
    )]
    Verification(Box<VerificationReport>),
    #[error("backup failed: {0}")]
    Backup(#[from] BackupError),
    #[error(transparent)]
    Target(#[from] TargetError),
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PhaseError {
    pub fn validation(message: impl Into<String>) -> Self {
        PhaseError::Validation(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            PhaseError::Cancelled => true,
            PhaseError::Exhausted(err) => err.is_cancelled(),
            PhaseError::Target(err) => err.is_cancelled(),
            PhaseError::Backup(err) => err.is_cancelled(),
            _ => false,
        }
    }

    /// Label of the retried operation that failed, if any.
    pub fn operation(&self) -> Option<&str> {
        match self {
            PhaseError::Exhausted(err) => Some(&err.label),
            PhaseError::Target(TargetError::Operation(err)) => Some(&err.label),
            _ => None,
        }
    }

    pub fn attempts(&self) -> usize {
        match self {
            PhaseError::Exhausted(err) => err.attempt_count(),
            PhaseError::Target(TargetError::Operation(err)) => err.attempt_count(),
            _ => 0,
        }
    }
}

/// One step of the release sequence.
#[async_trait]
pub trait Phase: Send + Sync + fmt::Debug {
    fn kind(&self) -> PhaseKind;

    /// Run the phase, recording its results on `run`. Returns a one-line
    /// summary of what was done (or, in dry-run, what would be done).
    async fn run(&self, ctx: &RunContext, run: &mut DeploymentRun) -> Result<String, PhaseError>;
}

/// Fail with `Cancelled` if the run has been interrupted.
pub(crate) fn ensure_not_cancelled(ctx: &RunContext) -> Result<(), PhaseError> {
    if ctx.cancel_token().is_cancelled() {
        Err(PhaseError::Cancelled)
    } else {
        Ok(())
    }
}

/// The standard sequence, in order.
pub fn standard_phases() -> Vec<Box<dyn Phase>> {
    vec![
        Box::new(PreflightPhase),
        Box::new(VersionPreparePhase),
        Box::new(BuildPhase),
        Box::new(DistributePhase),
        Box::new(VerifyPhase),
        Box::new(ReadinessPhase),
    ]
}
