//! The run aggregate and the report derived from it.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::backup::Backup;
use crate::health::VerificationReport;
use crate::phase::{BuildArtifact, PhaseKind};
use crate::release::ReleaseStamp;
use crate::types::{ExitCode, RunFlags};

/// `20260102T030405-a1b2c3`
pub fn new_run_id(now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0x0100_0000);
    format!("{}-{suffix:06x}", now.format("%Y%m%dT%H%M%S"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub index: usize,
    pub name: String,
    pub duration_ms: u64,
    pub simulated: bool,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    Running,
    Succeeded,
    Failed,
    RolledBack,
    RollbackFailed,
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RollbackStatus {
    /// The run never mutated live state, or succeeded.
    NotNeeded,
    Succeeded { backup_id: String },
    Failed { backup_id: String, error: String },
    /// Rollback was required but no backup exists.
    Unavailable,
    /// Dry-run: nothing was deployed, so nothing was restored.
    Simulated,
}

impl RollbackStatus {
    pub fn was_attempted(&self) -> bool {
        matches!(self, RollbackStatus::Succeeded { .. } | RollbackStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseFailure {
    pub phase: PhaseKind,
    pub error: String,
    /// Label of the retried operation that gave up, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default)]
    pub attempts: usize,
}

/// Mutable state of one run. Phases fill it in as they go.
#[derive(Debug, Clone)]
pub struct DeploymentRun {
    pub run_id: String,
    pub flags: RunFlags,
    pub started_at: DateTime<Utc>,
    pub phases_completed: Vec<PhaseRecord>,
    pub release: Option<ReleaseStamp>,
    pub artifact: Option<BuildArtifact>,
    pub backup: Option<Backup>,
    pub verification: Option<VerificationReport>,
    pub distribute_ms: Option<u64>,
    pub final_status: FinalStatus,
}

impl DeploymentRun {
    pub fn new(flags: RunFlags) -> Self {
        let started_at = Utc::now();
        Self {
            run_id: new_run_id(started_at),
            flags,
            started_at,
            phases_completed: Vec::new(),
            release: None,
            artifact: None,
            backup: None,
            verification: None,
            distribute_ms: None,
            final_status: FinalStatus::Running,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn elapsed_ms(&self) -> u64 {
        (Utc::now() - self.started_at).num_milliseconds().max(0) as u64
    }

    pub fn has_completed(&self, kind: PhaseKind) -> bool {
        self.phases_completed.iter().any(|p| p.index == kind.index())
    }
}

/// Everything a caller needs to know about a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub dry_run: bool,
    pub status: FinalStatus,
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<PhaseFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub phases: Vec<PhaseRecord>,
    pub release: Option<ReleaseStamp>,
    pub artifact: Option<BuildArtifact>,
    pub backup: Option<Backup>,
    pub verification: Option<VerificationReport>,
    pub rollback: RollbackStatus,
}

impl RunReport {
    pub fn from_run(
        run: DeploymentRun,
        exit: ExitCode,
        failure: Option<PhaseFailure>,
        rollback: RollbackStatus,
    ) -> Self {
        Self {
            run_id: run.run_id,
            dry_run: run.flags.dry_run,
            status: run.final_status,
            exit_code: exit.code(),
            error: failure.as_ref().map(|f| f.error.clone()),
            failed_phase: failure,
            phases: run.phases_completed,
            release: run.release,
            artifact: run.artifact,
            backup: run.backup,
            verification: run.verification,
            rollback,
        }
    }

    pub fn exit(&self) -> ExitCode {
        match self.exit_code {
            0 => ExitCode::Success,
            2 => ExitCode::Validation,
            3 => ExitCode::Build,
            4 => ExitCode::Deployment,
            5 => ExitCode::Verification,
            6 => ExitCode::RollbackFailed,
            130 => ExitCode::Interrupted,
            _ => ExitCode::General,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}
