//! Shipyard Core Library
//!
//! Release pipeline for one service on one target: preflight, version
//! stamping, build, distribution, a strict verification gate, and
//! backup-based rollback when distribution or verification fails.

pub mod backup;
pub mod cancel;
pub mod commands;
pub mod config;
pub mod context;
pub mod exec;
pub mod fs;
pub mod git;
pub mod health;
pub mod lock;
pub mod orchestrator;
pub mod phase;
pub mod release;
pub mod remote;
pub mod retry;
pub mod service;
pub mod target;
pub mod types;

/// Re-exports of commonly used types
pub mod prelude {
    // Configuration
    pub use crate::config::{ConfigError, ShipyardConfig, load_config, parse_config_str};

    // Run
    pub use crate::cancel::{CancelToken, CleanupLatch};
    pub use crate::context::{Collaborators, RunContext};
    pub use crate::orchestrator::{
        DeploymentRun, FinalStatus, PhaseOrchestrator, RollbackStatus, RunReport,
    };
    pub use crate::phase::{Phase, PhaseError, PhaseKind};
    pub use crate::types::{ExitCode, RunFlags};

    // Capabilities
    pub use crate::health::{HealthCheckResult, HealthProbe, VerificationGate, VerificationReport};
    pub use crate::remote::{RemoteChannel, RemoteHost};
    pub use crate::retry::{Operation, OperationSpec, RetryExecutor, RetryPolicy};
    pub use crate::target::{DeployTarget, LocalTarget, RemoteTarget};

    // Backups
    pub use crate::backup::{Backup, BackupManager, RestoreError};
}
