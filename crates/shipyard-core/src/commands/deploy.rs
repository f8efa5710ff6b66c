//! Deploy command: the full six-phase release.

use tracing::error;

use super::TargetLock;
use crate::context::RunContext;
use crate::orchestrator::{DeploymentRun, FinalStatus, PhaseFailure, PhaseOrchestrator, RollbackStatus, RunReport};
use crate::phase::PhaseKind;

#[derive(Debug)]
pub struct DeployCommand {
    ctx: RunContext,
    orchestrator: PhaseOrchestrator,
    lock: TargetLock,
}

impl DeployCommand {
    pub fn new(ctx: RunContext) -> Self {
        Self::with_orchestrator(ctx, PhaseOrchestrator::standard())
    }

    pub fn with_orchestrator(ctx: RunContext, orchestrator: PhaseOrchestrator) -> Self {
        Self {
            ctx,
            orchestrator,
            lock: TargetLock::default(),
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn lock(&self) -> &TargetLock {
        &self.lock
    }

    /// Lock the target, run every phase, release the lock.
    ///
    /// A target already locked by another run fails as a preflight problem.
    pub async fn execute(&self) -> RunReport {
        let mut run = DeploymentRun::new(self.ctx.flags());
        if let Err(err) = self.lock.acquire(&self.ctx, &run.run_id) {
            error!(error = %err, "could not lock the deployment target");
            run.final_status = FinalStatus::Failed;
            let failure = PhaseFailure {
                phase: PhaseKind::Preflight,
                error: err.to_string(),
                operation: None,
                attempts: 0,
            };
            return RunReport::from_run(
                run,
                PhaseKind::Preflight.failure_exit_code(),
                Some(failure),
                RollbackStatus::NotNeeded,
            );
        }

        let report = self.orchestrator.execute(&self.ctx, run).await;
        self.lock.release();
        report
    }
}
