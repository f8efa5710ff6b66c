//! Drives the phase sequence and owns every rollback and exit-code decision.

mod run;

use std::time::Instant;

use tracing::{Instrument, error, info, info_span, warn};

use crate::context::RunContext;
use crate::phase::{Phase, PhaseError, PhaseKind, standard_phases};
use crate::types::ExitCode;

pub use run::{DeploymentRun, FinalStatus, PhaseFailure, PhaseRecord, RollbackStatus, RunReport, new_run_id};

#[derive(Debug)]
pub struct PhaseOrchestrator {
    phases: Vec<Box<dyn Phase>>,
}

impl PhaseOrchestrator {
    pub fn standard() -> Self {
        Self {
            phases: standard_phases(),
        }
    }

    /// Use a custom phase list. Phases must be given in index order.
    pub fn with_phases(phases: Vec<Box<dyn Phase>>) -> anyhow::Result<Self> {
        for (position, phase) in phases.iter().enumerate() {
            let kind = phase.kind();
            anyhow::ensure!(
                kind.index() == position + 1,
                "phase {kind} has index {} but is at position {}",
                kind.index(),
                position + 1
            );
        }
        Ok(Self { phases })
    }

    pub fn phases(&self) -> impl Iterator<Item = PhaseKind> + '_ {
        self.phases.iter().map(|p| p.kind())
    }

    pub async fn run(&self, ctx: &RunContext) -> RunReport {
        self.execute(ctx, DeploymentRun::new(ctx.flags())).await
    }

    /// Run every phase in order against `run`, then build the report.
    pub async fn execute(&self, ctx: &RunContext, run: DeploymentRun) -> RunReport {
        let span = info_span!("run", run_id = %run.run_id, dry_run = ctx.is_dry_run());
        self.drive(ctx, run).instrument(span).await
    }

    async fn drive(&self, ctx: &RunContext, mut run: DeploymentRun) -> RunReport {
        let prefix = if ctx.is_dry_run() { "[dry-run] " } else { "" };
        info!(deploy_target = %ctx.target_key(), "{prefix}starting deployment of {}", ctx.config().service.name);

        for phase in &self.phases {
            let kind = phase.kind();
            if ctx.cancel_token().is_cancelled() {
                return interrupted(ctx, run, kind).await;
            }

            if kind.mutates_live() {
                if let Err(err) = confirm(ctx).await {
                    return interrupted_by(ctx, run, kind, err).await;
                }
                if let Err(err) = take_backup(ctx, &mut run).await {
                    if err.is_cancelled() {
                        return interrupted_by(ctx, run, kind, err).await;
                    }
                    error!(phase = %kind, error = %err, "pre-deploy backup failed; live state untouched");
                    return finish_failed(run, kind, &err, RollbackStatus::NotNeeded, kind.failure_exit_code());
                }
            }

            let phase_span = info_span!("phase", index = kind.index(), name = kind.name());
            let started = Instant::now();
            info!(parent: &phase_span, "{prefix}{}", kind.title());
            let result = phase.run(ctx, &mut run).instrument(phase_span.clone()).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(summary) => {
                    info!(parent: &phase_span, duration_ms, "{prefix}{summary}");
                    run.phases_completed.push(PhaseRecord {
                        index: kind.index(),
                        name: kind.name().to_string(),
                        duration_ms,
                        simulated: ctx.is_dry_run(),
                        summary,
                    });
                }
                Err(err) if err.is_cancelled() || ctx.cancel_token().is_cancelled() => {
                    return interrupted_by(ctx, run, kind, err).await;
                }
                Err(err) if kind == PhaseKind::OperationalReadiness => {
                    warn!(parent: &phase_span, error = %describe(&err), "readiness report failed; run still succeeds");
                    run.phases_completed.push(PhaseRecord {
                        index: kind.index(),
                        name: kind.name().to_string(),
                        duration_ms,
                        simulated: ctx.is_dry_run(),
                        summary: format!("report unavailable: {}", describe(&err)),
                    });
                }
                Err(err) => {
                    error!(parent: &phase_span, operation = err.operation(), attempts = err.attempts(), "{}", describe(&err));
                    return fail(ctx, run, kind, err).await;
                }
            }
        }

        run.final_status = FinalStatus::Succeeded;
        info!(elapsed_ms = run.elapsed_ms(), "{prefix}deployment succeeded");
        RunReport::from_run(run, ExitCode::Success, None, RollbackStatus::NotNeeded)
    }
}

impl Default for PhaseOrchestrator {
    fn default() -> Self {
        Self::standard()
    }
}

fn describe(err: &PhaseError) -> String {
    match err {
        PhaseError::Other(err) => format!("{err:#}"),
        err => err.to_string(),
    }
}

fn failure_of(kind: PhaseKind, err: &PhaseError) -> PhaseFailure {
    PhaseFailure {
        phase: kind,
        error: describe(err),
        operation: err.operation().map(str::to_string),
        attempts: err.attempts(),
    }
}

fn finish_failed(
    mut run: DeploymentRun,
    kind: PhaseKind,
    err: &PhaseError,
    rollback: RollbackStatus,
    exit: ExitCode,
) -> RunReport {
    run.final_status = match &rollback {
        RollbackStatus::Succeeded { .. } => FinalStatus::RolledBack,
        RollbackStatus::Failed { .. } => FinalStatus::RollbackFailed,
        _ => FinalStatus::Failed,
    };
    RunReport::from_run(run, exit, Some(failure_of(kind, err)), rollback)
}

/// Pause before the first mutating phase unless running unattended.
async fn confirm(ctx: &RunContext) -> Result<(), PhaseError> {
    let delay = ctx.config().confirm_delay();
    if ctx.flags().force || ctx.is_dry_run() || delay.is_zero() {
        return Ok(());
    }
    warn!(
        deploy_target = %ctx.target_key(),
        "deploying in {}s; interrupt now to abort (use --force to skip this pause)",
        delay.as_secs()
    );
    tokio::select! {
        biased;
        _ = ctx.cancel_token().cancelled() => Err(PhaseError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

async fn take_backup(ctx: &RunContext, run: &mut DeploymentRun) -> Result<(), PhaseError> {
    if ctx.flags().skip_backup {
        warn!("--skip-backup given; live state will not be snapshotted");
        return Ok(());
    }
    if ctx.is_dry_run() {
        info!(
            live = %ctx.live_path().display(),
            root = %ctx.backups().backup_root().display(),
            "[dry-run] would snapshot live state"
        );
        return Ok(());
    }
    let live_release = ctx.live_stamp().await.map(|stamp| stamp.full_version());
    let backup = ctx.backups().snapshot(live_release.as_deref()).await?;
    info!(backup = %backup.id, "pre-deploy backup taken");
    run.backup = Some(backup);
    Ok(())
}

async fn fail(ctx: &RunContext, run: DeploymentRun, kind: PhaseKind, err: PhaseError) -> RunReport {
    if !kind.requires_rollback_on_failure() {
        return finish_failed(run, kind, &err, RollbackStatus::NotNeeded, kind.failure_exit_code());
    }

    let rollback = roll_back(ctx, &run).await;
    let exit = match rollback {
        RollbackStatus::Failed { .. } => ExitCode::RollbackFailed,
        _ => kind.failure_exit_code(),
    };
    finish_failed(run, kind, &err, rollback, exit)
}

/// Restore this run's backup, or the latest retained one when the run
/// skipped its own snapshot.
async fn roll_back(ctx: &RunContext, run: &DeploymentRun) -> RollbackStatus {
    if ctx.is_dry_run() {
        info!("[dry-run] would roll back; nothing was deployed");
        return RollbackStatus::Simulated;
    }

    let backup = match &run.backup {
        Some(backup) => Some(backup.clone()),
        None => match ctx.backups().latest().await {
            Ok(latest) => latest,
            Err(err) => {
                error!(error = %err, "could not list backups for rollback");
                None
            }
        },
    };
    let Some(backup) = backup else {
        error!(
            live = %ctx.live_path().display(),
            "rollback required but no backup is available; live state needs manual recovery"
        );
        return RollbackStatus::Unavailable;
    };

    warn!(backup = %backup.id, "rolling back");
    match ctx.backups().restore(&backup).await {
        Ok(()) => {
            info!(backup = %backup.id, "rollback succeeded");
            RollbackStatus::Succeeded { backup_id: backup.id }
        }
        Err(err) => {
            error!(
                backup = %backup.id,
                error = %err,
                "CRITICAL: rollback failed; live state may be inconsistent and needs manual recovery"
            );
            RollbackStatus::Failed {
                backup_id: backup.id,
                error: err.to_string(),
            }
        }
    }
}

async fn interrupted(ctx: &RunContext, run: DeploymentRun, kind: PhaseKind) -> RunReport {
    interrupted_by(ctx, run, kind, PhaseError::Cancelled).await
}

/// Signals never trigger a rollback: state at interruption is indeterminate.
async fn interrupted_by(ctx: &RunContext, mut run: DeploymentRun, kind: PhaseKind, err: PhaseError) -> RunReport {
    let backup = match &run.backup {
        Some(backup) => Some(backup.id.clone()),
        None if ctx.is_dry_run() => None,
        None => ctx.backups().latest().await.ok().flatten().map(|b| b.id),
    };
    warn!(
        phase = %kind,
        backup = backup.as_deref().unwrap_or("none"),
        "run interrupted; no rollback attempted, live state is indeterminate"
    );
    run.final_status = FinalStatus::Interrupted;
    let failure = PhaseFailure {
        phase: kind,
        error: format!("interrupted ({})", describe(&err)),
        operation: err.operation().map(str::to_string),
        attempts: err.attempts(),
    };
    RunReport::from_run(run, ExitCode::Interrupted, Some(failure), RollbackStatus::NotNeeded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::{BuildPhase, PreflightPhase};

    #[test]
    fn standard_orchestrator_runs_six_phases_in_order() {
        let kinds: Vec<_> = PhaseOrchestrator::standard().phases().collect();
        assert_eq!(kinds, PhaseKind::ALL.to_vec());
    }

    #[test]
    fn out_of_order_phases_are_rejected() {
        let err = PhaseOrchestrator::with_phases(vec![Box::new(BuildPhase), Box::new(PreflightPhase)])
            .unwrap_err();
        assert!(err.to_string().contains("build"));
    }
}
