use async_trait::async_trait;
use tracing::{info, warn};

use super::{Phase, PhaseError, PhaseKind};
use crate::context::RunContext;
use crate::orchestrator::DeploymentRun;

/// Phase 6: report and tidy up. Never fails the run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadinessPhase;

#[async_trait]
impl Phase for ReadinessPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::OperationalReadiness
    }

    async fn run(&self, ctx: &RunContext, run: &mut DeploymentRun) -> Result<String, PhaseError> {
        let build_ms = run.artifact.as_ref().map_or(0, |a| a.duration_ms);
        let deploy_ms = run.distribute_ms.unwrap_or(0);
        let release = run
            .release
            .as_ref()
            .map_or_else(|| "unknown release".to_string(), ToString::to_string);

        info!(
            release = %release,
            deploy_target = %ctx.target_key(),
            build_ms,
            deploy_ms,
            total_ms = run.elapsed_ms(),
            "deployment ready"
        );

        let keep = ctx.config().backup.keep_on_success || ctx.is_dry_run();
        if let Some(backup) = &run.backup
            && !keep
        {
            if let Err(err) = ctx.backups().discard(backup).await {
                warn!(backup = %backup.id, error = %err, "could not discard backup; leaving it in place");
            }
        }

        Ok(format!(
            "{release} live on {} (build {:.1}s, deploy {:.1}s)",
            ctx.target_key(),
            build_ms as f64 / 1000.0,
            deploy_ms as f64 / 1000.0
        ))
    }
}
