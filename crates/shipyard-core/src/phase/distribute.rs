use std::time::Instant;

use async_trait::async_trait;
use tracing::info;

use super::{Phase, PhaseError, PhaseKind, ensure_not_cancelled};
use crate::context::RunContext;
use crate::orchestrator::DeploymentRun;

/// Phase 4: replace the live path with the artifact and restart the service.
///
/// The only phase that mutates live state. The orchestrator takes the
/// backup before it starts.
#[derive(Debug, Clone, Copy, Default)]
pub struct DistributePhase;

#[async_trait]
impl Phase for DistributePhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Distribute
    }

    async fn run(&self, ctx: &RunContext, run: &mut DeploymentRun) -> Result<String, PhaseError> {
        let artifact = run
            .artifact
            .clone()
            .ok_or_else(|| PhaseError::validation("no build artifact; build did not run"))?;
        let live = ctx.live_path();

        let started = Instant::now();
        ctx.target().push_artifact(&artifact.path, live).await?;
        ensure_not_cancelled(ctx)?;
        ctx.service().restart().await?;
        let duration_ms = started.elapsed().as_millis() as u64;
        run.distribute_ms = Some(duration_ms);

        if ctx.is_dry_run() {
            return Ok(format!(
                "would push {} to {} and restart {}",
                artifact.path.display(),
                ctx.target_key(),
                ctx.service().name()
            ));
        }
        info!(
            artifact = %artifact.path.display(),
            deploy_target = %ctx.target_key(),
            duration_ms,
            "distribution complete"
        );
        Ok(format!(
            "pushed {} to {} and restarted {}",
            artifact.path.display(),
            ctx.target_key(),
            ctx.service().name()
        ))
    }
}
