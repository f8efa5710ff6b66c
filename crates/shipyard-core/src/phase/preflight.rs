use async_trait::async_trait;
use tracing::{debug, info};

use super::{Phase, PhaseError, PhaseKind, ensure_not_cancelled};
use crate::context::RunContext;
use crate::exec::find_in_path;
use crate::git;
use crate::orchestrator::DeploymentRun;
use crate::retry::Operation;

/// Tools every remote deployment needs, on top of the configured ones.
const REMOTE_TOOLS: [&str; 2] = ["ssh", "scp"];

/// Phase 1: environment, tooling and connectivity preconditions.
///
/// Nothing is mutated, so a failure here never needs a rollback.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreflightPhase;

#[async_trait]
impl Phase for PreflightPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Preflight
    }

    async fn run(&self, ctx: &RunContext, _run: &mut DeploymentRun) -> Result<String, PhaseError> {
        let config = ctx.config();
        let mut checks = 0usize;

        let mut tools: Vec<&str> = config.preflight.required_tools.iter().map(String::as_str).collect();
        if config.is_remote() {
            for tool in REMOTE_TOOLS {
                if !tools.contains(&tool) {
                    tools.push(tool);
                }
            }
        }
        for tool in tools {
            match find_in_path(tool) {
                Some(path) => debug!(tool, path = %path.display(), "found required tool"),
                None => {
                    return Err(PhaseError::validation(format!(
                        "required tool `{tool}` was not found on PATH"
                    )));
                }
            }
            checks += 1;
        }

        for path in &config.preflight.required_paths {
            if !path.exists() {
                return Err(PhaseError::validation(format!(
                    "required path {} does not exist",
                    path.display()
                )));
            }
            checks += 1;
        }

        if !config.source.path.is_dir() {
            return Err(PhaseError::validation(format!(
                "source directory {} does not exist",
                config.source.path.display()
            )));
        }
        if !config.live_path().is_absolute() {
            return Err(PhaseError::validation(format!(
                "live path {} must be absolute",
                config.live_path().display()
            )));
        }
        if config.probe_count() == 0 {
            return Err(PhaseError::validation(
                "no health probes are configured; refusing to deploy without verification",
            ));
        }
        checks += 3;

        if config.preflight.require_clean_tree {
            if ctx.flags().force {
                info!("--force given; skipping clean working tree check");
            } else if let Some(dirty) = git::dirty_paths(&config.source.path)?
                && !dirty.is_empty()
            {
                let shown: Vec<_> = dirty.iter().take(5).map(String::as_str).collect();
                let more = dirty.len().saturating_sub(shown.len());
                let suffix = if more > 0 { format!(" and {more} more") } else { String::new() };
                return Err(PhaseError::validation(format!(
                    "working tree has uncommitted changes: {}{suffix} (use --force to override)",
                    shown.join(", ")
                )));
            }
            checks += 1;
        }

        ensure_not_cancelled(ctx)?;
        if config.preflight.check_connectivity
            && let Some(host) = config.remote_host()
        {
            let op = Operation::remote("connectivity check", host.clone(), "true", config.retry_policy());
            ctx.executor().execute(&op).await?;
            info!(%host, "target is reachable");
            checks += 1;
        }

        Ok(format!("{checks} check(s) passed against {}", ctx.target_key()))
    }
}
