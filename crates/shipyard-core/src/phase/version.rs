use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use super::{Phase, PhaseError, PhaseKind};
use crate::context::RunContext;
use crate::orchestrator::DeploymentRun;
use crate::release::prepare_release;

/// Phase 2: resolve the release identity and stamp it into the source tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionPreparePhase;

#[async_trait]
impl Phase for VersionPreparePhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::VersionPrepare
    }

    async fn run(&self, ctx: &RunContext, run: &mut DeploymentRun) -> Result<String, PhaseError> {
        let config = ctx.config();
        let prepared = prepare_release(&config.release_inputs(), Utc::now())
            .map_err(|err| PhaseError::validation(format!("{err:#}")))?;
        let stamp = prepared.stamp;
        let stamp_path = config.source.stamp_path.clone();

        if ctx.is_dry_run() {
            if let Some((file, _)) = &prepared.file_update {
                info!(file = %file.path().display(), version = %stamp.full_version(), "[dry-run] would bump version file");
            }
            info!(path = %stamp_path.display(), "[dry-run] would write release stamp");
        } else {
            if let Some((file, version)) = &prepared.file_update {
                file.write(version, stamp.build_number)?;
                info!(file = %file.path().display(), version = %stamp.full_version(), "bumped version file");
            }
            let json = stamp.to_json()?;
            if let Some(parent) = stamp_path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
            tokio::fs::write(&stamp_path, json)
                .await
                .with_context(|| format!("Failed to write release stamp: {}", stamp_path.display()))?;
        }

        let summary = format!("release {}", stamp);
        info!(version = %stamp.version, build = stamp.build_number, commit = ?stamp.git_commit, "release prepared");
        run.release = Some(stamp);
        Ok(summary)
    }
}
