use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Phase, PhaseError, PhaseKind, ensure_not_cancelled};
use crate::context::RunContext;
use crate::fs::summarize_tree;
use crate::orchestrator::DeploymentRun;
use crate::release::STATUS_DOCUMENT;
use crate::retry::{Operation, RetryPolicy};

/// What the build produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
    pub path: PathBuf,
    pub tree_hash: Option<String>,
    pub files: u64,
    pub bytes: u64,
    pub duration_ms: u64,
    pub simulated: bool,
}

/// Phase 3: run the build command and check its output. Builds get a
/// single attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildPhase;

#[async_trait]
impl Phase for BuildPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Build
    }

    async fn run(&self, ctx: &RunContext, run: &mut DeploymentRun) -> Result<String, PhaseError> {
        let config = ctx.config();
        let artifact_dir = config.build.artifact_dir.clone();
        let stamp = run
            .release
            .clone()
            .ok_or_else(|| PhaseError::validation("no release stamp; version preparation did not run"))?;

        let op = Operation::shell(
            "build",
            config.build.command.clone(),
            RetryPolicy::single(config.build_timeout()),
        )
        .in_dir(config.source.path.clone());

        if ctx.is_dry_run() {
            ctx.executor().execute(&op).await?;
            run.artifact = Some(BuildArtifact {
                path: artifact_dir.clone(),
                tree_hash: None,
                files: 0,
                bytes: 0,
                duration_ms: 0,
                simulated: true,
            });
            return Ok(format!(
                "would run `{}` and package {}",
                config.build.command,
                artifact_dir.display()
            ));
        }

        let started = Instant::now();
        ctx.executor().execute(&op).await?;
        ensure_not_cancelled(ctx)?;

        let is_empty_dir = match std::fs::read_dir(&artifact_dir) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) if artifact_dir.is_file() => false,
            Err(_) => {
                return Err(PhaseError::validation(format!(
                    "build did not produce {}",
                    artifact_dir.display()
                )));
            }
        };
        if is_empty_dir {
            return Err(PhaseError::validation(format!(
                "build output {} is empty",
                artifact_dir.display()
            )));
        }

        if artifact_dir.is_dir() {
            let doc = artifact_dir.join(STATUS_DOCUMENT);
            tokio::fs::write(&doc, stamp.to_json()?)
                .await
                .with_context(|| format!("Failed to write status document: {}", doc.display()))?;
        }

        let hash_dir = artifact_dir.clone();
        let summary = tokio::task::spawn_blocking(move || summarize_tree(&hash_dir))
            .await
            .context("Artifact hashing task failed")??;
        let duration_ms = started.elapsed().as_millis() as u64;

        info!(
            artifact = %artifact_dir.display(),
            files = summary.files,
            bytes = summary.bytes,
            hash = %summary.hash,
            duration_ms,
            "build complete"
        );
        let line = format!(
            "built {} ({} files, {} bytes) in {:.1}s",
            artifact_dir.display(),
            summary.files,
            summary.bytes,
            duration_ms as f64 / 1000.0
        );
        run.artifact = Some(BuildArtifact {
            path: artifact_dir,
            tree_hash: Some(summary.hash),
            files: summary.files,
            bytes: summary.bytes,
            duration_ms,
            simulated: false,
        });
        Ok(line)
    }
}
