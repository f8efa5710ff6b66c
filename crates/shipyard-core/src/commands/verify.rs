//! Verify command: run the verification gate against what is live now.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::RunContext;
use crate::health::VerificationReport;
use crate::phase::build_gate;
use crate::release::ReleaseStamp;
use crate::types::ExitCode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyReport {
    pub dry_run: bool,
    /// Release read from the live status document, if any.
    pub release: Option<ReleaseStamp>,
    /// `name: description` of every probe in the gate.
    pub planned: Vec<String>,
    /// `None` in dry-run.
    pub report: Option<VerificationReport>,
    pub exit_code: i32,
}

impl VerifyReport {
    pub fn is_healthy(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug)]
pub struct VerifyCommand {
    ctx: RunContext,
}

impl VerifyCommand {
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx }
    }

    pub async fn execute(&self) -> anyhow::Result<VerifyReport> {
        let release = self.ctx.live_stamp().await;
        let gate = build_gate(&self.ctx, release.as_ref());
        anyhow::ensure!(
            !gate.is_empty(),
            "no health probes are configured in [verify]; nothing to check"
        );
        let planned = gate
            .probes()
            .iter()
            .map(|p| format!("{}: {}", p.name(), p.describe()))
            .collect();

        if self.ctx.is_dry_run() {
            info!(probes = gate.probes().len(), "[dry-run] would run the verification gate");
            return Ok(VerifyReport {
                dry_run: true,
                release,
                planned,
                report: None,
                exit_code: ExitCode::Success.code(),
            });
        }

        let report = gate.run().await;
        let exit = if report.is_healthy() {
            ExitCode::Success
        } else {
            ExitCode::Verification
        };
        info!(healthy = report.is_healthy(), failures = report.failures().count(), "verification finished");
        Ok(VerifyReport {
            dry_run: false,
            release,
            planned,
            report: Some(report),
            exit_code: exit.code(),
        })
    }
}
