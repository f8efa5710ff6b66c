use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{Phase, PhaseError, PhaseKind};
use crate::context::RunContext;
use crate::health::{
    HealthProbe, HttpStatusProbe, JsonFieldProbe, ServiceStateProbe, StatusDocumentProbe, TlsExpiryProbe,
    VerificationGate,
};
use crate::orchestrator::DeploymentRun;
use crate::release::ReleaseStamp;

/// Assemble the verification gate from `[verify]`.
///
/// With a release stamp, the status document must report exactly that
/// version and build. Without one (standalone `verify` against a live path
/// that has no stamp) the status URL is only checked for a 200.
pub fn build_gate(ctx: &RunContext, stamp: Option<&ReleaseStamp>) -> VerificationGate {
    let config = ctx.config();
    let verify = &config.verify;
    let timeout = config.probe_timeout();
    let client = ctx.executor().http_client().clone();
    let mut gate = VerificationGate::new(timeout);

    if let Some(url) = &verify.status_url {
        let probe: Arc<dyn HealthProbe> = match stamp {
            Some(stamp) => Arc::new(StatusDocumentProbe::new(
                url.clone(),
                stamp.version.clone(),
                stamp.build_number,
                timeout,
                client.clone(),
            )),
            None => Arc::new(HttpStatusProbe::new(
                StatusDocumentProbe::NAME,
                url.clone(),
                200,
                timeout,
                client.clone(),
            )),
        };
        gate.add(probe);
    }

    for http in &verify.http {
        gate.add(Arc::new(HttpStatusProbe::new(
            http.name.clone(),
            http.url.clone(),
            http.expected_status,
            timeout,
            client.clone(),
        )));
    }

    for json in &verify.json {
        gate.add(Arc::new(JsonFieldProbe::new(
            json.name.clone(),
            json.url.clone(),
            json.pointer.clone(),
            json.expected.clone(),
            timeout,
            client.clone(),
        )));
    }

    for service in &verify.service {
        let command = service
            .command
            .clone()
            .or_else(|| config.service_control.status.clone())
            .unwrap_or_default();
        gate.add(Arc::new(ServiceStateProbe::new(
            service.name.clone(),
            command,
            service.expected_state.clone(),
            timeout,
            ctx.target().clone(),
            ctx.executor().clone(),
        )));
    }

    for tls in &verify.tls {
        gate.add(Arc::new(TlsExpiryProbe::new(
            tls.name.clone(),
            tls.host.clone(),
            tls.port,
            tls.min_days.unwrap_or(verify.min_tls_days),
            timeout,
            ctx.cert_source().clone(),
        )));
    }

    gate
}

/// Phase 5: run every configured probe against the deployed release.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyPhase;

#[async_trait]
impl Phase for VerifyPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Verify
    }

    async fn run(&self, ctx: &RunContext, run: &mut DeploymentRun) -> Result<String, PhaseError> {
        let gate = build_gate(ctx, run.release.as_ref());

        if ctx.is_dry_run() {
            for probe in gate.probes() {
                info!(probe = probe.name(), "[dry-run] would check {}", probe.describe());
            }
            return Ok(format!("would run {} probe(s)", gate.probes().len()));
        }

        let report = gate.run().await;
        for result in &report.results {
            if result.passed {
                info!(probe = %result.probe_name, "{}", result.detail);
            } else {
                warn!(probe = %result.probe_name, "{}", result.detail);
            }
        }
        let total = report.results.len();
        let healthy = report.is_healthy();
        run.verification = Some(report.clone());

        if !healthy {
            return Err(PhaseError::Verification(Box::new(report)));
        }
        Ok(format!("{total} of {total} probe(s) passed"))
    }
}
