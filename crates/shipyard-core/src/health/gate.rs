use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::{HealthCheckResult, HealthProbe};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Overall {
    Healthy,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub results: Vec<HealthCheckResult>,
    pub overall: Overall,
    pub checked_at: DateTime<Utc>,
}

impl VerificationReport {
    /// `overall` is HEALTHY iff every result passed.
    pub fn from_results(results: Vec<HealthCheckResult>) -> Self {
        let healthy = results.iter().all(|r| r.passed);
        Self {
            results,
            overall: if healthy { Overall::Healthy } else { Overall::Failed },
            checked_at: Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.overall == Overall::Healthy
    }

    pub fn failures(&self) -> impl Iterator<Item = &HealthCheckResult> {
        self.results.iter().filter(|r| !r.passed)
    }
}

/// Runs every probe concurrently and waits for all of them.
///
/// There is no short-circuit: a failing probe does not stop the others, so
/// the report is complete. Results come back in registration order.
#[derive(Debug, Clone)]
pub struct VerificationGate {
    probes: Vec<Arc<dyn HealthProbe>>,
    probe_timeout: Duration,
}

impl VerificationGate {
    pub fn new(probe_timeout: Duration) -> Self {
        Self {
            probes: Vec::new(),
            probe_timeout,
        }
    }

    pub fn with_probes(probes: Vec<Arc<dyn HealthProbe>>, probe_timeout: Duration) -> Self {
        Self {
            probes,
            probe_timeout,
        }
    }

    pub fn add(&mut self, probe: Arc<dyn HealthProbe>) {
        self.probes.push(probe);
    }

    pub fn probes(&self) -> &[Arc<dyn HealthProbe>] {
        &self.probes
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    pub async fn run(&self) -> VerificationReport {
        let mut tasks = JoinSet::new();
        for (index, probe) in self.probes.iter().enumerate() {
            let probe = Arc::clone(probe);
            let timeout = self.probe_timeout;
            tasks.spawn(async move {
                let result = match tokio::time::timeout(timeout, probe.check()).await {
                    Ok(result) => result,
                    Err(_) => HealthCheckResult::fail(
                        probe.name(),
                        format!("probe timed out after {}s", timeout.as_secs_f64()),
                    ),
                };
                (index, result)
            });
        }

        let mut slots: Vec<Option<HealthCheckResult>> = vec![None; self.probes.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => {
                    debug!(
                        probe = %result.probe_name,
                        severity = %result.severity,
                        detail = %result.detail,
                        "probe finished"
                    );
                    slots[index] = Some(result);
                }
                Err(err) => warn!(error = %err, "probe task did not complete"),
            }
        }

        let results = slots
            .into_iter()
            .zip(&self.probes)
            .map(|(slot, probe)| {
                slot.unwrap_or_else(|| HealthCheckResult::fail(probe.name(), "probe task did not complete"))
            })
            .collect();
        VerificationReport::from_results(results)
    }
}
