use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{HealthCheckResult, HealthProbe};
use crate::retry::{Operation, RetryExecutor, RetryPolicy};
use crate::target::DeployTarget;

/// Runs a status command on the target and expects a given state word.
#[derive(Debug, Clone)]
pub struct ServiceStateProbe {
    name: String,
    command: String,
    expected_state: String,
    timeout: Duration,
    target: Arc<dyn DeployTarget>,
    executor: RetryExecutor,
}

impl ServiceStateProbe {
    pub const DEFAULT_STATE: &'static str = "running";

    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        expected_state: Option<String>,
        timeout: Duration,
        target: Arc<dyn DeployTarget>,
        executor: RetryExecutor,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            expected_state: expected_state.unwrap_or_else(|| Self::DEFAULT_STATE.to_string()),
            timeout,
            target,
            executor,
        }
    }
}

#[async_trait]
impl HealthProbe for ServiceStateProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn describe(&self) -> String {
        format!(
            "`{}` on {} reports {}",
            self.command,
            self.target.describe(),
            self.expected_state
        )
    }

    async fn check(&self) -> HealthCheckResult {
        let op = Operation::new(
            format!("probe {}", self.name),
            self.target.command_spec(&self.command),
            RetryPolicy::single(self.timeout),
        );
        match self.executor.execute(&op).await {
            Ok(done) => {
                let state = done.value.stdout.trim();
                if state == self.expected_state {
                    HealthCheckResult::pass(&self.name, format!("state {state}"))
                } else {
                    HealthCheckResult::fail(
                        &self.name,
                        format!("state {state:?} (expected {:?})", self.expected_state),
                    )
                }
            }
            Err(err) => HealthCheckResult::fail(&self.name, err.last_error.to_string()),
        }
    }
}
