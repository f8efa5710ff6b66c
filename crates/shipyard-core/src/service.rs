//! Stop/start/status of the deployed service on its target.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::retry::{Exhausted, Operation, OperationOutput, RetryExecutor, RetryPolicy};
use crate::target::DeployTarget;

/// Commands that manage the running service. Any of them may be absent, in
/// which case that step is skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCommands {
    #[serde(default)]
    pub stop: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServiceControl {
    name: String,
    target: Arc<dyn DeployTarget>,
    executor: RetryExecutor,
    commands: ServiceCommands,
    policy: RetryPolicy,
}

impl ServiceControl {
    pub fn new(
        name: impl Into<String>,
        target: Arc<dyn DeployTarget>,
        executor: RetryExecutor,
        commands: ServiceCommands,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            target,
            executor,
            commands,
            policy,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn commands(&self) -> &ServiceCommands {
        &self.commands
    }

    async fn run(&self, verb: &str, command: Option<&str>) -> Result<Option<OperationOutput>, Exhausted> {
        let Some(command) = command else {
            debug!(service = %self.name, verb, "no command configured; skipping");
            return Ok(None);
        };
        let op = Operation::new(
            format!("{verb} {}", self.name),
            self.target.command_spec(command),
            self.policy.clone(),
        );
        info!(service = %self.name, deploy_target = %self.target.describe(), "{verb}");
        let done = self.executor.execute(&op).await?;
        Ok(Some(done.value))
    }

    pub async fn stop(&self) -> Result<(), Exhausted> {
        self.run("stop", self.commands.stop.as_deref()).await.map(|_| ())
    }

    pub async fn start(&self) -> Result<(), Exhausted> {
        self.run("start", self.commands.start.as_deref()).await.map(|_| ())
    }

    pub async fn restart(&self) -> Result<(), Exhausted> {
        self.stop().await?;
        self.start().await
    }

    /// Trimmed stdout of the status command, `None` if none is configured.
    pub async fn status(&self) -> Result<Option<String>, Exhausted> {
        let output = self.run("status", self.commands.status.as_deref()).await?;
        Ok(output.map(|out| out.stdout.trim().to_string()))
    }
}
