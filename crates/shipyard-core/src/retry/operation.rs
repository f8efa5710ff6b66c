//! Operation variants and the executor that runs them under a retry policy.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tracing::info;

use super::{AttemptError, Completed, Exhausted, RetryPolicy, retry};
use crate::cancel::CancelToken;
use crate::exec::{CommandOutput, ExecError, LocalShell, OUTPUT_LOG_LIMIT, truncate_output};
use crate::remote::{ConnError, DryRunChannel, RemoteChannel, RemoteHost};

pub(crate) const USER_AGENT: &str = concat!("shipyard/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
        }
    }
}

/// What one attempt of an operation does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationSpec {
    Shell {
        command: String,
        cwd: Option<PathBuf>,
    },
    Remote {
        host: RemoteHost,
        command: String,
    },
    /// Succeeds only on exactly `expected_status`; redirects are not followed.
    Http {
        method: HttpMethod,
        url: String,
        expected_status: u16,
    },
}

impl fmt::Display for OperationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationSpec::Shell { command, .. } => write!(f, "local `{command}`"),
            OperationSpec::Remote { host, command } => write!(f, "`{command}` on {host}"),
            OperationSpec::Http {
                method,
                url,
                expected_status,
            } => write!(f, "{method:?} {url} (expect {expected_status})"),
        }
    }
}

/// A retryable unit of work. Owned by the call site that builds it.
#[derive(Debug, Clone)]
pub struct Operation {
    pub label: String,
    pub spec: OperationSpec,
    pub policy: RetryPolicy,
}

impl Operation {
    pub fn new(label: impl Into<String>, spec: OperationSpec, policy: RetryPolicy) -> Self {
        Self {
            label: label.into(),
            spec,
            policy,
        }
    }

    pub fn shell(label: impl Into<String>, command: impl Into<String>, policy: RetryPolicy) -> Self {
        Self::new(
            label,
            OperationSpec::Shell {
                command: command.into(),
                cwd: None,
            },
            policy,
        )
    }

    pub fn remote(
        label: impl Into<String>,
        host: RemoteHost,
        command: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self::new(
            label,
            OperationSpec::Remote {
                host,
                command: command.into(),
            },
            policy,
        )
    }

    pub fn http_get(
        label: impl Into<String>,
        url: impl Into<String>,
        expected_status: u16,
        policy: RetryPolicy,
    ) -> Self {
        Self::new(
            label,
            OperationSpec::Http {
                method: HttpMethod::Get,
                url: url.into(),
                expected_status,
            },
            policy,
        )
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        if let OperationSpec::Shell { cwd, .. } = &mut self.spec {
            *cwd = Some(dir.into());
        }
        self
    }
}

/// Result of a successful attempt. For HTTP, `status` is the response code
/// and `stdout` the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
    pub simulated: bool,
}

impl OperationOutput {
    fn simulated() -> Self {
        Self {
            status: 0,
            stdout: String::new(),
            stderr: String::new(),
            simulated: true,
        }
    }
}

impl From<CommandOutput> for OperationOutput {
    fn from(output: CommandOutput) -> Self {
        Self {
            status: output.exit_code.unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
            simulated: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecMode {
    Live,
    Simulated,
}

/// Runs [`Operation`]s with bounded retries.
///
/// Built once per run: live, or simulated for dry-runs. A simulated executor
/// logs the planned operation and returns a synthetic success without
/// touching any external system.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    mode: ExecMode,
    shell: LocalShell,
    channel: Arc<dyn RemoteChannel>,
    http: reqwest::Client,
    cancel: CancelToken,
}

impl RetryExecutor {
    pub fn new(channel: Arc<dyn RemoteChannel>, cancel: CancelToken) -> anyhow::Result<Self> {
        Ok(Self {
            mode: ExecMode::Live,
            shell: LocalShell::new(),
            channel,
            http: http_client()?,
            cancel,
        })
    }

    pub fn simulated(cancel: CancelToken) -> anyhow::Result<Self> {
        Ok(Self {
            mode: ExecMode::Simulated,
            shell: LocalShell::new(),
            channel: Arc::new(DryRunChannel),
            http: http_client()?,
            cancel,
        })
    }

    pub fn is_simulated(&self) -> bool {
        self.mode == ExecMode::Simulated
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// HTTP client shared with probes: no redirect following.
    pub fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    /// Generic retry loop bound to this executor's cancellation token.
    pub async fn retry<T, F, Fut>(
        &self,
        label: &str,
        policy: &RetryPolicy,
        attempt_fn: F,
    ) -> Result<Completed<T>, Exhausted>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T, AttemptError>>,
    {
        retry(label, policy, &self.cancel, attempt_fn).await
    }

    pub async fn execute(&self, op: &Operation) -> Result<Completed<OperationOutput>, Exhausted> {
        if self.is_simulated() {
            info!(label = %op.label, "[dry-run] would run {}", op.spec);
            return Ok(Completed {
                value: OperationOutput::simulated(),
                attempts: Vec::new(),
            });
        }

        let timeout = op.policy.attempt_timeout;
        let spec = &op.spec;
        self.retry(&op.label, &op.policy, move |_attempt| {
            self.execute_once(spec, timeout)
        })
        .await
    }

    async fn execute_once(
        &self,
        spec: &OperationSpec,
        timeout: Duration,
    ) -> Result<OperationOutput, AttemptError> {
        match spec {
            OperationSpec::Shell { command, cwd } => {
                match self.shell.run(command, cwd.as_deref(), timeout).await {
                    Ok(output) if output.success() => Ok(output.into()),
                    Ok(output) => Err(exit_failure(&output)),
                    Err(ExecError::TimedOut { .. }) => Err(AttemptError::TimedOut(timeout)),
                    Err(err @ ExecError::Spawn { .. }) => Err(AttemptError::Fatal(err.to_string())),
                }
            }
            OperationSpec::Remote { host, command } => {
                match self.channel.run(host, command, timeout).await {
                    Ok(output) if output.success() => Ok(output.into()),
                    Ok(output) => Err(exit_failure(&output)),
                    Err(ConnError::TimedOut { .. }) => Err(AttemptError::TimedOut(timeout)),
                    Err(err) if err.is_auth() => Err(AttemptError::Fatal(err.to_string())),
                    Err(err) => Err(AttemptError::Failed(err.to_string())),
                }
            }
            OperationSpec::Http {
                method,
                url,
                expected_status,
            } => {
                let response = self
                    .http
                    .request((*method).into(), url)
                    .timeout(timeout)
                    .send()
                    .await
                    .map_err(|err| {
                        if err.is_timeout() {
                            AttemptError::TimedOut(timeout)
                        } else {
                            AttemptError::Failed(format!("request to {url} failed: {err}"))
                        }
                    })?;
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                if status != *expected_status {
                    return Err(AttemptError::Failed(format!(
                        "expected HTTP {expected_status} from {url}, got {status}"
                    )));
                }
                Ok(OperationOutput {
                    status: i32::from(status),
                    stdout: body,
                    stderr: String::new(),
                    simulated: false,
                })
            }
        }
    }
}

fn exit_failure(output: &CommandOutput) -> AttemptError {
    let code = output
        .exit_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string());
    AttemptError::Failed(format!(
        "exited with {code}: {}",
        truncate_output(&output.diagnostic(), OUTPUT_LOG_LIMIT)
    ))
}

/// Client used for every HTTP request the orchestrator makes.
pub(crate) fn http_client() -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .context("Failed to build HTTP client")
}
