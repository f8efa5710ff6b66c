//! Single remote-command execution.
//!
//! A [`RemoteChannel`] performs exactly one connection attempt per call.
//! Retry policy lives entirely in [`crate::retry::RetryExecutor`].

mod ssh;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::exec::CommandOutput;

pub use ssh::{SshChannel, ssh_args};

/// Where a remote command runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteHost {
    pub host: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
}

impl RemoteHost {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
            identity_file: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// `user@host` or plain `host`, as ssh/scp expect it.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }
}

impl fmt::Display for RemoteHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.destination())?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnError {
    /// Non-interactive authentication was refused; retrying cannot help.
    #[error("authentication to {host} requires interaction: {detail}")]
    AuthRequired { host: String, detail: String },
    #[error("could not connect to {host}: {detail}")]
    Connect { host: String, detail: String },
    #[error("remote command on {host} timed out after {}s", timeout.as_secs_f64())]
    TimedOut { host: String, timeout: Duration },
    #[error("failed to launch the ssh client: {0}")]
    Client(#[source] std::io::Error),
}

impl ConnError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ConnError::AuthRequired { .. })
    }
}

#[async_trait]
pub trait RemoteChannel: Send + Sync + fmt::Debug {
    /// Run `command` on `host` once. A non-zero remote exit status is an
    /// `Ok` result; only transport-level problems are errors.
    async fn run(
        &self,
        host: &RemoteHost,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ConnError>;
}

/// Channel used in dry-run mode: logs and never connects.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunChannel;

#[async_trait]
impl RemoteChannel for DryRunChannel {
    async fn run(
        &self,
        host: &RemoteHost,
        command: &str,
        _timeout: Duration,
    ) -> Result<CommandOutput, ConnError> {
        info!(%host, command, "[dry-run] would run remote command");
        Ok(CommandOutput::simulated())
    }
}
