//! Remote execution through the system `ssh` client.

use std::time::Duration;

use async_trait::async_trait;

use super::{ConnError, RemoteChannel, RemoteHost};
use crate::exec::{CommandOutput, ExecError, LocalShell, OUTPUT_LOG_LIMIT, truncate_output};

/// Exit status ssh uses for its own failures (as opposed to the remote
/// command's).
const SSH_TRANSPORT_FAILURE: i32 = 255;

const AUTH_MARKERS: [&str; 4] = [
    "Permission denied",
    "Host key verification failed",
    "password",
    "passphrase",
];

/// Non-interactive ssh: no TTY, no password prompt.
#[derive(Debug, Clone)]
pub struct SshChannel {
    connect_timeout: Duration,
    shell: LocalShell,
}

impl SshChannel {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            shell: LocalShell::new(),
        }
    }
}

impl Default for SshChannel {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

/// Build the ssh argument list for one command.
pub fn ssh_args(host: &RemoteHost, command: &str, connect_timeout: Duration) -> Vec<String> {
    let mut args = vec![
        "-T".to_string(),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        format!("ConnectTimeout={}", connect_timeout.as_secs().max(1)),
    ];
    if let Some(port) = host.port {
        args.push("-p".to_string());
        args.push(port.to_string());
    }
    if let Some(identity) = &host.identity_file {
        args.push("-i".to_string());
        args.push(identity.to_string_lossy().into_owned());
    }
    args.push(host.destination());
    args.push(command.to_string());
    args
}

fn classify(host: &RemoteHost, output: CommandOutput) -> Result<CommandOutput, ConnError> {
    if output.exit_code != Some(SSH_TRANSPORT_FAILURE) {
        return Ok(output);
    }
    let detail = truncate_output(output.stderr.trim(), OUTPUT_LOG_LIMIT);
    if AUTH_MARKERS.iter().any(|marker| output.stderr.contains(marker)) {
        return Err(ConnError::AuthRequired {
            host: host.to_string(),
            detail,
        });
    }
    Err(ConnError::Connect {
        host: host.to_string(),
        detail,
    })
}

#[async_trait]
impl RemoteChannel for SshChannel {
    async fn run(
        &self,
        host: &RemoteHost,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ConnError> {
        let args = ssh_args(host, command, self.connect_timeout);
        match self.shell.run_program("ssh", &args, timeout).await {
            Ok(output) => classify(host, output),
            Err(ExecError::TimedOut { .. }) => Err(ConnError::TimedOut {
                host: host.to_string(),
                timeout,
            }),
            Err(ExecError::Spawn { source, .. }) => Err(ConnError::Client(source)),
        }
    }
}
