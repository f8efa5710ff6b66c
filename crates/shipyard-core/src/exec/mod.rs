//! Local process execution with per-call timeouts.
//!
//! Everything that leaves the orchestrator process as a child process goes
//! through [`LocalShell`]: build commands, `scp` uploads, `openssl` probes and
//! the `ssh` client used by [`crate::remote::SshChannel`].

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::process::Command;
use tracing::debug;

/// Maximum number of bytes of command output included in log lines.
pub const OUTPUT_LOG_LIMIT: usize = 512;

/// Captured result of one finished process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Output used by simulated channels: exit 0, nothing captured.
    pub fn simulated() -> Self {
        Self {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
        }
    }

    /// The most useful text for an error message: stderr, else stdout.
    pub fn diagnostic(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        truncate_output(text.trim(), OUTPUT_LOG_LIMIT)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` timed out after {}s", timeout.as_secs_f64())]
    TimedOut { command: String, timeout: Duration },
}

/// Runs commands on the orchestrator host.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalShell;

impl LocalShell {
    pub fn new() -> Self {
        Self
    }

    /// Run `command` through `sh -c`.
    pub async fn run(
        &self,
        command: &str,
        cwd: Option<&Path>,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        run_captured(cmd, command.to_string(), timeout).await
    }

    /// Run a program with explicit arguments, no shell involved.
    pub async fn run_program(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        let rendered = std::iter::once(program.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        run_captured(cmd, rendered, timeout).await
    }
}

async fn run_captured(
    mut cmd: Command,
    rendered: String,
    timeout: Duration,
) -> Result<CommandOutput, ExecError> {
    debug!(command = %rendered, timeout_s = timeout.as_secs(), "spawning");
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let started = Instant::now();
    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| ExecError::TimedOut {
            command: rendered.clone(),
            timeout,
        })?
        .map_err(|source| ExecError::Spawn {
            command: rendered.clone(),
            source,
        })?;

    let result = CommandOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        duration_ms: started.elapsed().as_millis() as u64,
    };
    debug!(
        command = %rendered,
        exit_code = ?result.exit_code,
        duration_ms = result.duration_ms,
        stdout = %truncate_output(result.stdout.trim(), OUTPUT_LOG_LIMIT),
        "finished"
    );
    Ok(result)
}

/// Locate an executable on `PATH` without spawning anything.
pub fn find_in_path(tool: &str) -> Option<PathBuf> {
    let candidate = Path::new(tool);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(tool))
        .find(|full| is_executable(full))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Quote a value for safe interpolation into a POSIX shell command.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@+,".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Truncate to at most `max_bytes`, respecting UTF-8 boundaries.
pub fn truncate_output(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... ({} bytes truncated)", &text[..end], text.len() - end)
}
