use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use super::{DeployTarget, SnapshotInfo, TargetError};
use crate::exec::shell_quote;
use crate::remote::RemoteHost;
use crate::retry::{Operation, OperationSpec, RetryExecutor, RetryPolicy};

const PRESENT: &str = "present";
const ABSENT: &str = "absent";

/// Live state in a directory on an ssh-reachable host.
///
/// Every operation is a shell command run through the [`RetryExecutor`], so
/// transient connection failures are retried under the run's policy.
#[derive(Debug, Clone)]
pub struct RemoteTarget {
    host: RemoteHost,
    executor: RetryExecutor,
    policy: RetryPolicy,
    connect_timeout: Duration,
}

impl RemoteTarget {
    pub fn new(host: RemoteHost, executor: RetryExecutor, policy: RetryPolicy, connect_timeout: Duration) -> Self {
        Self {
            host,
            executor,
            policy,
            connect_timeout,
        }
    }

    pub fn host(&self) -> &RemoteHost {
        &self.host
    }

    async fn run(&self, label: &str, command: String) -> Result<String, TargetError> {
        let op = Operation::remote(label, self.host.clone(), command, self.policy.clone());
        let done = self.executor.execute(&op).await?;
        Ok(done.value.stdout)
    }

    fn upload_command(&self, artifact: &Path, incoming: &Path) -> String {
        scp_command(&self.host, artifact, incoming, self.connect_timeout)
    }
}

/// `scp` invocation that uploads `src` (recursively) to `dest` on `host`.
pub fn scp_command(host: &RemoteHost, src: &Path, dest: &Path, connect_timeout: Duration) -> String {
    let mut parts = vec![
        "scp".to_string(),
        "-B".to_string(),
        "-r".to_string(),
        "-q".to_string(),
        "-o".to_string(),
        format!("ConnectTimeout={}", connect_timeout.as_secs().max(1)),
    ];
    if let Some(port) = host.port {
        parts.push("-P".to_string());
        parts.push(port.to_string());
    }
    if let Some(identity) = &host.identity_file {
        parts.push("-i".to_string());
        parts.push(shell_quote(&identity.to_string_lossy()));
    }
    parts.push(shell_quote(&src.to_string_lossy()));
    parts.push(shell_quote(&format!(
        "{}:{}",
        host.destination(),
        dest.to_string_lossy()
    )));
    parts.join(" ")
}

fn q(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}

fn with_suffix(path: &Path, suffix: &str) -> std::path::PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(suffix);
    raw.into()
}

fn parent_mkdir(path: &Path) -> String {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => format!("mkdir -p {} && ", q(parent)),
        _ => String::new(),
    }
}

/// Split the marker line emitted by the presence-checking scripts.
fn split_marker(stdout: &str) -> (bool, &str) {
    let (first, rest) = stdout.split_once('\n').unwrap_or((stdout, ""));
    (first.trim() == PRESENT, rest)
}

#[async_trait]
impl DeployTarget for RemoteTarget {
    fn describe(&self) -> String {
        self.host.to_string()
    }

    fn command_spec(&self, command: &str) -> OperationSpec {
        OperationSpec::Remote {
            host: self.host.clone(),
            command: command.to_string(),
        }
    }

    async fn exists(&self, path: &Path) -> Result<bool, TargetError> {
        let out = self
            .run(
                "stat",
                format!("if [ -e {p} ]; then echo {PRESENT}; else echo {ABSENT}; fi", p = q(path)),
            )
            .await?;
        Ok(split_marker(&out).0)
    }

    async fn push_artifact(&self, artifact: &Path, live: &Path) -> Result<(), TargetError> {
        let incoming = with_suffix(live, ".incoming");
        self.run(
            "prepare upload",
            format!("{}rm -rf {}", parent_mkdir(live), q(&incoming)),
        )
        .await?;

        let upload = Operation::new(
            "upload artifact",
            OperationSpec::Shell {
                command: self.upload_command(artifact, &incoming),
                cwd: None,
            },
            self.policy.clone(),
        );
        self.executor.execute(&upload).await?;

        self.run(
            "swap live directory",
            format!(
                "rm -rf {live} && mv {incoming} {live}",
                live = q(live),
                incoming = q(&incoming)
            ),
        )
        .await?;
        Ok(())
    }

    async fn snapshot(&self, live: &Path, dest: &Path) -> Result<SnapshotInfo, TargetError> {
        let out = self
            .run(
                "snapshot",
                format!(
                    "if [ -e {live} ]; then {mk}rm -rf {dest} && cp -a {live} {dest} && echo {PRESENT}; \
                     else echo {ABSENT}; fi",
                    live = q(live),
                    dest = q(dest),
                    mk = parent_mkdir(dest),
                ),
            )
            .await?;
        Ok(SnapshotInfo {
            source_existed: split_marker(&out).0,
            tree_hash: None,
        })
    }

    async fn restore_snapshot(&self, snapshot: &Path, live: &Path) -> Result<(), TargetError> {
        let staged = with_suffix(live, ".restore");
        self.run(
            "restore",
            format!(
                "{mk}rm -rf {staged} && cp -a {snap} {staged} && rm -rf {live} && mv {staged} {live}",
                mk = parent_mkdir(live),
                staged = q(&staged),
                snap = q(snapshot),
                live = q(live),
            ),
        )
        .await?;
        Ok(())
    }

    async fn write_file(&self, path: &Path, contents: &str) -> Result<(), TargetError> {
        self.run(
            "write file",
            format!(
                "{}printf '%s' {} > {}",
                parent_mkdir(path),
                shell_quote(contents),
                q(path)
            ),
        )
        .await?;
        Ok(())
    }

    async fn read_to_string(&self, path: &Path) -> Result<Option<String>, TargetError> {
        let out = self
            .run(
                "read file",
                format!(
                    "if [ -f {p} ]; then echo {PRESENT}; cat {p}; else echo {ABSENT}; fi",
                    p = q(path)
                ),
            )
            .await?;
        let (present, body) = split_marker(&out);
        Ok(present.then(|| body.to_string()))
    }

    async fn list_dirs(&self, dir: &Path) -> Result<Vec<String>, TargetError> {
        let out = self
            .run(
                "list directory",
                format!(
                    "if [ -d {d} ]; then cd {d} && for e in */; do [ -d \"$e\" ] && echo \"${{e%/}}\"; done; fi; true",
                    d = q(dir)
                ),
            )
            .await?;
        let mut names: Vec<String> = out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }

    async fn remove_dir(&self, path: &Path) -> Result<(), TargetError> {
        self.run("remove", format!("rm -rf {}", q(path))).await?;
        Ok(())
    }
}
