//! Fakes and fixtures shared by the integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use shipyard_core::cancel::CancelToken;
use shipyard_core::config::{ShipyardConfig, load_config};
use shipyard_core::context::{Collaborators, RunContext};
use shipyard_core::exec::CommandOutput;
use shipyard_core::health::CertificateSource;
use shipyard_core::remote::{ConnError, RemoteChannel, RemoteHost};
use shipyard_core::retry::OperationSpec;
use shipyard_core::target::{DeployTarget, LocalTarget, SnapshotInfo, TargetError};
use shipyard_core::types::RunFlags;

pub const BUILD_OK: &str = "mkdir -p dist && printf 'new release' > dist/index.html";

/// Source tree with a version file, and a live directory holding the
/// previous release.
pub struct Fixture {
    pub dir: TempDir,
    pub source: PathBuf,
    pub live: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let source = dir.path().join("app");
        let live = dir.path().join("srv").join("live");
        std::fs::create_dir_all(&source).expect("Failed to create source dir");
        std::fs::create_dir_all(&live).expect("Failed to create live dir");
        std::fs::write(source.join("VERSION"), "1.2.3+7\n").expect("Failed to write version file");
        std::fs::write(live.join("index.html"), "old release").expect("Failed to seed live dir");
        Self { dir, source, live }
    }

    pub fn backup_root(&self) -> PathBuf {
        let mut raw = self.live.as_os_str().to_os_string();
        raw.push("-backups");
        PathBuf::from(raw)
    }

    pub fn live_file(&self, name: &str) -> String {
        std::fs::read_to_string(self.live.join(name)).unwrap_or_default()
    }

    /// Write `shipyard.toml` with `build_command` plus `extra` sections and
    /// load it the way the CLI does.
    pub fn config(&self, build_command: &str, extra: &str) -> ShipyardConfig {
        let text = format!(
            r#"
[service]
name = "web"

[source]
path = "app"
version_file = "VERSION"

[build]
command = "{build_command}"
artifact_dir = "dist"
timeout_secs = 30

[target]
live_path = "{live}"

[retry]
max_retries = 2
base_delay_ms = 1
jitter_ms = 0
timeout_secs = 5

[confirm]
delay_secs = 0

[lock]
dir = "locks"

{extra}
"#,
            live = self.live.display(),
        );
        let path = self.dir.path().join("shipyard.toml");
        std::fs::write(&path, text).expect("Failed to write config");
        load_config(&path).expect("Config should load")
    }
}

pub fn context(
    config: ShipyardConfig,
    flags: RunFlags,
    target: Arc<dyn DeployTarget>,
    channel: Arc<dyn RemoteChannel>,
    cert_source: Arc<dyn CertificateSource>,
) -> RunContext {
    RunContext::with_collaborators(
        config,
        flags,
        CancelToken::new(),
        Collaborators {
            channel,
            target: Some(target),
            cert_source,
        },
    )
    .expect("Context should build")
}

pub fn forced() -> RunFlags {
    RunFlags {
        force: true,
        ..RunFlags::default()
    }
}

/// Local target that counts every mutating call and can be told to fail
/// distribution.
#[derive(Debug, Default)]
pub struct CountingTarget {
    inner: LocalTarget,
    pub fail_push: bool,
    pub fail_restore: bool,
    pub pushes: AtomicUsize,
    pub snapshots: AtomicUsize,
    pub restores: AtomicUsize,
    pub writes: AtomicUsize,
    pub removes: AtomicUsize,
}

impl CountingTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_push() -> Self {
        Self {
            fail_push: true,
            ..Self::default()
        }
    }

    pub fn failing_restore() -> Self {
        Self {
            fail_restore: true,
            ..Self::default()
        }
    }

    pub fn restores(&self) -> usize {
        self.restores.load(Ordering::SeqCst)
    }

    pub fn mutations(&self) -> usize {
        [
            &self.pushes,
            &self.snapshots,
            &self.restores,
            &self.writes,
            &self.removes,
        ]
        .iter()
        .map(|c| c.load(Ordering::SeqCst))
        .sum()
    }
}

#[async_trait]
impl DeployTarget for CountingTarget {
    fn describe(&self) -> String {
        "counting".to_string()
    }

    fn command_spec(&self, command: &str) -> OperationSpec {
        self.inner.command_spec(command)
    }

    async fn exists(&self, path: &Path) -> Result<bool, TargetError> {
        self.inner.exists(path).await
    }

    async fn push_artifact(&self, artifact: &Path, live: &Path) -> Result<(), TargetError> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        if self.fail_push {
            return Err(TargetError::Io {
                target: self.describe(),
                action: "push artifact".to_string(),
                detail: "disk full".to_string(),
            });
        }
        self.inner.push_artifact(artifact, live).await
    }

    async fn snapshot(&self, live: &Path, dest: &Path) -> Result<SnapshotInfo, TargetError> {
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        self.inner.snapshot(live, dest).await
    }

    async fn restore_snapshot(&self, snapshot: &Path, live: &Path) -> Result<(), TargetError> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        if self.fail_restore {
            return Err(TargetError::Io {
                target: self.describe(),
                action: "restore".to_string(),
                detail: "permission denied".to_string(),
            });
        }
        self.inner.restore_snapshot(snapshot, live).await
    }

    async fn write_file(&self, path: &Path, contents: &str) -> Result<(), TargetError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write_file(path, contents).await
    }

    async fn read_to_string(&self, path: &Path) -> Result<Option<String>, TargetError> {
        self.inner.read_to_string(path).await
    }

    async fn list_dirs(&self, dir: &Path) -> Result<Vec<String>, TargetError> {
        self.inner.list_dirs(dir).await
    }

    async fn remove_dir(&self, path: &Path) -> Result<(), TargetError> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.inner.remove_dir(path).await
    }

    async fn hash_tree(&self, path: &Path) -> Result<Option<String>, TargetError> {
        self.inner.hash_tree(path).await
    }
}

/// Remote channel that succeeds and counts calls.
#[derive(Debug, Default)]
pub struct CountingChannel {
    pub calls: AtomicUsize,
}

impl CountingChannel {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteChannel for CountingChannel {
    async fn run(
        &self,
        _host: &RemoteHost,
        _command: &str,
        _timeout: Duration,
    ) -> Result<CommandOutput, ConnError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(CommandOutput::simulated())
    }
}

/// Certificate source that reports a fixed expiry.
#[derive(Debug, Clone, Copy)]
pub struct FixedCertSource(pub DateTime<Utc>);

#[async_trait]
impl CertificateSource for FixedCertSource {
    async fn not_after(&self, _host: &str, _port: u16, _timeout: Duration) -> anyhow::Result<DateTime<Utc>> {
        Ok(self.0)
    }
}

pub fn far_future_cert() -> Arc<dyn CertificateSource> {
    Arc::new(FixedCertSource(Utc::now() + chrono::Duration::days(365)))
}

/// Canned HTTP response.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub location: Option<String>,
    pub body: String,
}

impl Reply {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            location: None,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            location: None,
            body: String::new(),
        }
    }

    pub fn redirect(status: u16, location: &str) -> Self {
        Self {
            status,
            location: Some(location.to_string()),
            body: String::new(),
        }
    }
}

/// Minimal HTTP/1.1 responder. `handler` maps the request path to a reply.
pub async fn serve<F>(handler: F) -> SocketAddr
where
    F: Fn(&str) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to read local addr");
    let handler = Arc::new(handler);
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let request = String::from_utf8_lossy(&buf);
                let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                let reply = handler(&path);
                let mut head = format!(
                    "HTTP/1.1 {} Status\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
                    reply.status,
                    reply.body.len()
                );
                if let Some(location) = &reply.location {
                    head.push_str(&format!("Location: {location}\r\n"));
                }
                head.push_str("\r\n");
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(reply.body.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Serve files from `root`, reading them on every request.
pub async fn serve_dir(root: PathBuf) -> SocketAddr {
    serve(move |path| match std::fs::read_to_string(root.join(path.trim_start_matches('/'))) {
        Ok(body) => Reply::ok(body),
        Err(_) => Reply::status(404),
    })
    .await
}
