//! Schema for shipyard.toml
//!
//! One file describes one release pipeline for one service: where the
//! source lives, how it is built, where it is deployed, how the running
//! service is controlled and how the deployment is verified.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::release::{Bump, ReleaseInputs};
use crate::remote::RemoteHost;
use crate::retry::RetryPolicy;
use crate::service::ServiceCommands;

/// Root configuration structure for shipyard.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipyardConfig {
    pub service: ServiceSection,

    #[serde(default)]
    pub source: SourceSection,

    pub build: BuildSection,

    pub target: TargetSection,

    #[serde(default)]
    pub service_control: ServiceControlSection,

    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub preflight: PreflightSection,

    #[serde(default)]
    pub release: ReleaseSection,

    #[serde(default)]
    pub confirm: ConfirmSection,

    #[serde(default)]
    pub backup: BackupSection,

    #[serde(default)]
    pub verify: VerifySection,

    #[serde(default)]
    pub lock: LockSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSection {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSection {
    /// Source tree; relative to the config file.
    #[serde(default = "default_source_path")]
    pub path: PathBuf,

    /// File holding the release version; relative to the source tree.
    #[serde(default)]
    pub version_file: Option<PathBuf>,

    /// Where VersionPrepare writes the release stamp; relative to the source tree.
    #[serde(default = "default_stamp_path")]
    pub stamp_path: PathBuf,
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            path: default_source_path(),
            version_file: None,
            stamp_path: default_stamp_path(),
        }
    }
}

fn default_source_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_stamp_path() -> PathBuf {
    PathBuf::from(crate::release::STATUS_DOCUMENT)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSection {
    /// Shell command run in the source tree.
    pub command: String,

    /// Directory the build produces; relative to the source tree.
    pub artifact_dir: PathBuf,

    #[serde(default = "default_build_timeout")]
    pub timeout_secs: u64,
}

fn default_build_timeout() -> u64 {
    600
}

/// Where the live deployment is. Without `host` the target is this machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSection {
    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub identity_file: Option<PathBuf>,

    /// Absolute path of the live deployment on the target.
    pub live_path: PathBuf,

    /// Defaults to `<live_path>-backups`.
    #[serde(default)]
    pub backup_root: Option<PathBuf>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_connect_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceControlSection {
    #[serde(default)]
    pub stop: Option<String>,

    #[serde(default)]
    pub start: Option<String>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

impl Default for ServiceControlSection {
    fn default() -> Self {
        Self {
            stop: None,
            start: None,
            status: None,
            command_timeout_secs: default_command_timeout(),
        }
    }
}

fn default_command_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_attempt_timeout")]
    pub timeout_secs: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            jitter_ms: default_jitter_ms(),
            timeout_secs: default_attempt_timeout(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2000
}

fn default_jitter_ms() -> u64 {
    1000
}

fn default_attempt_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightSection {
    #[serde(default)]
    pub required_tools: Vec<String>,

    /// Relative to the config file.
    #[serde(default)]
    pub required_paths: Vec<PathBuf>,

    #[serde(default)]
    pub require_clean_tree: bool,

    #[serde(default = "default_true")]
    pub check_connectivity: bool,
}

impl Default for PreflightSection {
    fn default() -> Self {
        Self {
            required_tools: Vec::new(),
            required_paths: Vec::new(),
            require_clean_tree: false,
            check_connectivity: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseSection {
    /// Explicit version; wins over `source.version_file`.
    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub bump: Bump,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmSection {
    /// Pause before Distribute, skipped with --force.
    #[serde(default = "default_confirm_delay")]
    pub delay_secs: u64,
}

impl Default for ConfirmSection {
    fn default() -> Self {
        Self {
            delay_secs: default_confirm_delay(),
        }
    }
}

fn default_confirm_delay() -> u64 {
    5
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupSection {
    #[serde(default)]
    pub keep_on_success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifySection {
    /// URL serving the deployed status document.
    #[serde(default)]
    pub status_url: Option<String>,

    #[serde(default = "default_min_tls_days")]
    pub min_tls_days: u32,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    #[serde(default)]
    pub http: Vec<HttpProbeConfig>,

    #[serde(default)]
    pub json: Vec<JsonProbeConfig>,

    #[serde(default)]
    pub service: Vec<ServiceProbeConfig>,

    #[serde(default)]
    pub tls: Vec<TlsProbeConfig>,
}

impl Default for VerifySection {
    fn default() -> Self {
        Self {
            status_url: None,
            min_tls_days: default_min_tls_days(),
            probe_timeout_secs: default_probe_timeout(),
            http: Vec::new(),
            json: Vec::new(),
            service: Vec::new(),
            tls: Vec::new(),
        }
    }
}

fn default_min_tls_days() -> u32 {
    30
}

fn default_probe_timeout() -> u64 {
    15
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpProbeConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
}

fn default_expected_status() -> u16 {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonProbeConfig {
    pub name: String,
    pub url: String,
    /// JSON pointer, e.g. `/status`.
    pub pointer: String,
    pub expected: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceProbeConfig {
    pub name: String,
    /// Defaults to `service_control.status`.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub expected_state: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsProbeConfig {
    pub name: String,
    pub host: String,
    #[serde(default = "default_tls_port")]
    pub port: u16,
    /// Defaults to `verify.min_tls_days`.
    #[serde(default)]
    pub min_days: Option<u32>,
}

fn default_tls_port() -> u16 {
    443
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LockSection {
    /// Defaults to the user state directory.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("{field} must be an absolute path, got {}", .path.display())]
    RelativePath { field: &'static str, path: PathBuf },
    #[error("invalid retry settings: {0}")]
    Retry(String),
    #[error("{field} must be greater than zero")]
    ZeroTimeout { field: &'static str },
    #[error("probe {probe}: invalid URL {url:?}: {reason}")]
    InvalidUrl {
        probe: String,
        url: String,
        reason: String,
    },
    #[error("probe name {0:?} is used more than once")]
    DuplicateProbe(String),
    #[error("service probe {0:?} has no command and service_control.status is not set")]
    MissingStatusCommand(String),
    #[error("json probe {probe}: pointer {pointer:?} must start with '/'")]
    InvalidPointer { probe: String, pointer: String },
}

fn check_url(probe: &str, raw: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(raw).map_err(|err| ConfigError::InvalidUrl {
        probe: probe.to_string(),
        url: raw.to_string(),
        reason: err.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl {
            probe: probe.to_string(),
            url: raw.to_string(),
            reason: format!("unsupported scheme {}", parsed.scheme()),
        });
    }
    Ok(())
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

impl ShipyardConfig {
    /// Validate configuration invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.name.trim().is_empty() {
            return Err(ConfigError::Empty {
                field: "service.name",
            });
        }
        if self.build.command.trim().is_empty() {
            return Err(ConfigError::Empty {
                field: "build.command",
            });
        }
        if !self.target.live_path.is_absolute() {
            return Err(ConfigError::RelativePath {
                field: "target.live_path",
                path: self.target.live_path.clone(),
            });
        }
        if let Some(host) = &self.target.host
            && host.trim().is_empty()
        {
            return Err(ConfigError::Empty {
                field: "target.host",
            });
        }
        self.retry_policy().validate().map_err(ConfigError::Retry)?;

        for (field, value) in [
            ("build.timeout_secs", self.build.timeout_secs),
            (
                "service_control.command_timeout_secs",
                self.service_control.command_timeout_secs,
            ),
            ("verify.probe_timeout_secs", self.verify.probe_timeout_secs),
            ("target.connect_timeout_secs", self.target.connect_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroTimeout { field });
            }
        }

        let mut names = HashSet::new();
        let mut claim = |name: &str| {
            if names.insert(name.to_string()) {
                Ok(())
            } else {
                Err(ConfigError::DuplicateProbe(name.to_string()))
            }
        };
        if let Some(url) = &self.verify.status_url {
            claim(crate::health::StatusDocumentProbe::NAME)?;
            check_url(crate::health::StatusDocumentProbe::NAME, url)?;
        }
        for probe in &self.verify.http {
            claim(&probe.name)?;
            check_url(&probe.name, &probe.url)?;
        }
        for probe in &self.verify.json {
            claim(&probe.name)?;
            check_url(&probe.name, &probe.url)?;
            if !probe.pointer.starts_with('/') {
                return Err(ConfigError::InvalidPointer {
                    probe: probe.name.clone(),
                    pointer: probe.pointer.clone(),
                });
            }
        }
        for probe in &self.verify.service {
            claim(&probe.name)?;
            if probe.command.is_none() && self.service_control.status.is_none() {
                return Err(ConfigError::MissingStatusCommand(probe.name.clone()));
            }
        }
        for probe in &self.verify.tls {
            claim(&probe.name)?;
            if probe.host.trim().is_empty() {
                return Err(ConfigError::Empty { field: "verify.tls.host" });
            }
        }
        Ok(())
    }

    /// Make relative paths absolute. `source.path`, `preflight.required_paths`
    /// and `lock.dir` are relative to `config_dir`; the version file, stamp
    /// path and artifact directory are relative to the source tree.
    pub fn resolve_paths(&mut self, config_dir: &Path) {
        self.source.path = resolve(config_dir, &self.source.path);
        let source = self.source.path.clone();
        self.source.version_file = self
            .source
            .version_file
            .as_deref()
            .map(|p| resolve(&source, p));
        self.source.stamp_path = resolve(&source, &self.source.stamp_path);
        self.build.artifact_dir = resolve(&source, &self.build.artifact_dir);
        self.preflight.required_paths = self
            .preflight
            .required_paths
            .iter()
            .map(|p| resolve(config_dir, p))
            .collect();
        self.lock.dir = self.lock.dir.as_deref().map(|p| resolve(config_dir, p));
    }

    pub fn is_remote(&self) -> bool {
        self.target.host.is_some()
    }

    pub fn remote_host(&self) -> Option<RemoteHost> {
        let host = self.target.host.as_ref()?;
        Some(RemoteHost {
            host: host.clone(),
            user: self.target.user.clone(),
            port: self.target.port,
            identity_file: self.target.identity_file.clone(),
        })
    }

    pub fn live_path(&self) -> &Path {
        &self.target.live_path
    }

    pub fn backup_root(&self) -> PathBuf {
        match &self.target.backup_root {
            Some(root) => root.clone(),
            None => {
                let mut raw = self.target.live_path.as_os_str().to_os_string();
                raw.push("-backups");
                PathBuf::from(raw)
            }
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_retries,
            Duration::from_millis(self.retry.base_delay_ms),
            Duration::from_secs(self.retry.timeout_secs),
        )
        .with_jitter(Duration::from_millis(self.retry.jitter_ms))
    }

    /// Retry policy for service-control commands, with their own timeout.
    pub fn service_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempt_timeout: Duration::from_secs(self.service_control.command_timeout_secs),
            ..self.retry_policy()
        }
    }

    pub fn service_commands(&self) -> ServiceCommands {
        ServiceCommands {
            stop: self.service_control.stop.clone(),
            start: self.service_control.start.clone(),
            status: self.service_control.status.clone(),
        }
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build.timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.verify.probe_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.target.connect_timeout_secs)
    }

    pub fn confirm_delay(&self) -> Duration {
        Duration::from_secs(self.confirm.delay_secs)
    }

    pub fn release_inputs(&self) -> ReleaseInputs {
        ReleaseInputs {
            source_dir: self.source.path.clone(),
            version_override: self.release.version.clone(),
            version_file: self.source.version_file.clone(),
            bump: self.release.bump,
        }
    }

    /// Number of probes the Verify phase will run.
    pub fn probe_count(&self) -> usize {
        usize::from(self.verify.status_url.is_some())
            + self.verify.http.len()
            + self.verify.json.len()
            + self.verify.service.len()
            + self.verify.tls.len()
    }
}
