//! Run context for dependency injection.
//!
//! Every capability a phase needs (executor, target, service control,
//! backups, certificate lookup) is built once here, real or simulated
//! depending on `--dry-run`. Phases only ever call through these handles.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::backup::BackupManager;
use crate::cancel::CancelToken;
use crate::config::ShipyardConfig;
use crate::health::{CertificateSource, OpensslSource};
use crate::release::{ReleaseStamp, STATUS_DOCUMENT};
use crate::remote::{RemoteChannel, SshChannel};
use crate::retry::RetryExecutor;
use crate::service::ServiceControl;
use crate::target::{DeployTarget, LocalTarget, RemoteTarget, SimulatedTarget};
use crate::types::RunFlags;

/// External systems a run talks to. Tests swap these for fakes.
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub channel: Arc<dyn RemoteChannel>,
    /// Overrides the target derived from `[target]`.
    pub target: Option<Arc<dyn DeployTarget>>,
    pub cert_source: Arc<dyn CertificateSource>,
}

impl Collaborators {
    pub fn system(config: &ShipyardConfig) -> Self {
        Self {
            channel: Arc::new(SshChannel::new(config.connect_timeout())),
            target: None,
            cert_source: Arc::new(OpensslSource::new()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunContext {
    config: Arc<ShipyardConfig>,
    flags: RunFlags,
    cancel: CancelToken,
    executor: RetryExecutor,
    /// Target that holds live state. Simulated in dry-run.
    target: Arc<dyn DeployTarget>,
    /// Description of the real target, also in dry-run.
    target_label: String,
    service: ServiceControl,
    backups: BackupManager,
    cert_source: Arc<dyn CertificateSource>,
}

impl RunContext {
    /// Context backed by the system `ssh`, `scp` and `openssl`.
    pub fn new(config: ShipyardConfig, flags: RunFlags, cancel: CancelToken) -> anyhow::Result<Self> {
        let collaborators = Collaborators::system(&config);
        Self::with_collaborators(config, flags, cancel, collaborators)
    }

    pub fn with_collaborators(
        config: ShipyardConfig,
        flags: RunFlags,
        cancel: CancelToken,
        collaborators: Collaborators,
    ) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let live_executor = RetryExecutor::new(collaborators.channel, cancel.clone())?;

        let real_target: Arc<dyn DeployTarget> = match (collaborators.target, config.remote_host()) {
            (Some(target), _) => target,
            (None, Some(host)) => Arc::new(RemoteTarget::new(
                host,
                live_executor.clone(),
                config.retry_policy(),
                config.connect_timeout(),
            )),
            (None, None) => Arc::new(LocalTarget::new().with_workdir(config.source.path.clone())),
        };
        let target_label = real_target.describe();

        let (executor, target): (RetryExecutor, Arc<dyn DeployTarget>) = if flags.dry_run {
            (
                RetryExecutor::simulated(cancel.clone())?,
                Arc::new(SimulatedTarget::new(target_label.clone())),
            )
        } else {
            (live_executor, real_target)
        };

        let service = ServiceControl::new(
            config.service.name.clone(),
            target.clone(),
            executor.clone(),
            config.service_commands(),
            config.service_policy(),
        );
        let backups = BackupManager::new(
            target.clone(),
            service.clone(),
            config.backup_root(),
            config.live_path(),
        );

        Ok(Self {
            config,
            flags,
            cancel,
            executor,
            target,
            target_label,
            service,
            backups,
            cert_source: collaborators.cert_source,
        })
    }

    pub fn config(&self) -> &ShipyardConfig {
        &self.config
    }

    pub fn flags(&self) -> RunFlags {
        self.flags
    }

    pub fn is_dry_run(&self) -> bool {
        self.flags.dry_run
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    pub fn target(&self) -> &Arc<dyn DeployTarget> {
        &self.target
    }

    pub fn service(&self) -> &ServiceControl {
        &self.service
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    pub fn cert_source(&self) -> &Arc<dyn CertificateSource> {
        &self.cert_source
    }

    pub fn live_path(&self) -> &Path {
        self.config.live_path()
    }

    /// Human-readable target, e.g. `deploy@web1:/srv/app`.
    pub fn target_key(&self) -> String {
        format!("{}:{}", self.target_label, self.live_path().display())
    }

    /// Release stamp currently deployed at the live path, if readable.
    pub async fn live_stamp(&self) -> Option<ReleaseStamp> {
        let path = self.live_path().join(STATUS_DOCUMENT);
        match self.target.read_to_string(&path).await {
            Ok(Some(text)) => match serde_json::from_str(&text) {
                Ok(stamp) => Some(stamp),
                Err(err) => {
                    debug!(path = %path.display(), error = %err, "live status document is not a release stamp");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "could not read live status document");
                None
            }
        }
    }
}
