//! Pipeline configuration (`shipyard.toml`).

pub mod parser;
pub mod paths;
pub mod schema;

use std::path::PathBuf;

pub use parser::{load_config, parse_config_str};
pub use paths::{CONFIG_FILE, default_config_path, default_state_dir};
pub use schema::{
    BackupSection, BuildSection, ConfigError, ConfirmSection, HttpProbeConfig, JsonProbeConfig,
    LockSection, PreflightSection, ReleaseSection, RetrySection, ServiceControlSection,
    ServiceProbeConfig, ServiceSection, ShipyardConfig, SourceSection, TargetSection,
    TlsProbeConfig, VerifySection,
};

impl ShipyardConfig {
    /// Directory for run locks: `lock.dir` or the user state directory.
    pub fn lock_dir(&self) -> PathBuf {
        self.lock
            .dir
            .clone()
            .unwrap_or_else(|| default_state_dir().join("locks"))
    }
}
