//! Default locations.

use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "shipyard.toml";

pub fn default_config_path(cwd: &Path) -> PathBuf {
    cwd.join(CONFIG_FILE)
}

/// Per-user state directory holding run locks.
pub fn default_state_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("state")))
        .unwrap_or_else(std::env::temp_dir)
        .join("shipyard")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_is_in_working_directory() {
        assert_eq!(
            default_config_path(Path::new("/work")),
            PathBuf::from("/work/shipyard.toml")
        );
    }

    #[test]
    fn state_dir_ends_with_app_name() {
        assert!(default_state_dir().ends_with("shipyard"));
    }
}
