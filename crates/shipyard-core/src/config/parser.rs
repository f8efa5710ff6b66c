//! TOML parser with helpful error messages

use super::schema::ShipyardConfig;
use anyhow::{Context, Result};
use std::path::Path;

/// Load shipyard.toml: parse, resolve relative paths, validate.
pub fn load_config(path: &Path) -> Result<ShipyardConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    let base = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let base = std::path::absolute(base)
        .with_context(|| format!("Failed to resolve config directory: {}", base.display()))?;
    config.resolve_paths(&base);
    Ok(config)
}

/// Parse and validate shipyard.toml content. Paths are left as written.
pub fn parse_config_str(content: &str) -> Result<ShipyardConfig> {
    let config: ShipyardConfig =
        toml::from_str(content).map_err(|e| enhance_toml_error(e, content))?;
    config.validate()?;
    Ok(config)
}

/// Point at the offending line, with two lines of context either side.
fn enhance_toml_error(error: toml::de::Error, content: &str) -> anyhow::Error {
    let message = error.message().to_string();
    match error.span() {
        Some(span) => {
            let line_num = content[..span.start.min(content.len())]
                .matches('\n')
                .count()
                + 1;
            anyhow::anyhow!(
                "TOML parsing error at line {}:\n{}\n\nError: {}",
                line_num,
                line_context(content, line_num),
                message
            )
        }
        None => anyhow::anyhow!("TOML parsing error: {}", message),
    }
}

fn line_context(content: &str, line_num: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let start = line_num.saturating_sub(3);
    let end = (line_num + 2).min(lines.len());

    lines[start.min(end)..end]
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let num = start + i + 1;
            let marker = if num == line_num { ">>>" } else { "   " };
            format!("{} {:4} | {}", marker, num, line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
[service]
name = "web"

[build]
command = "make dist"
artifact_dir = "dist"

[target]
live_path = "/srv/web"

[[verify.http]]
name = "home"
url = "https://example.com/"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse_config_str(MINIMAL).unwrap();
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.build.timeout_secs, 600);
        assert_eq!(config.verify.http[0].expected_status, 200);
        assert_eq!(config.verify.min_tls_days, 30);
        assert!(config.preflight.check_connectivity);
        assert!(!config.is_remote());
        assert_eq!(config.backup_root(), PathBuf::from("/srv/web-backups"));
        assert_eq!(config.probe_count(), 1);
    }

    #[test]
    fn full_config_parses_every_section() {
        let toml = r#"
[service]
name = "api"

[source]
path = "app"
version_file = "pubspec.yaml"

[build]
command = "flutter build web"
artifact_dir = "build/web"
timeout_secs = 900

[target]
host = "web1.example.com"
user = "deploy"
port = 2222
live_path = "/var/www/api"
backup_root = "/var/backups/api"

[service_control]
stop = "docker compose stop api"
start = "docker compose up -d api"
status = "docker inspect -f '{{.State.Status}}' api"

[retry]
max_retries = 5
base_delay_ms = 500
jitter_ms = 0
timeout_secs = 10

[preflight]
required_tools = ["ssh", "scp"]
require_clean_tree = true

[release]
bump = "patch"

[confirm]
delay_secs = 0

[backup]
keep_on_success = true

[verify]
status_url = "https://api.example.com/version.json"
min_tls_days = 14

[[verify.json]]
name = "health"
url = "https://api.example.com/health"
pointer = "/status"
expected = "ok"

[[verify.service]]
name = "container"

[[verify.tls]]
name = "cert"
host = "api.example.com"

[lock]
dir = "state"
"#;
        let config = parse_config_str(toml).unwrap();
        let host = config.remote_host().unwrap();
        assert_eq!(host.to_string(), "deploy@web1.example.com:2222");
        assert_eq!(config.retry_policy().max_retries, 5);
        assert_eq!(config.release.bump, crate::release::Bump::Patch);
        assert_eq!(config.verify.tls[0].port, 443);
        assert_eq!(config.verify.json[0].expected, serde_json::json!("ok"));
        assert_eq!(config.probe_count(), 4);
        assert_eq!(config.backup_root(), PathBuf::from("/var/backups/api"));
    }

    #[test]
    fn syntax_error_points_at_line() {
        let toml = "[service]\nname = \"web\"\n[build\ncommand = \"x\"\n";
        let err = parse_config_str(toml).unwrap_err().to_string();
        assert!(err.contains("line 3"), "{err}");
        assert!(err.contains(">>>"), "{err}");
    }

    #[test]
    fn relative_live_path_is_rejected() {
        let toml = MINIMAL.replace("/srv/web", "srv/web");
        let err = parse_config_str(&toml).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::RelativePath { .. })
        ));
    }

    #[test]
    fn zero_retries_are_rejected() {
        let toml = format!("{MINIMAL}\n[retry]\nmax_retries = 0\n");
        let err = parse_config_str(&toml).unwrap_err();
        assert!(matches!(err.downcast_ref::<ConfigError>(), Some(ConfigError::Retry(_))));
    }

    #[test]
    fn duplicate_probe_names_are_rejected() {
        let toml = format!("{MINIMAL}\n[[verify.http]]\nname = \"home\"\nurl = \"https://x.test/\"\n");
        let err = parse_config_str(&toml).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::DuplicateProbe("home".into()))
        );
    }

    #[test]
    fn bad_probe_url_is_rejected() {
        let toml = MINIMAL.replace("https://example.com/", "ftp://example.com/");
        assert!(parse_config_str(&toml).is_err());
    }

    #[test]
    fn service_probe_needs_a_command() {
        let toml = format!("{MINIMAL}\n[[verify.service]]\nname = \"svc\"\n");
        let err = parse_config_str(&toml).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::MissingStatusCommand(_))
        ));
    }

    #[test]
    fn load_resolves_paths_against_config_dir() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("shipyard.toml");
        let toml = MINIMAL.replace(
            "[build]",
            "[source]\npath = \"app\"\nversion_file = \"VERSION\"\n\n[build]",
        );
        std::fs::write(&path, toml).unwrap();

        let config = load_config(&path).unwrap();

        assert_eq!(config.source.path, tmp.path().join("app"));
        assert_eq!(config.source.version_file, Some(tmp.path().join("app/VERSION")));
        assert_eq!(config.build.artifact_dir, tmp.path().join("app/dist"));
        assert_eq!(config.source.stamp_path, tmp.path().join("app/version.json"));
    }

    #[test]
    fn missing_file_mentions_path() {
        let err = load_config(Path::new("/definitely/missing/shipyard.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("/definitely/missing/shipyard.toml"));
    }
}
