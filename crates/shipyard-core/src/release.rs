//! Release identity: version, build number and the status document.
//!
//! The version comes from an explicit override or from the first non-empty
//! line of a version file. Both plain (`1.2.3+4`) and pubspec-style
//! (`version: 1.2.3+4`) lines are understood. Numeric build metadata is the
//! build number.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use semver::{BuildMetadata, Version};
use serde::{Deserialize, Serialize};

use crate::git;

/// File name of the status document inside the deployed artifact.
pub const STATUS_DOCUMENT: &str = "version.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseStamp {
    pub version: String,
    pub build_number: u64,
    pub build_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<String>,
}

impl ReleaseStamp {
    /// `1.2.3+7`
    pub fn full_version(&self) -> String {
        format!("{}+{}", self.version, self.build_number)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize release stamp")
    }
}

impl fmt::Display for ReleaseStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (build {})", self.version, self.build_number)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bump {
    #[default]
    None,
    Build,
    Patch,
    Minor,
    Major,
}

impl Bump {
    /// Apply the bump. Any bump other than `None` also advances the build
    /// number.
    pub fn apply(self, version: &Version, build: u64) -> (Version, u64) {
        let mut next = Version::new(version.major, version.minor, version.patch);
        next.pre = version.pre.clone();
        match self {
            Bump::None => return (next, build),
            Bump::Build => {}
            Bump::Patch => next.patch += 1,
            Bump::Minor => {
                next.minor += 1;
                next.patch = 0;
            }
            Bump::Major => {
                next.major += 1;
                next.minor = 0;
                next.patch = 0;
            }
        }
        if !matches!(self, Bump::Build) {
            next.pre = semver::Prerelease::EMPTY;
        }
        (next, build + 1)
    }
}

/// A parsed version with build metadata split off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedVersion {
    pub version: Version,
    /// Numeric build metadata, if the version carried any.
    pub build: Option<u64>,
}

pub fn parse_version(raw: &str) -> anyhow::Result<ParsedVersion> {
    let raw = raw.trim().trim_start_matches('v');
    let mut version =
        Version::parse(raw).with_context(|| format!("Invalid semantic version: {raw:?}"))?;
    let build = version.build.as_str().parse::<u64>().ok();
    version.build = BuildMetadata::EMPTY;
    Ok(ParsedVersion { version, build })
}

/// The version line of a version file, and how to rewrite it.
#[derive(Debug, Clone)]
pub struct VersionFile {
    path: PathBuf,
    lines: Vec<String>,
    line_index: usize,
    prefix: String,
    raw: String,
}

impl VersionFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read version file: {}", path.display()))?;
        Self::parse(path, &text)
    }

    pub fn parse(path: &Path, text: &str) -> anyhow::Result<Self> {
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        let (line_index, line) = lines
            .iter()
            .enumerate()
            .find(|(_, line)| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with('#')
                    && (!line.contains(':') || line.starts_with("version:"))
            })
            .ok_or_else(|| anyhow::anyhow!("No version found in {}", path.display()))?;

        let (prefix, raw) = match line.trim().strip_prefix("version:") {
            Some(rest) => ("version: ".to_string(), rest.trim().to_string()),
            None => (String::new(), line.trim().to_string()),
        };
        Ok(Self {
            path: path.to_path_buf(),
            lines,
            line_index,
            prefix,
            raw,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The version text as written, e.g. `1.2.3+7`.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// File contents with the version line replaced.
    pub fn render(&self, version: &Version, build: u64) -> String {
        let mut lines = self.lines.clone();
        lines[self.line_index] = format!("{}{}+{}", self.prefix, version, build);
        let mut text = lines.join("\n");
        text.push('\n');
        text
    }

    pub fn write(&self, version: &Version, build: u64) -> anyhow::Result<()> {
        std::fs::write(&self.path, self.render(version, build))
            .with_context(|| format!("Failed to write version file: {}", self.path.display()))
    }
}

/// Where the version comes from and how it changes.
#[derive(Debug, Clone, Default)]
pub struct ReleaseInputs {
    pub source_dir: PathBuf,
    pub version_override: Option<String>,
    pub version_file: Option<PathBuf>,
    pub bump: Bump,
}

/// A resolved release plus the version file rewrite it implies, if any.
#[derive(Debug, Clone)]
pub struct PreparedRelease {
    pub stamp: ReleaseStamp,
    pub file_update: Option<(VersionFile, Version)>,
}

/// Resolve the release for this run. Pure apart from reading the source tree.
pub fn prepare_release(inputs: &ReleaseInputs, now: DateTime<Utc>) -> anyhow::Result<PreparedRelease> {
    let version_file = match &inputs.version_file {
        Some(path) => Some(VersionFile::load(path)?),
        None => None,
    };
    let raw = match (&inputs.version_override, &version_file) {
        (Some(raw), _) => raw.clone(),
        (None, Some(file)) => file.raw().to_string(),
        (None, None) => anyhow::bail!("No release version: set release.version or source.version_file"),
    };
    let parsed = parse_version(&raw)?;

    let head = git::head_info(&inputs.source_dir).unwrap_or_else(|err| {
        tracing::debug!(error = %err, "could not read git metadata");
        None
    });
    let base_build = parsed
        .build
        .or_else(|| head.as_ref().map(|h| h.commit_count))
        .unwrap_or(1);

    let (version, build_number) = inputs.bump.apply(&parsed.version, base_build);
    let file_update = match (inputs.bump, version_file) {
        (Bump::None, _) | (_, None) => None,
        (_, Some(file)) => Some((file, version.clone())),
    };

    Ok(PreparedRelease {
        stamp: ReleaseStamp {
            version: version.to_string(),
            build_number,
            build_date: now,
            git_commit: head.map(|h| h.commit),
        },
        file_update,
    })
}
