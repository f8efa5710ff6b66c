//! Content fingerprints for build artifacts and backups.
//!
//! A fingerprint covers relative paths and file contents, so two trees with
//! the same files hash equally regardless of creation order or mtimes.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const DIR_MARKER: u8 = 0xFF;
const FILE_MARKER: u8 = 0x00;
const LINK_MARKER: u8 = 0xFE;

/// Hash plus the size of what was hashed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSummary {
    pub hash: String,
    pub files: u64,
    pub bytes: u64,
}

/// Blake3 fingerprint of a file or directory tree, as lowercase hex.
pub fn hash_tree(path: &Path) -> anyhow::Result<String> {
    Ok(summarize_tree(path)?.hash)
}

/// Fingerprint plus file count and total bytes.
///
/// Symlinks are hashed by their target path, never followed. A plain file
/// is hashed by content alone.
pub fn summarize_tree(path: &Path) -> anyhow::Result<TreeSummary> {
    let meta = fs::symlink_metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?;

    let mut walker = Walker {
        hasher: blake3::Hasher::new(),
        files: 0,
        bytes: 0,
    };
    if meta.is_dir() {
        walker.visit_dir(path, "")?;
    } else {
        walker.visit_file(path, "")?;
    }

    Ok(TreeSummary {
        hash: walker.hasher.finalize().to_hex().to_string(),
        files: walker.files,
        bytes: walker.bytes,
    })
}

struct Walker {
    hasher: blake3::Hasher,
    files: u64,
    bytes: u64,
}

impl Walker {
    fn visit_dir(&mut self, dir: &Path, base: &str) -> anyhow::Result<()> {
        let mut entries = fs::read_dir(dir)
            .with_context(|| format!("Failed to read directory: {}", dir.display()))?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to read directory entries: {}", dir.display()))?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let rel = if base.is_empty() {
                entry.file_name().to_string_lossy().into_owned()
            } else {
                format!("{}/{}", base, entry.file_name().to_string_lossy())
            };
            let path = entry.path();
            let ty = entry
                .file_type()
                .with_context(|| format!("Failed to stat file: {}", path.display()))?;

            if ty.is_dir() {
                self.hasher.update(rel.as_bytes());
                self.hasher.update(&[DIR_MARKER]);
                self.visit_dir(&path, &rel)?;
            } else if ty.is_symlink() {
                let target = fs::read_link(&path)
                    .with_context(|| format!("Failed to read symlink: {}", path.display()))?;
                self.hasher.update(rel.as_bytes());
                self.hasher.update(&[LINK_MARKER]);
                self.hasher.update(target.to_string_lossy().as_bytes());
            } else if ty.is_file() {
                self.visit_file(&path, &rel)?;
            } else {
                anyhow::bail!("Unsupported filesystem entry type: {}", path.display());
            }
        }
        Ok(())
    }

    fn visit_file(&mut self, path: &Path, rel: &str) -> anyhow::Result<()> {
        let content =
            fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))?;
        if !rel.is_empty() {
            self.hasher.update(rel.as_bytes());
            self.hasher.update(&[FILE_MARKER]);
        }
        self.hasher.update(&content);
        self.files += 1;
        self.bytes += content.len() as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create_dir_all should succeed in test temp dirs");
        }
        fs::write(path, content).expect("write should succeed in test temp dirs");
    }

    #[test]
    fn empty_directory_has_stable_hash() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let summary = summarize_tree(a.path()).unwrap();
        assert_eq!(summary.hash.len(), 64);
        assert_eq!(summary.files, 0);
        assert_eq!(summary.hash, hash_tree(b.path()).unwrap());
    }

    #[test]
    fn creation_order_does_not_matter() {
        let first = TempDir::new().unwrap();
        write_file(&first.path().join("a.txt"), "content a");
        write_file(&first.path().join("b/c.txt"), "content c");

        let second = TempDir::new().unwrap();
        write_file(&second.path().join("b/c.txt"), "content c");
        write_file(&second.path().join("a.txt"), "content a");

        assert_eq!(
            hash_tree(first.path()).unwrap(),
            hash_tree(second.path()).unwrap()
        );
    }

    #[test]
    fn content_and_name_changes_change_hash() {
        let tmp = TempDir::new().unwrap();
        write_file(&tmp.path().join("a.txt"), "one");
        let original = hash_tree(tmp.path()).unwrap();

        write_file(&tmp.path().join("a.txt"), "two");
        let edited = hash_tree(tmp.path()).unwrap();
        assert_ne!(original, edited);

        fs::rename(tmp.path().join("a.txt"), tmp.path().join("b.txt")).unwrap();
        assert_ne!(edited, hash_tree(tmp.path()).unwrap());
    }

    #[test]
    fn summary_counts_files_and_bytes() {
        let tmp = TempDir::new().unwrap();
        write_file(&tmp.path().join("index.html"), "<html/>");
        write_file(&tmp.path().join("assets/app.js"), "let x;");

        let summary = summarize_tree(tmp.path()).unwrap();
        assert_eq!(summary.files, 2);
        assert_eq!(summary.bytes, 13);
    }

    #[test]
    fn single_file_is_hashed_by_content() {
        let tmp = TempDir::new().unwrap();
        write_file(&tmp.path().join("x/app.bin"), "payload");
        write_file(&tmp.path().join("y/other.bin"), "payload");

        assert_eq!(
            hash_tree(&tmp.path().join("x/app.bin")).unwrap(),
            hash_tree(&tmp.path().join("y/other.bin")).unwrap()
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_hashed_by_target() {
        let tmp = TempDir::new().unwrap();
        write_file(&tmp.path().join("real.txt"), "data");
        std::os::unix::fs::symlink("real.txt", tmp.path().join("alias")).unwrap();

        let summary = summarize_tree(tmp.path()).unwrap();
        assert_eq!(summary.files, 1);
    }

    #[test]
    fn missing_path_is_an_error() {
        let tmp = TempDir::new().unwrap();
        assert!(hash_tree(&tmp.path().join("nope")).is_err());
    }
}
