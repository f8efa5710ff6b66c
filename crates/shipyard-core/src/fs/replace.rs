//! Copy-then-swap replacement of a live path.
//!
//! The new content is staged next to the destination and renamed into
//! place, so a failed copy never leaves a half-written live directory.

use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};

/// Copy `src` (file or directory) to `dst`. `dst` must not exist.
pub fn copy_tree(src: &Path, dst: &Path) -> anyhow::Result<()> {
    let meta = fs::symlink_metadata(src)
        .with_context(|| format!("Failed to stat {}", src.display()))?;
    if meta.is_dir() {
        fs::create_dir_all(dst)
            .with_context(|| format!("Failed to create directory: {}", dst.display()))?;
        copy_dir_contents(src, dst)
    } else {
        copy_entry(src, dst, &meta.file_type())
    }
}

fn copy_dir_contents(src: &Path, dst: &Path) -> anyhow::Result<()> {
    for entry in
        fs::read_dir(src).with_context(|| format!("Failed to read dir: {}", src.display()))?
    {
        let entry =
            entry.with_context(|| format!("Failed to read dir entry: {}", src.display()))?;
        let ty = entry
            .file_type()
            .with_context(|| format!("Failed to stat dir entry: {}", entry.path().display()))?;
        let from = entry.path();
        let to = dst.join(entry.file_name());

        if ty.is_dir() {
            fs::create_dir_all(&to)
                .with_context(|| format!("Failed to create directory: {}", to.display()))?;
            copy_dir_contents(&from, &to)?;
        } else {
            copy_entry(&from, &to, &ty)?;
        }
    }
    Ok(())
}

fn copy_entry(from: &Path, to: &Path, ty: &fs::FileType) -> anyhow::Result<()> {
    if ty.is_symlink() {
        return copy_symlink(from, to);
    }
    if !ty.is_file() {
        anyhow::bail!("Unsupported filesystem entry type at {}", from.display());
    }
    fs::copy(from, to).with_context(|| {
        format!(
            "Failed to copy file from {} to {}",
            from.display(),
            to.display()
        )
    })?;
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> anyhow::Result<()> {
    let target =
        fs::read_link(from).with_context(|| format!("Failed to read symlink: {}", from.display()))?;
    std::os::unix::fs::symlink(&target, to)
        .with_context(|| format!("Failed to recreate symlink at {}", to.display()))
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, _to: &Path) -> anyhow::Result<()> {
    anyhow::bail!("Symlinks are not supported here: {}", from.display())
}

/// Remove a file, symlink or directory tree.
pub fn remove_path(path: &Path) -> std::io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Unused hidden path next to `dst`, for staging.
pub fn sibling_temp_path(dst: &Path) -> anyhow::Result<PathBuf> {
    let parent = dst
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Destination path has no parent: {}", dst.display()))?;
    let base = dst
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("Destination path has no filename: {}", dst.display()))?
        .to_string_lossy();

    let pid = std::process::id();
    for attempt in 0u32..1000 {
        let candidate = parent.join(format!(".{base}.shipyard.{pid}.{attempt}"));
        if fs::symlink_metadata(&candidate).is_err() {
            return Ok(candidate);
        }
    }
    anyhow::bail!("Failed to allocate a unique temp path for {}", dst.display());
}

/// Replace `live` with a copy of `src`.
///
/// `live` may or may not exist beforehand; its parent is created if missing.
pub fn replace_path(src: &Path, live: &Path) -> anyhow::Result<()> {
    if let Some(parent) = live.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let staged = sibling_temp_path(live)?;
    if let Err(err) = copy_tree(src, &staged) {
        let _ = remove_path(&staged);
        return Err(err);
    }

    if fs::symlink_metadata(live).is_ok() {
        remove_path(live)
            .with_context(|| format!("Failed to remove existing path: {}", live.display()))?;
    }
    fs::rename(&staged, live).with_context(|| {
        format!(
            "Failed to move staged path {} into {}",
            staged.display(),
            live.display()
        )
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::hash_tree;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn replace_swaps_existing_directory() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("build");
        let live = tmp.path().join("srv/live");
        write(&src.join("index.html"), "new");
        write(&live.join("index.html"), "old");
        write(&live.join("stale.txt"), "gone");

        replace_path(&src, &live).unwrap();

        assert_eq!(fs::read_to_string(live.join("index.html")).unwrap(), "new");
        assert!(!live.join("stale.txt").exists());
        assert_eq!(hash_tree(&src).unwrap(), hash_tree(&live).unwrap());
    }

    #[test]
    fn replace_creates_missing_live_path() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("build");
        write(&src.join("a/b.txt"), "x");
        let live = tmp.path().join("fresh/live");

        replace_path(&src, &live).unwrap();

        assert!(live.join("a/b.txt").is_file());
    }

    #[test]
    fn replace_leaves_no_staging_directory_behind() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("build");
        write(&src.join("f"), "x");
        let live = tmp.path().join("live");

        replace_path(&src, &live).unwrap();

        let leftovers: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(".shipyard."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn failed_copy_keeps_live_untouched() {
        let tmp = TempDir::new().unwrap();
        let live = tmp.path().join("live");
        write(&live.join("index.html"), "old");

        let err = replace_path(&tmp.path().join("missing"), &live);

        assert!(err.is_err());
        assert_eq!(fs::read_to_string(live.join("index.html")).unwrap(), "old");
    }

    #[test]
    fn copy_tree_copies_single_file() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join("app.bin"), "payload");
        copy_tree(&tmp.path().join("app.bin"), &tmp.path().join("copy.bin")).unwrap();
        assert_eq!(fs::read_to_string(tmp.path().join("copy.bin")).unwrap(), "payload");
    }
}
