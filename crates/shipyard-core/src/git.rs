//! Read-only git queries against the source tree.

use std::path::Path;

use git2::{ErrorCode, Repository, StatusOptions};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadInfo {
    /// Abbreviated commit id of HEAD.
    pub commit: String,
    /// Number of commits reachable from HEAD.
    pub commit_count: u64,
}

fn open(path: &Path) -> anyhow::Result<Option<Repository>> {
    match Repository::discover(path) {
        Ok(repo) => Ok(Some(repo)),
        Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// `None` outside a repository or on an unborn branch.
pub fn head_info(path: &Path) -> anyhow::Result<Option<HeadInfo>> {
    let Some(repo) = open(path)? else {
        return Ok(None);
    };
    let head = match repo.head() {
        Ok(head) => head,
        Err(err) if matches!(err.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };
    let commit = head.peel_to_commit()?;

    let mut revwalk = repo.revwalk()?;
    revwalk.push(commit.id())?;
    let mut commit_count = 0u64;
    for oid in revwalk {
        oid?;
        commit_count += 1;
    }

    let id = commit.id().to_string();
    Ok(Some(HeadInfo {
        commit: id.chars().take(12).collect(),
        commit_count,
    }))
}

/// Paths with uncommitted changes (untracked included, ignored excluded).
/// `None` outside a repository.
pub fn dirty_paths(path: &Path) -> anyhow::Result<Option<Vec<String>>> {
    let Some(repo) = open(path)? else {
        return Ok(None);
    };
    let mut options = StatusOptions::new();
    options
        .include_untracked(true)
        .include_ignored(false)
        .recurse_untracked_dirs(true);
    let statuses = repo.statuses(Some(&mut options))?;
    let paths = statuses
        .iter()
        .filter(|entry| !entry.status().is_empty())
        .filter_map(|entry| entry.path().map(str::to_string))
        .collect();
    Ok(Some(paths))
}
