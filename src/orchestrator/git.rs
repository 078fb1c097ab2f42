//! Git helpers for session workspaces.
//!
//! All calls shell out to the `git` binary with `-C <workspace>`.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::{AppError, Result};

/// Whether `dir` is inside a git working tree.
pub async fn is_git_repo(dir: &Path) -> bool {
    if !dir.is_dir() {
        return false;
    }
    match git(dir, &["rev-parse", "--is-inside-work-tree"]).await {
        Ok(out) => out.trim() == "true",
        Err(err) => {
            debug!(dir = %dir.display(), %err, "not a git working tree");
            false
        }
    }
}

/// Current `HEAD` commit of the workspace, or `None` when the directory is
/// not a git checkout or has no commits yet.
pub async fn current_commit_sha(dir: &Path) -> Option<String> {
    if !is_git_repo(dir).await {
        return None;
    }
    match git(dir, &["rev-parse", "HEAD"]).await {
        Ok(out) => {
            let sha = out.trim();
            (!sha.is_empty()).then(|| sha.to_owned())
        }
        Err(err) => {
            debug!(dir = %dir.display(), %err, "workspace has no HEAD commit");
            None
        }
    }
}

/// `git diff --stat` of the workspace.
///
/// With a `start` commit the stat covers `start..end` (or `start` against
/// the working tree when `end` is absent); without one it covers
/// uncommitted changes against `HEAD`. A directory that is not a git
/// checkout yields an empty string.
///
/// # Errors
///
/// Returns `AppError::Git` if git fails inside a real checkout.
pub async fn diff_stat(dir: &Path, start: Option<&str>, end: Option<&str>) -> Result<String> {
    if !is_git_repo(dir).await {
        return Ok(String::new());
    }

    let mut args = vec!["diff", "--stat"];
    if let Some(start) = start {
        args.push(start);
        if let Some(end) = end {
            args.push(end);
        }
    }

    git(dir, &args).await
}

async fn git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|err| AppError::Git(format!("failed to run git: {err}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::Git(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
