//! Integration tests for workspace git diff statistics.

use std::path::Path;
use std::process::Command;

use agent_supervisor::orchestrator::git;

use super::test_helpers::Harness;

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|out| out.status.success())
}

fn run_git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["-c", "user.email=tests@example.com", "-c", "user.name=Tests"])
        .args(["-c", "commit.gpgsign=false"])
        .args(args)
        .output()
        .expect("run git");
    assert!(
        status.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&status.stderr)
    );
}

fn init_repo(dir: &Path) {
    std::fs::create_dir_all(dir).expect("workspace");
    run_git(dir, &["init", "-q"]);
    std::fs::write(dir.join("README.md"), "hello\n").expect("readme");
    run_git(dir, &["add", "README.md"]);
    run_git(dir, &["commit", "-q", "-m", "initial"]);
}

#[tokio::test]
async fn non_git_workspace_has_empty_diff_stat() {
    let h = Harness::new();
    h.start("plain").await;

    assert_eq!(h.manager.get_session_git_diff_stat("plain").await.expect("stat"), "");
}

#[tokio::test]
async fn diff_stat_reports_changes_since_session_start() {
    if !git_available() {
        return;
    }
    let h = Harness::new();
    let ws = h.workspace("repo");
    init_repo(&ws);

    let state = h
        .manager
        .start_session("repo", "edit readme", vec!["agent".into()], &ws)
        .await
        .expect("start");
    assert!(state.start_commit_sha.is_some());
    assert_eq!(h.manager.get_session_git_diff_stat("repo").await.expect("stat"), "");

    std::fs::write(ws.join("README.md"), "hello\nworld\n").expect("edit");
    let stat = h.manager.get_session_git_diff_stat("repo").await.expect("stat");
    assert!(stat.contains("README.md"), "unexpected stat: {stat}");
    assert!(stat.contains("1 insertion"), "unexpected stat: {stat}");
}

#[tokio::test]
async fn diff_stat_is_frozen_at_end_commit_after_stop() {
    if !git_available() {
        return;
    }
    let h = Harness::new();
    let ws = h.workspace("frozen");
    init_repo(&ws);
    h.manager
        .start_session("frozen", "goal", vec!["agent".into()], &ws)
        .await
        .expect("start");

    std::fs::write(ws.join("notes.txt"), "one\n").expect("notes");
    run_git(&ws, &["add", "notes.txt"]);
    run_git(&ws, &["commit", "-q", "-m", "agent work"]);
    h.manager.stop_session("frozen").await.expect("stop");

    let stopped = h.manager.load_session("frozen").expect("load");
    assert!(stopped.end_commit_sha.is_some());
    assert_ne!(stopped.end_commit_sha, stopped.start_commit_sha);

    // Uncommitted edits after the session ended are not attributed to it.
    std::fs::write(ws.join("README.md"), "changed later\n").expect("edit");
    let stat = h.manager.get_session_git_diff_stat("frozen").await.expect("stat");
    assert!(stat.contains("notes.txt"), "unexpected stat: {stat}");
    assert!(!stat.contains("README.md"), "unexpected stat: {stat}");
}

#[tokio::test]
async fn unknown_session_diff_stat_is_not_found() {
    let h = Harness::new();
    assert!(matches!(
        h.manager.get_session_git_diff_stat("ghost").await,
        Err(agent_supervisor::AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn git_helpers_handle_missing_and_empty_repos() {
    let temp = tempfile::tempdir().expect("tempdir");
    let missing = temp.path().join("missing");

    assert!(!git::is_git_repo(&missing).await);
    assert_eq!(git::current_commit_sha(&missing).await, None);
    assert_eq!(git::diff_stat(&missing, None, None).await.expect("stat"), "");

    if git_available() {
        let empty = temp.path().join("empty");
        std::fs::create_dir(&empty).expect("dir");
        run_git(&empty, &["init", "-q"]);
        assert!(git::is_git_repo(&empty).await);
        assert_eq!(git::current_commit_sha(&empty).await, None);
    }
}
