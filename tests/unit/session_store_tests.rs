//! Unit tests for the file-backed session store.

use std::path::Path;

use agent_supervisor::config::GlobalConfig;
use agent_supervisor::models::session::{SessionState, SessionStatus};
use agent_supervisor::persistence::{Partition, SessionStore};
use agent_supervisor::AppError;
use chrono::{Duration, Utc};

fn open_store(root: &Path) -> SessionStore {
    SessionStore::open(&GlobalConfig::with_sessions_dir(root)).expect("open store")
}

fn record(store: &SessionStore, name: &str, status: SessionStatus) -> SessionState {
    let mut state = SessionState::new_running(
        name.into(),
        "goal".into(),
        vec!["agent".into()],
        store.active_dir().join("ws"),
        store.log_path(Partition::Active, name),
        1000,
        None,
    );
    if status != SessionStatus::Running {
        state.transition_to(status).expect("transition");
    }
    state
}

fn names(sessions: &[SessionState]) -> Vec<&str> {
    sessions.iter().map(|s| s.name.as_str()).collect()
}

#[test]
fn open_creates_partition_directories() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().join("nested").join("sessions");
    let _store = open_store(&root);

    assert!(root.is_dir());
    assert!(root.join("archived").is_dir());
    assert!(root.join("tombstones").is_dir());
}

#[test]
fn save_then_load_returns_the_same_record() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = open_store(temp.path());
    let state = record(&store, "alpha", SessionStatus::Running);

    store.save(&state).expect("save");

    assert_eq!(store.load("alpha").expect("load"), state);
    assert!(store.exists_active("alpha"));
    assert!(!store.exists_archived("alpha"));
}

#[test]
fn save_overwrites_without_leaving_temp_files() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = open_store(temp.path());
    let mut state = record(&store, "alpha", SessionStatus::Running);
    store.save(&state).expect("first save");

    state.transition_to(SessionStatus::Stopped).expect("stop");
    store.save(&state).expect("second save");

    assert_eq!(store.load("alpha").expect("load").status, SessionStatus::Stopped);
    let stray: Vec<_> = std::fs::read_dir(temp.path())
        .expect("read dir")
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(stray.is_empty(), "temporary files left behind: {stray:?}");
}

#[test]
fn load_missing_is_not_found() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = open_store(temp.path());

    assert!(matches!(store.load("ghost"), Err(AppError::NotFound(_))));
    assert!(matches!(store.load_archived("ghost"), Err(AppError::NotFound(_))));
}

#[test]
fn load_rejects_path_like_names() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = open_store(temp.path());

    assert!(matches!(store.load("../etc"), Err(AppError::InvalidName(_))));
}

#[test]
fn listing_skips_foreign_and_corrupt_files_and_sorts_by_start_time() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = open_store(temp.path());

    let mut newer = record(&store, "newer", SessionStatus::Running);
    let mut older = record(&store, "older", SessionStatus::Stopped);
    older.start_time = Utc::now() - Duration::hours(2);
    newer.start_time = Utc::now() - Duration::hours(1);
    store.save(&newer).expect("save newer");
    store.save(&older).expect("save older");

    std::fs::write(temp.path().join("notes.txt"), "ignore me").expect("write txt");
    std::fs::write(temp.path().join("broken.json"), "{ not json").expect("write corrupt");
    std::fs::write(temp.path().join("older.log"), "log").expect("write log");

    let listed = store.list_active().expect("list");
    assert_eq!(names(&listed), vec!["older", "newer"]);
}

#[test]
fn archive_moves_record_and_log_between_partitions() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = open_store(temp.path());
    let state = record(&store, "done", SessionStatus::Completed);
    store.save(&state).expect("save");
    std::fs::write(&state.log_file, "agent output\n").expect("write log");

    let archived = store.archive("done").expect("archive");

    assert_eq!(archived.status, SessionStatus::Archived);
    assert_eq!(archived.archived_from, Some(SessionStatus::Completed));
    assert!(!store.exists_active("done"));
    assert!(store.exists_archived("done"));
    assert_eq!(archived.log_file, store.log_path(Partition::Archived, "done"));
    assert_eq!(
        std::fs::read_to_string(&archived.log_file).expect("archived log"),
        "agent output\n"
    );
    assert!(store.list_active().expect("list active").is_empty());
    assert_eq!(names(&store.list_archived().expect("list archived")), vec!["done"]);
}

#[test]
fn archive_rejects_live_sessions() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = open_store(temp.path());
    store
        .save(&record(&store, "busy", SessionStatus::Running))
        .expect("save");

    assert!(matches!(store.archive("busy"), Err(AppError::Conflict(_))));
    assert_eq!(store.load("busy").expect("load").status, SessionStatus::Running);
}

#[test]
fn archive_finishes_a_half_archived_record() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = open_store(temp.path());
    let mut state = record(&store, "stranded", SessionStatus::Error);
    state.transition_to(SessionStatus::Archived).expect("archive status");
    store.save(&state).expect("save");

    let archived = store.archive("stranded").expect("archive");

    assert_eq!(archived.archived_from, Some(SessionStatus::Error));
    assert!(store.exists_archived("stranded"));
    assert!(!store.exists_active("stranded"));
}

#[test]
fn unarchive_restores_previous_status() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = open_store(temp.path());
    store
        .save(&record(&store, "done", SessionStatus::Stopped))
        .expect("save");
    store.archive("done").expect("archive");

    let restored = store.unarchive("done").expect("unarchive");

    assert_eq!(restored.status, SessionStatus::Stopped);
    assert!(restored.archived_from.is_none());
    assert_eq!(restored.log_file, store.log_path(Partition::Active, "done"));
    assert_eq!(store.load("done").expect("load"), restored);
    assert!(!store.exists_archived("done"));
}

#[test]
fn failed_unarchive_leaves_archived_record_intact() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = open_store(temp.path());
    let state = record(&store, "job", SessionStatus::Completed);
    store.save(&state).expect("save");
    std::fs::write(&state.log_file, "output\n").expect("write log");
    store.archive("job").expect("archive");

    // A directory squatting on the active log path makes the log move fail.
    let blocker = store.log_path(Partition::Active, "job");
    std::fs::create_dir(&blocker).expect("blocker dir");
    std::fs::write(blocker.join("keep"), "x").expect("blocker content");

    assert!(matches!(store.unarchive("job"), Err(AppError::Io(_))));
    let archived = store.load_archived("job").expect("still archived");
    assert_eq!(archived.status, SessionStatus::Archived);
    assert_eq!(archived.archived_from, Some(SessionStatus::Completed));
    assert!(!store.exists_active("job"));

    std::fs::remove_dir_all(&blocker).expect("remove blocker");
    let restored = store.unarchive("job").expect("retry unarchive");
    assert_eq!(restored.status, SessionStatus::Completed);
    assert_eq!(std::fs::read_to_string(&restored.log_file).expect("log"), "output\n");
}

#[test]
fn rename_moves_record_log_and_retires_old_name() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = open_store(temp.path());
    let state = record(&store, "old", SessionStatus::Stopped);
    store.save(&state).expect("save");
    std::fs::write(&state.log_file, "hello").expect("write log");

    let renamed = store.rename("old", "new").expect("rename");

    assert_eq!(renamed.name, "new");
    assert_eq!(store.load("new").expect("load new"), renamed);
    assert!(!store.exists_active("old"));
    assert!(store.is_retired("old"));
    assert_eq!(std::fs::read_to_string(&renamed.log_file).expect("log"), "hello");
}

#[test]
fn rename_onto_existing_name_is_conflict() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = open_store(temp.path());
    let a = record(&store, "a", SessionStatus::Stopped);
    let b = record(&store, "b", SessionStatus::Stopped);
    store.save(&a).expect("save a");
    store.save(&b).expect("save b");

    assert!(matches!(store.rename("a", "b"), Err(AppError::Conflict(_))));
    assert_eq!(store.load("a").expect("a"), a);
    assert_eq!(store.load("b").expect("b"), b);
}

#[test]
fn remove_deletes_record_and_log_and_retires_name() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = open_store(temp.path());
    let state = record(&store, "gone", SessionStatus::Completed);
    store.save(&state).expect("save");
    std::fs::write(&state.log_file, "bye").expect("write log");

    store.remove("gone").expect("remove");

    assert!(!store.exists_active("gone"));
    assert!(!state.log_file.exists());
    assert!(store.is_retired("gone"));
    assert!(store.name_in_use("gone"));
}

#[test]
fn remove_missing_is_not_found() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = open_store(temp.path());

    assert!(matches!(store.remove("ghost"), Err(AppError::NotFound(_))));
    assert!(!store.is_retired("ghost"));
}
