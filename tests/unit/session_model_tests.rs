//! Unit tests for the session model: state machine, invariants, naming.

use std::path::PathBuf;

use agent_supervisor::models::session::{
    validate_session_name, SessionState, SessionStatus, SESSION_SCHEMA_VERSION,
};
use agent_supervisor::AppError;

fn running(name: &str) -> SessionState {
    SessionState::new_running(
        name.into(),
        "fix the build".into(),
        vec!["agent".into(), "--once".into()],
        PathBuf::from("/tmp/ws"),
        PathBuf::from("/tmp/sessions/a.log"),
        4242,
        Some(99),
    )
}

#[test]
fn new_running_session_has_live_pid_and_no_end_time() {
    let state = running("a");
    assert_eq!(state.status, SessionStatus::Running);
    assert_eq!(state.pid, 4242);
    assert_eq!(state.process_start_token, Some(99));
    assert!(state.end_time.is_none());
    assert_eq!(state.schema_version, SESSION_SCHEMA_VERSION);
    assert_eq!(state.agent_state_file, PathBuf::from("/tmp/ws/.agent_state.json"));
    assert_eq!(state.pause_flag_path(), PathBuf::from("/tmp/ws/.agent_paused"));
}

#[test]
fn pause_and_resume_are_valid_from_running_and_paused() {
    let mut state = running("a");
    state.transition_to(SessionStatus::Paused).expect("pause");
    assert_eq!(state.pid, 4242, "pause keeps the process");
    state.transition_to(SessionStatus::Running).expect("resume");
    assert_eq!(state.status, SessionStatus::Running);
}

#[test]
fn terminal_transition_clears_pid_and_stamps_end_time() {
    for terminal in [SessionStatus::Stopped, SessionStatus::Completed, SessionStatus::Error] {
        let mut state = running("a");
        state.transition_to(terminal).expect("terminal transition");
        assert_eq!(state.pid, 0);
        assert!(state.process_start_token.is_none());
        assert!(state.end_time.is_some());
    }
}

#[test]
fn end_time_is_set_exactly_once() {
    let mut state = running("a");
    state.transition_to(SessionStatus::Stopped).expect("stop");
    let first = state.end_time;

    state.transition_to(SessionStatus::Archived).expect("archive");
    assert_eq!(state.end_time, first);
}

#[test]
fn archive_records_previous_status() {
    let mut state = running("a");
    state.transition_to(SessionStatus::Completed).expect("complete");
    state.transition_to(SessionStatus::Archived).expect("archive");
    assert_eq!(state.archived_from, Some(SessionStatus::Completed));
}

#[test]
fn invalid_transitions_are_conflicts() {
    let mut state = running("a");
    assert!(matches!(
        state.transition_to(SessionStatus::Archived),
        Err(AppError::Conflict(_))
    ));
    assert!(matches!(
        state.transition_to(SessionStatus::Running),
        Err(AppError::Conflict(_))
    ));

    state.transition_to(SessionStatus::Stopped).expect("stop");
    for next in [
        SessionStatus::Running,
        SessionStatus::Paused,
        SessionStatus::Completed,
        SessionStatus::Error,
    ] {
        assert!(
            state.transition_to(next).is_err(),
            "stopped session must not move to {next}"
        );
    }
    assert_eq!(state.status, SessionStatus::Stopped);
}

#[test]
fn status_classification() {
    assert!(SessionStatus::Running.is_live());
    assert!(SessionStatus::Paused.is_live());
    assert!(!SessionStatus::Pending.is_live());
    assert!(SessionStatus::Error.is_terminal());
    assert!(!SessionStatus::Archived.is_terminal());
    assert_eq!(SessionStatus::Completed.to_string(), "completed");
}

#[test]
fn status_serializes_as_snake_case() {
    let json = serde_json::to_string(&SessionStatus::Paused).expect("serialize");
    assert_eq!(json, "\"paused\"");
}

#[test]
fn record_round_trips_through_json() {
    let mut state = running("a");
    state.start_commit_sha = Some("abc123".into());
    let json = serde_json::to_string_pretty(&state).expect("serialize");
    let back: SessionState = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, state);
}

#[test]
fn older_records_without_optional_fields_still_load() {
    let json = r#"{
        "name": "legacy",
        "status": "stopped",
        "command": ["agent"],
        "goal": "",
        "start_time": "2024-01-01T00:00:00Z",
        "log_file": "/tmp/legacy.log",
        "agent_state_file": "/tmp/ws/.agent_state.json",
        "workspace": "/tmp/ws"
    }"#;
    let state: SessionState = serde_json::from_str(json).expect("deserialize");
    assert_eq!(state.schema_version, SESSION_SCHEMA_VERSION);
    assert_eq!(state.pid, 0);
    assert!(state.end_time.is_none());
}

#[test]
fn accepts_ordinary_names() {
    for name in ["a", "feature-123", "fix_build", "v1.2"] {
        validate_session_name(name).expect("valid name");
    }
}

#[test]
fn rejects_unsafe_names() {
    for name in ["", ".", "..", "a/b", "a\\b", "with space", "naïve"] {
        assert!(
            matches!(validate_session_name(name), Err(AppError::InvalidName(_))),
            "{name:?} should be rejected"
        );
    }
}
