//! Unit tests for `AppError` display format and conversions.

use agent_supervisor::AppError;

#[test]
fn display_uses_lowercase_kind_prefix() {
    let cases = [
        (AppError::Config("x".into()), "config: x"),
        (AppError::NotFound("x".into()), "not found: x"),
        (AppError::Conflict("x".into()), "conflict: x"),
        (AppError::InvalidName("x".into()), "invalid name: x"),
        (AppError::Environment("x".into()), "environment: x"),
        (AppError::Signal("x".into()), "signal: x"),
        (AppError::Store("x".into()), "store: x"),
        (AppError::Io("x".into()), "io: x"),
        (AppError::Git("x".into()), "git: x"),
        (AppError::Cancelled("x".into()), "cancelled: x"),
    ];

    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn message_has_no_trailing_period() {
    let err = AppError::Conflict("session 'a' already exists".into());
    let s = err.to_string();
    assert!(!s.ends_with('.'), "error message must not end with a period: {s}");
}

#[test]
fn is_not_found_only_matches_not_found() {
    assert!(AppError::NotFound("gone".into()).is_not_found());
    assert!(!AppError::Conflict("gone".into()).is_not_found());
    assert!(!AppError::Io("gone".into()).is_not_found());
}

#[test]
fn toml_errors_become_config_errors() {
    let err: AppError = toml::from_str::<toml::Value>("not = [valid")
        .expect_err("invalid toml")
        .into();
    assert!(matches!(err, AppError::Config(ref msg) if msg.starts_with("invalid config")));
}

#[test]
fn json_errors_become_store_errors() {
    let err: AppError = serde_json::from_str::<serde_json::Value>("{")
        .expect_err("invalid json")
        .into();
    assert!(matches!(err, AppError::Store(_)));
}

#[test]
fn errors_are_cloneable_and_comparable() {
    let err = AppError::Cancelled("job 'a' was cancelled".into());
    assert_eq!(err.clone(), err);
    let as_dyn: &dyn std::error::Error = &err;
    assert!(!as_dyn.to_string().is_empty());
}
