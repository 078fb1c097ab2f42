//! Error types shared across the supervisor.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
///
/// Orphaned sessions are deliberately absent: an orphan is a condition
/// detected during reconciliation, not a failure returned to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Requested session, alert, or job does not exist.
    NotFound(String),
    /// Duplicate name or invalid lifecycle transition.
    Conflict(String),
    /// Session name failed validation.
    InvalidName(String),
    /// Workspace creation or subprocess spawn failure.
    Environment(String),
    /// Delivering a signal to a session process failed.
    Signal(String),
    /// Encoding or decoding a persisted session record failed.
    Store(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// A `git` invocation inside a session workspace failed.
    Git(String),
    /// Job execution was cancelled before it finished.
    Cancelled(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Conflict(msg) => write!(f, "conflict: {msg}"),
            Self::InvalidName(msg) => write!(f, "invalid name: {msg}"),
            Self::Environment(msg) => write!(f, "environment: {msg}"),
            Self::Signal(msg) => write!(f, "signal: {msg}"),
            Self::Store(msg) => write!(f, "store: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Git(msg) => write!(f, "git: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Whether this error means the target simply does not exist.
    ///
    /// Callers that treat absence as "nothing to do" branch on this.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Store(err.to_string())
    }
}
