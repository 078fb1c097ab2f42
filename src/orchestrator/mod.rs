//! Session orchestration modules.
//!
//! Covers agent process control, the session lifecycle state machine,
//! per-name locking, workspace git queries and background reconciliation.

pub mod git;
pub mod locks;
pub mod process;
pub mod reconciler;
pub mod session_manager;

pub use process::{ProcessController, SignalKind, SpawnRequest, SpawnedProcess, SystemProcessController};
pub use reconciler::spawn_reconciler;
pub use session_manager::SessionManager;
