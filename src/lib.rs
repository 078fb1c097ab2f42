#![forbid(unsafe_code)]

//! Supervisor for long-running coding-agent sessions.
//!
//! Sessions are persisted as JSON records, each backed by one OS process.
//! A monitor pipeline turns lifecycle and job events into metrics and alerts.

pub mod config;
pub mod errors;
pub mod models;
pub mod monitoring;
pub mod orchestrator;
pub mod persistence;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
