//! Domain model module declarations.

pub mod alert;
pub mod event;
pub mod job;
pub mod metrics;
pub mod session;
