//! Job monitoring pipeline.
//!
//! Lifecycle and job code emit [`MonitorEvent`](crate::models::event::MonitorEvent)s
//! through a [`MonitorHandle`]; the [`Monitor`] consumes them asynchronously
//! into a [`MetricsCollector`] and an [`AlertManager`].

pub mod alerts;
pub mod metrics;
pub mod monitor;

pub use alerts::{AlertManager, InMemoryAlertManager};
pub use metrics::{InMemoryMetricsCollector, MetricsCollector};
pub use monitor::{Monitor, MonitorHandle};
