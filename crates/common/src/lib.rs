//! Shared configuration, error types, IDs, and observability primitives for
//! Wavefront crates.
//!
//! Architecture role:
//! - defines the scheduler configuration passed across layers
//! - provides common [`WaveError`] / [`Result`] contracts
//! - hosts typed query/stage/task identifiers
//! - hosts the scheduler metrics registry
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`metrics`]

pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;

pub use config::SchedulerConfig;
pub use error::{Result, WaveError};
pub use ids::*;
pub use metrics::{global_metrics, MetricsRegistry};
