//! reelcast-core: shared types, IDs, errors, configuration and metrics.
//!
//! This crate is the foundational dependency of the server crate and the
//! CLI, providing the unified error type, the TOML configuration model,
//! deterministic video identifiers and the server-wide counters.

pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::VideoId;
pub use metrics::{Metrics, MetricsSnapshot};
