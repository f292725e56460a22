//! Metrics collection and export for volery.
//!
//! A thin layer over the `metrics` facade: [`definitions`] names every
//! metric, [`recorder::init_metrics`] installs the (optional) Prometheus
//! recorder, and the facade macros are re-exported for callers.
//!
//! ```rust,ignore
//! use volery_metrics::{counter, definitions, gauge};
//!
//! counter!(definitions::INBOUND_MESSAGES).increment(1);
//! gauge!(definitions::BRIDGE_SESSIONS_ACTIVE).increment(1.0);
//! ```

pub mod definitions;
pub mod recorder;

pub use recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
