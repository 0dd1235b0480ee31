//! Capture Layer
//!
//! Produces the raw material of a collection round: one opaque payload per
//! enabled profile type and one metrics sample per round.
//!
//! # Components
//!
//! - [`ProfileSource`]: blocking capture facility (instantaneous types + CPU window)
//! - [`MetricsSource`]: non-blocking process counters
//! - [`ProcessProfileSource`] / [`ProcessMetricsSource`]: implementations for
//!   the current process

mod metrics;
mod process;
mod traits;
mod types;

pub use metrics::ProcessMetricsSource;
pub use process::{DEFAULT_CPU_FREQUENCY, ProcessProfileSource};
pub use traits::{CaptureError, MetricsSource, ProfileSource, wait_window};
pub use types::{
    CapturedArtifact, Collected, Identity, METRICS_TAG, MemoryStats, MetricsSample, ProfileType,
    RuntimeCounters,
};
