//! Capture facility traits and errors.

use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::capture::{ProfileType, RuntimeCounters};

/// Errors that can occur while capturing a single profile.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The source cannot produce this profile type on this platform.
    #[error("{0} profile is not supported by this source")]
    Unsupported(ProfileType),

    /// The underlying profiler failed.
    #[error("profiler error: {0}")]
    Profiler(String),

    /// I/O error while reading process state.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The blocking capture task panicked or was aborted.
    #[error("capture task failed: {0}")]
    Task(String),
}

/// Source of opaque profile payloads.
///
/// Both methods are blocking; the scheduler calls them from the blocking
/// thread pool, one at a time.
pub trait ProfileSource: Send + Sync + 'static {
    /// Capture an instantaneous profile of `kind`.
    ///
    /// Must return quickly relative to the collection interval.
    fn capture(&self, kind: ProfileType) -> Result<Vec<u8>, CaptureError>;

    /// Capture a CPU profile over `window`.
    ///
    /// Blocks for `window` or until `cancel` fires, whichever comes first,
    /// and finalizes the profile for the time actually observed.
    fn capture_cpu(
        &self,
        window: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, CaptureError>;
}

/// Source of process-level counters. Must not block.
pub trait MetricsSource: Send + Sync + 'static {
    /// Read the current task count and memory statistics.
    fn sample(&self) -> RuntimeCounters;
}

/// Block the current thread for `window`, waking early on cancellation.
///
/// Returns how long was actually waited.
pub fn wait_window(window: Duration, cancel: &CancellationToken) -> Duration {
    const SLICE: Duration = Duration::from_millis(50);

    let start = std::time::Instant::now();
    let mut remaining = window;
    while remaining > Duration::ZERO && !cancel.is_cancelled() {
        let step = remaining.min(SLICE);
        std::thread::sleep(step);
        remaining = window.saturating_sub(start.elapsed());
    }
    start.elapsed()
}
