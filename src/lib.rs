//! Ferroprof - Continuous Runtime Profile Collector
//!
//! This crate periodically captures runtime profiles (CPU, heap, and other
//! types) and process metrics of the host process, then writes them to a
//! local directory with time-based retention or pushes them to a collection
//! agent. It can be embedded as a library or run as the `ferroprof` binary.
//!
//! # Architecture
//!
//! - **Config**: builder-style [`Settings`] and YAML [`AppConfig`]
//! - **Capture**: [`ProfileSource`] / [`MetricsSource`] facilities
//! - **Pipeline**: scheduler → bounded channel → dispatcher
//! - **Sink**: file or network output, retention sweeper
//! - **Event**: structured [`Event`]s delivered to an injected [`Reporter`]
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use ferroprof::{Profiler, Settings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::new("checkout-api")
//!         .with_interval(Duration::from_secs(60))
//!         .with_cpu_profile_duration(Duration::from_secs(10))
//!         .enable_goroutine_profile()
//!         .write_to_dir("./profiles");
//!
//!     let handle = Profiler::new(settings)?.start()?;
//!     tokio::signal::ctrl_c().await?;
//!     handle.shutdown().await?;
//!     Ok(())
//! }
//! ```

// Unit tests run on jemalloc with profiling enabled so heap capture works.
#[cfg(all(test, target_os = "linux"))]
#[global_allocator]
static TEST_ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[cfg(all(test, target_os = "linux"))]
#[allow(non_upper_case_globals)]
#[unsafe(export_name = "_rjem_malloc_conf")]
pub static malloc_conf: &[u8] = b"prof:true,prof_active:true,lg_prof_sample:19\0";

pub mod capture;
pub mod config;
pub mod event;
pub mod pipeline;
pub mod sink;

pub use capture::{
    CaptureError, CapturedArtifact, Collected, Identity, MemoryStats, MetricsSample,
    MetricsSource, ProcessMetricsSource, ProcessProfileSource, ProfileSource, ProfileType,
    RuntimeCounters,
};
pub use config::{AppConfig, ConfigError, OutputMode, Settings};
pub use event::{Event, EventKind, EventSeverity, Reporter, SharedReporter, TracingReporter};
pub use pipeline::{
    ChannelError, PipelineStats, Profiler, ProfilerError, ProfilerHandle, ProfilerState,
    StatsSnapshot,
};
pub use sink::{
    AgentPayload, DispatchError, FileSink, NetworkSink, RetentionError, RetentionSweeper, Sink,
};
