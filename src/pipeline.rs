//! Collection Pipeline
//!
//! Scheduler (producer) → bounded output channel → dispatcher (consumer),
//! plus the retention sweeper, all as tokio tasks owned by a
//! [`ProfilerHandle`].
//!
//! # Components
//!
//! - [`Profiler`]: validated configuration and injected facilities
//! - [`Scheduler`]: fixed-rate, non-overlapping collection rounds
//! - [`OutputSender`]: enqueue with bounded wait, drop on timeout
//! - [`Dispatcher`]: single-consumer delivery with optional file fallback
//! - [`PipelineStats`]: shared counters

mod channel;
mod dispatcher;
mod profiler;
mod scheduler;
mod stats;

pub use channel::{ChannelError, OutputReceiver, OutputSender, output_channel};
pub use dispatcher::Dispatcher;
pub use profiler::{
    DEFAULT_SHUTDOWN_TIMEOUT, Profiler, ProfilerError, ProfilerHandle, ProfilerState,
};
pub use scheduler::{RoundSummary, Scheduler};
pub use stats::{PipelineStats, StatsSnapshot};
