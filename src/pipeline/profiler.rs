//! Profiler lifecycle: wiring, start and graceful shutdown.
//!
//! [`Profiler`] owns validated settings plus the injectable sources, sink
//! and reporter. [`Profiler::start`] consumes it and spawns three tasks
//! (scheduler, dispatcher, retention sweeper), each with its own
//! cancellation token, returning a [`ProfilerHandle`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::capture::{
    Identity, MetricsSource, ProcessMetricsSource, ProcessProfileSource, ProfileSource,
};
use crate::config::{ConfigError, OutputMode, Settings};
use crate::event::{Event, EventKind, EventSeverity, SharedReporter, TracingReporter};
use crate::pipeline::{Dispatcher, PipelineStats, Scheduler, StatsSnapshot, output_channel};
use crate::sink::{DispatchError, FileSink, NetworkSink, RetentionSweeper, Sink};

/// Default timeout for graceful shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

const EVENT_SOURCE: &str = "profiler";

/// Errors that can occur while starting or stopping the profiler.
#[derive(Debug, Error)]
pub enum ProfilerError {
    /// Settings failed validation.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The configured sink could not be built.
    #[error("sink error: {0}")]
    Sink(#[from] DispatchError),

    /// `start` was called outside a tokio runtime.
    #[error("profiler must be started inside a tokio runtime")]
    NoRuntime,

    /// A pipeline task panicked.
    #[error("{task} task failed: {message}")]
    Join { task: &'static str, message: String },
}

/// Lifecycle state of the collection loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ProfilerState {
    /// Constructed, not started.
    Idle,
    /// Collection rounds are being scheduled.
    Running,
    /// The scheduler has exited. Terminal.
    Stopped,
}

impl ProfilerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

/// A configured, not-yet-started profiler.
pub struct Profiler {
    settings: Settings,
    profiles: Arc<dyn ProfileSource>,
    metrics: Arc<dyn MetricsSource>,
    reporter: SharedReporter,
    sink: Option<Arc<dyn Sink>>,
}

impl std::fmt::Debug for Profiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profiler")
            .field("settings", &self.settings)
            .field("custom_sink", &self.sink.as_ref().map(|s| s.name().to_string()))
            .finish_non_exhaustive()
    }
}

impl Profiler {
    /// Validate `settings` and build a profiler with the default process
    /// sources and a [`TracingReporter`].
    ///
    /// # Errors
    /// Returns `ConfigError` if the settings are invalid.
    pub fn new(settings: Settings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            settings,
            profiles: Arc::new(ProcessProfileSource::new()),
            metrics: Arc::new(ProcessMetricsSource::new()),
            reporter: Arc::new(TracingReporter),
            sink: None,
        })
    }

    /// Use a custom capture facility.
    pub fn with_profile_source(mut self, source: impl ProfileSource) -> Self {
        self.profiles = Arc::new(source);
        self
    }

    /// Use a custom metrics facility.
    pub fn with_metrics_source(mut self, source: impl MetricsSource) -> Self {
        self.metrics = Arc::new(source);
        self
    }

    /// Route reported events to `reporter`.
    pub fn with_reporter(mut self, reporter: impl crate::event::Reporter) -> Self {
        self.reporter = Arc::new(reporter);
        self
    }

    /// Replace the sink chosen by the output mode.
    pub fn with_sink(mut self, sink: impl Sink) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Always [`ProfilerState::Idle`]; see [`ProfilerHandle::state`] once started.
    pub fn state(&self) -> ProfilerState {
        ProfilerState::Idle
    }

    fn primary_sink(&self) -> Result<Arc<dyn Sink>, DispatchError> {
        if let Some(sink) = &self.sink {
            return Ok(Arc::clone(sink));
        }
        Ok(match self.settings.output() {
            OutputMode::File => Arc::new(FileSink::new(self.settings.profiles_dir())),
            OutputMode::Network => Arc::new(NetworkSink::new(
                self.settings.target_url(),
                self.settings.request_timeout(),
            )?),
        })
    }

    /// Spawn the pipeline tasks.
    ///
    /// # Errors
    /// Returns `ProfilerError::NoRuntime` outside a tokio runtime, or
    /// `ProfilerError::Sink` if the network client cannot be built.
    pub fn start(self) -> Result<ProfilerHandle, ProfilerError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ProfilerError::NoRuntime)?;

        let primary = self.primary_sink()?;
        let settings = Arc::new(self.settings);
        let stats = Arc::new(PipelineStats::new());
        let state = Arc::new(AtomicU8::new(ProfilerState::Running as u8));
        let identity = Identity::current(settings.service(), settings.runtime_version());

        let (tx, rx) = output_channel(
            settings.channel_capacity(),
            settings.send_timeout(),
            Arc::clone(&stats),
        );

        let mut dispatcher = Dispatcher::new(
            rx,
            Arc::clone(&primary),
            Arc::clone(&self.reporter),
            Arc::clone(&stats),
        );
        if settings.output() == OutputMode::Network && settings.network_fallback() {
            dispatcher = dispatcher.with_fallback(FileSink::new(settings.profiles_dir()));
        }

        let scheduler = Scheduler::new(
            Arc::clone(&settings),
            identity,
            self.profiles,
            self.metrics,
            tx,
            Arc::clone(&self.reporter),
            Arc::clone(&stats),
        );

        let scheduler_token = CancellationToken::new();
        let dispatcher_token = CancellationToken::new();
        let sweeper_token = CancellationToken::new();

        let scheduler_state = Arc::clone(&state);
        let scheduler_task = runtime.spawn({
            let token = scheduler_token.clone();
            async move {
                scheduler.run(token).await;
                scheduler_state.store(ProfilerState::Stopped as u8, Ordering::Release);
            }
        });
        let dispatcher_task = runtime.spawn(dispatcher.run(dispatcher_token.clone()));

        let sweeper_task = settings.storage_dir().map(|dir| {
            let sweeper = RetentionSweeper::new(
                dir,
                settings.retention(),
                settings.sweep_interval(),
                Arc::clone(&self.reporter),
                Arc::clone(&stats),
            );
            runtime.spawn(sweeper.run(sweeper_token.clone()))
        });

        tracing::info!(
            service = %settings.service(),
            output = %settings.output(),
            sink = %primary.name(),
            sweeper = sweeper_task.is_some(),
            "Profiler started"
        );
        self.reporter.report(
            Event::new(
                EVENT_SOURCE,
                EventKind::System,
                EventSeverity::Info,
                "Profiler started",
            )
            .with_payload(serde_json::json!({
                "service": settings.service(),
                "interval_ms": settings.interval().as_millis(),
                "profiles": settings.capture_order(),
                "sink": primary.name(),
            })),
        );

        Ok(ProfilerHandle {
            settings,
            state,
            stats,
            reporter: self.reporter,
            scheduler_token,
            dispatcher_token,
            sweeper_token,
            scheduler_task: Some(scheduler_task),
            dispatcher_task: Some(dispatcher_task),
            sweeper_task,
        })
    }
}

/// Handle to a running profiler.
///
/// Dropping the handle without calling [`shutdown`](Self::shutdown) leaves
/// the tasks running until the runtime shuts down.
pub struct ProfilerHandle {
    settings: Arc<Settings>,
    state: Arc<AtomicU8>,
    stats: Arc<PipelineStats>,
    reporter: SharedReporter,
    scheduler_token: CancellationToken,
    dispatcher_token: CancellationToken,
    sweeper_token: CancellationToken,
    scheduler_task: Option<JoinHandle<()>>,
    dispatcher_task: Option<JoinHandle<()>>,
    sweeper_task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ProfilerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfilerHandle")
            .field("service", &self.settings.service())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ProfilerHandle {
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn state(&self) -> ProfilerState {
        ProfilerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Snapshot of the pipeline counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop scheduling rounds. The round in progress completes; the
    /// dispatcher and sweeper keep running until [`shutdown`](Self::shutdown).
    pub fn stop_collection(&self) {
        self.scheduler_token.cancel();
    }

    /// Gracefully shut down with the default timeout.
    ///
    /// # Errors
    /// Returns `ProfilerError::Join` if a pipeline task panicked.
    pub async fn shutdown(self) -> Result<StatsSnapshot, ProfilerError> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Stop the scheduler and wait for it, drain the dispatcher, then stop
    /// the sweeper. Tasks still running when `timeout` elapses are aborted.
    ///
    /// # Errors
    /// Returns `ProfilerError::Join` if a pipeline task panicked.
    pub async fn shutdown_with_timeout(
        mut self,
        timeout: Duration,
    ) -> Result<StatsSnapshot, ProfilerError> {
        let result = tokio::time::timeout(timeout, self.stop_tasks()).await;

        let timed_out = result.is_err();
        if timed_out {
            for task in [
                self.scheduler_task.take(),
                self.dispatcher_task.take(),
                self.sweeper_task.take(),
            ]
            .into_iter()
            .flatten()
            {
                task.abort();
            }
            self.state
                .store(ProfilerState::Stopped as u8, Ordering::Release);
        }

        let stats = self.stats.snapshot();
        match result {
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Profiler shutdown failed");
                self.emit(
                    EventSeverity::Error,
                    "Profiler shutdown failed",
                    serde_json::json!({ "error": e.to_string() }),
                );
                return Err(e);
            }
            Err(_) => {
                tracing::warn!(timeout = ?timeout, "Profiler shutdown timed out, tasks aborted");
            }
            Ok(Ok(())) => {
                tracing::info!(rounds = stats.rounds_completed, "Profiler shutdown complete");
            }
        }

        let (severity, message) = if timed_out {
            (EventSeverity::Warn, "Profiler shutdown timed out")
        } else {
            (EventSeverity::Info, "Profiler shutdown complete")
        };
        self.emit(
            severity,
            message,
            serde_json::json!({ "timed_out": timed_out, "stats": stats }),
        );

        Ok(stats)
    }

    async fn stop_tasks(&mut self) -> Result<(), ProfilerError> {
        self.scheduler_token.cancel();
        if let Some(task) = self.scheduler_task.take() {
            join("scheduler", task).await?;
        }

        self.dispatcher_token.cancel();
        if let Some(task) = self.dispatcher_task.take() {
            join("dispatcher", task).await?;
        }

        self.sweeper_token.cancel();
        if let Some(task) = self.sweeper_task.take() {
            join("sweeper", task).await?;
        }
        Ok(())
    }

    fn emit(&self, severity: EventSeverity, message: &str, payload: serde_json::Value) {
        self.reporter.report(
            Event::new(EVENT_SOURCE, EventKind::System, severity, message).with_payload(payload),
        );
    }
}

async fn join(task: &'static str, handle: JoinHandle<()>) -> Result<(), ProfilerError> {
    handle.await.map_err(|e| ProfilerError::Join {
        task,
        message: e.to_string(),
    })
}
