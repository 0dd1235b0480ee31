//! Collection scheduler.
//!
//! Drives fixed-rate collection rounds. Each round captures every enabled
//! profile type in capture order (CPU last), then samples the process
//! metrics, handing each item to the output channel as soon as it exists.
//! Rounds never overlap: if one overruns the interval, the next starts
//! immediately after it and missed ticks are not replayed.
//!
//! Round timestamps have second resolution on disk, so each round's start
//! second is kept strictly greater than the previous one.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::capture::{
    CaptureError, CapturedArtifact, Collected, Identity, MetricsSample, MetricsSource,
    ProfileSource, ProfileType,
};
use crate::config::Settings;
use crate::event::{Event, EventKind, EventSeverity, SharedReporter};
use crate::pipeline::{OutputSender, PipelineStats};

const EVENT_SOURCE: &str = "scheduler";

/// Summary of one collection round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundSummary {
    /// Wall-clock time the round started; stamped on every item.
    pub started_at: DateTime<Utc>,
    /// Profile types captured successfully.
    pub captured: Vec<ProfileType>,
    /// Profile types whose capture failed.
    pub failed: Vec<ProfileType>,
    /// Items dropped by the output channel.
    pub dropped: usize,
}

/// Runs collection rounds until cancelled.
pub struct Scheduler {
    settings: Arc<Settings>,
    identity: Identity,
    profiles: Arc<dyn ProfileSource>,
    metrics: Arc<dyn MetricsSource>,
    output: OutputSender,
    reporter: SharedReporter,
    stats: Arc<PipelineStats>,
    last_second: AtomicI64,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("service", &self.identity.service)
            .field("interval", &self.settings.interval())
            .field("profiles", &self.settings.profiles())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(
        settings: Arc<Settings>,
        identity: Identity,
        profiles: Arc<dyn ProfileSource>,
        metrics: Arc<dyn MetricsSource>,
        output: OutputSender,
        reporter: SharedReporter,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            settings,
            identity,
            profiles,
            metrics,
            output,
            reporter,
            stats,
            last_second: AtomicI64::new(i64::MIN),
        }
    }

    /// Run rounds at the configured interval, the first one immediately.
    ///
    /// Cancellation is observed between rounds; a round already in progress
    /// completes (its CPU window is cut short) before the loop exits.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            service = %self.identity.service,
            interval = ?self.settings.interval(),
            profiles = ?self.settings.capture_order(),
            "Collection scheduler started"
        );

        let mut ticker = tokio::time::interval(self.settings.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            self.run_round(&cancel).await;

            if cancel.is_cancelled() {
                break;
            }
        }

        tracing::info!(
            rounds = self.stats.snapshot().rounds_completed,
            "Collection scheduler stopped"
        );
    }

    /// Execute a single collection round.
    pub async fn run_round(&self, cancel: &CancellationToken) -> RoundSummary {
        let start = Instant::now();
        let started_at = self.round_timestamp();
        let mut summary = RoundSummary {
            started_at,
            captured: Vec::new(),
            failed: Vec::new(),
            dropped: 0,
        };
        tracing::debug!(timestamp = started_at.timestamp(), "Running collection round");

        for kind in self.settings.capture_order() {
            match self.capture(kind, cancel).await {
                Ok(payload) => {
                    self.stats.record_capture();
                    summary.captured.push(kind);
                    let artifact = CapturedArtifact {
                        timestamp: started_at,
                        profile_type: kind,
                        identity: self.identity.clone(),
                        payload,
                    };
                    if !self.enqueue(Collected::Profile(artifact)).await {
                        summary.dropped += 1;
                    }
                }
                Err(e) => {
                    self.stats.record_capture_failure();
                    summary.failed.push(kind);
                    self.emit_capture_error(kind, &e);
                }
            }
        }

        let counters = self.metrics.sample();
        self.stats.record_sample();
        let sample = MetricsSample {
            timestamp: started_at,
            identity: self.identity.clone(),
            task_count: counters.task_count,
            memory: counters.memory,
        };
        if !self.enqueue(Collected::Metrics(sample)).await {
            summary.dropped += 1;
        }

        self.stats.record_round();
        let duration_ms = start.elapsed().as_millis();
        tracing::debug!(
            duration_ms,
            captured = summary.captured.len(),
            failed = summary.failed.len(),
            "Collection round completed"
        );
        if start.elapsed() > self.settings.interval() {
            tracing::warn!(
                duration_ms,
                interval = ?self.settings.interval(),
                "Collection round overran the interval"
            );
        }

        summary
    }

    /// Wall-clock start of a round, bumped to the next second when the
    /// clock has not moved past the previous round's second.
    fn round_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        let last = self.last_second.load(Ordering::Relaxed);
        let started_at = if now.timestamp() > last {
            now
        } else {
            tracing::debug!(
                now = now.timestamp(),
                last,
                "Round started within the previous round's second"
            );
            DateTime::from_timestamp(last.saturating_add(1), 0).unwrap_or(now)
        };
        self.last_second.store(started_at.timestamp(), Ordering::Relaxed);
        started_at
    }

    async fn capture(
        &self,
        kind: ProfileType,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, CaptureError> {
        let source = Arc::clone(&self.profiles);
        let task = if kind.is_windowed() {
            let window = self.settings.cpu_duration();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || source.capture_cpu(window, &cancel))
        } else {
            tokio::task::spawn_blocking(move || source.capture(kind))
        };

        task.await.map_err(|e| CaptureError::Task(e.to_string()))?
    }

    /// Hand an item to the dispatcher. Returns `false` if it was dropped.
    async fn enqueue(&self, item: Collected) -> bool {
        match self.output.send(item).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to enqueue collected item");
                self.reporter.report(
                    Event::new(
                        EVENT_SOURCE,
                        EventKind::Channel,
                        EventSeverity::Warn,
                        e.to_string(),
                    )
                    .with_payload(serde_json::json!({ "error": e.to_string() })),
                );
                false
            }
        }
    }

    fn emit_capture_error(&self, kind: ProfileType, err: &CaptureError) {
        tracing::error!(profile = %kind, error = %err, "Capture failed");
        self.reporter.report(
            Event::new(
                EVENT_SOURCE,
                EventKind::Capture,
                EventSeverity::Error,
                format!("Capture of {kind} profile failed: {err}"),
            )
            .with_payload(serde_json::json!({
                "profile": kind,
                "service": self.identity.service,
                "error": err.to_string(),
            })),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{MemoryStats, RuntimeCounters, wait_window};
    use crate::event::Event;
    use crate::pipeline::output_channel;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeProfiles {
        fail: Option<ProfileType>,
    }

    impl ProfileSource for FakeProfiles {
        fn capture(&self, kind: ProfileType) -> Result<Vec<u8>, CaptureError> {
            if self.fail == Some(kind) {
                return Err(CaptureError::Unsupported(kind));
            }
            Ok(kind.as_ref().as_bytes().to_vec())
        }

        fn capture_cpu(
            &self,
            window: Duration,
            cancel: &CancellationToken,
        ) -> Result<Vec<u8>, CaptureError> {
            let waited = wait_window(window, cancel);
            Ok(format!("cpu:{}", waited.as_millis()).into_bytes())
        }
    }

    struct FakeMetrics;

    impl MetricsSource for FakeMetrics {
        fn sample(&self) -> RuntimeCounters {
            RuntimeCounters {
                task_count: 3,
                memory: MemoryStats::default(),
            }
        }
    }

    /// Records when each round starts (its first capture) and runs the
    /// queued CPU windows before falling back to the configured one.
    struct TimedProfiles {
        starts: Arc<Mutex<Vec<Instant>>>,
        windows: Mutex<Vec<Duration>>,
    }

    impl ProfileSource for TimedProfiles {
        fn capture(&self, kind: ProfileType) -> Result<Vec<u8>, CaptureError> {
            if kind == ProfileType::Heap {
                self.starts.lock().unwrap().push(Instant::now());
            }
            Ok(Vec::new())
        }

        fn capture_cpu(
            &self,
            window: Duration,
            cancel: &CancellationToken,
        ) -> Result<Vec<u8>, CaptureError> {
            let queued = {
                let mut windows = self.windows.lock().unwrap();
                (!windows.is_empty()).then(|| windows.remove(0))
            };
            wait_window(queued.unwrap_or(window), cancel);
            Ok(Vec::new())
        }
    }

    fn scheduler_with(
        settings: Settings,
        profiles: Arc<dyn ProfileSource>,
        capacity: usize,
    ) -> (
        Scheduler,
        crate::pipeline::OutputReceiver,
        Arc<Mutex<Vec<Event>>>,
    ) {
        let stats = Arc::new(PipelineStats::new());
        let (tx, rx) = output_channel(capacity, Duration::from_millis(20), Arc::clone(&stats));
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let scheduler = Scheduler::new(
            Arc::new(settings),
            Identity::current("api", "test"),
            profiles,
            Arc::new(FakeMetrics),
            tx,
            Arc::new(move |e: Event| sink.lock().unwrap().push(e)),
            stats,
        );
        (scheduler, rx, events)
    }

    fn scheduler(
        settings: Settings,
        fail: Option<ProfileType>,
        capacity: usize,
    ) -> (
        Scheduler,
        crate::pipeline::OutputReceiver,
        Arc<Mutex<Vec<Event>>>,
    ) {
        scheduler_with(settings, Arc::new(FakeProfiles { fail }), capacity)
    }

    /// Run the scheduler loop for `runtime`, returning the round start times.
    async fn round_starts(
        settings: Settings,
        windows: Vec<Duration>,
        runtime: Duration,
    ) -> Vec<Instant> {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let profiles = TimedProfiles {
            starts: Arc::clone(&starts),
            windows: Mutex::new(windows),
        };
        let (scheduler, _rx, _) = scheduler_with(settings, Arc::new(profiles), 32);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(scheduler.run(cancel.clone()));
        tokio::time::sleep(runtime).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("scheduler did not stop")
            .unwrap();

        starts.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_round_captures_in_order_with_metrics_last() {
        let settings = Settings::new("api")
            .with_cpu_profile_duration(Duration::from_millis(60))
            .enable_goroutine_profile();
        let (scheduler, mut rx, _) = scheduler(settings, None, 8);

        let summary = scheduler.run_round(&CancellationToken::new()).await;
        assert_eq!(
            summary.captured,
            vec![ProfileType::Goroutine, ProfileType::Heap, ProfileType::Cpu]
        );

        let mut tags = Vec::new();
        while let Ok(item) = rx.try_recv() {
            assert_eq!(item.timestamp(), summary.started_at);
            tags.push(item.tag().to_string());
        }
        assert_eq!(tags, vec!["goroutine", "heap", "cpu", "metrics"]);
    }

    #[tokio::test]
    async fn test_capture_failure_does_not_abort_round() {
        let settings = Settings::new("api").with_cpu_profile_duration(Duration::from_millis(20));
        let (scheduler, mut rx, events) = scheduler(settings, Some(ProfileType::Heap), 8);

        let summary = scheduler.run_round(&CancellationToken::new()).await;
        assert_eq!(summary.failed, vec![ProfileType::Heap]);
        assert_eq!(summary.captured, vec![ProfileType::Cpu]);

        assert_eq!(rx.try_recv().unwrap().tag(), "cpu");
        assert_eq!(rx.try_recv().unwrap().tag(), "metrics");

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Capture);
        assert_eq!(events[0].severity, EventSeverity::Error);
    }

    #[tokio::test]
    async fn test_full_channel_drops_and_reports() {
        let settings = Settings::new("api").with_cpu_profile_duration(Duration::from_millis(10));
        let (scheduler, _rx, events) = scheduler(settings, None, 1);

        let summary = scheduler.run_round(&CancellationToken::new()).await;
        // heap fits, cpu and metrics time out.
        assert_eq!(summary.dropped, 2);
        let events = events.lock().unwrap();
        assert!(events.iter().all(|e| e.kind == EventKind::Channel));
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_cuts_cpu_window_short() {
        let settings = Settings::new("api")
            .with_interval(Duration::from_secs(30))
            .with_cpu_profile_duration(Duration::from_secs(20));
        let (scheduler, mut rx, _) = scheduler(settings, None, 8);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(scheduler.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("scheduler did not stop")
            .unwrap();

        // The interrupted round still completed.
        let mut tags = Vec::new();
        while let Ok(item) = rx.try_recv() {
            tags.push(item.tag().to_string());
        }
        assert_eq!(tags, vec!["heap", "cpu", "metrics"]);
    }

    #[tokio::test]
    async fn test_back_to_back_rounds_get_distinct_file_names() {
        use crate::sink::{FileSink, Sink};

        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::new("api").with_cpu_profile_duration(Duration::from_millis(5));
        let (scheduler, mut rx, _) = scheduler(settings, None, 16);

        // Three short rounds normally land inside one wall-clock second.
        let cancel = CancellationToken::new();
        let mut seconds = Vec::new();
        for _ in 0..3 {
            seconds.push(scheduler.run_round(&cancel).await.started_at.timestamp());
        }
        assert!(
            seconds.windows(2).all(|w| w[1] > w[0]),
            "round seconds not increasing: {seconds:?}"
        );

        let sink = FileSink::new(dir.path());
        let mut written = 0;
        while let Ok(item) = rx.try_recv() {
            sink.write(&item).await.unwrap();
            written += 1;
        }
        assert_eq!(written, 9);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 9);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_rounds_start_at_fixed_rate() {
        let settings = Settings::new("api")
            .with_interval(Duration::from_secs(1))
            .with_cpu_profile_duration(Duration::from_millis(400));

        let starts = round_starts(settings, Vec::new(), Duration::from_millis(2700)).await;

        // Ticks at 0s, 1s and 2s; a fixed delay would drift to 1.4s gaps.
        assert_eq!(starts.len(), 3);
        for pair in starts.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(
                gap >= Duration::from_millis(900) && gap < Duration::from_millis(1200),
                "rounds started {gap:?} apart"
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_overrun_is_followed_by_one_immediate_round() {
        let settings = Settings::new("api")
            .with_interval(Duration::from_secs(1))
            .with_cpu_profile_duration(Duration::from_millis(100));

        // First round overruns two ticks; the next starts as soon as it ends
        // and the one after waits a full interval.
        let starts = round_starts(
            settings,
            vec![Duration::from_millis(2500)],
            Duration::from_millis(3800),
        )
        .await;

        assert_eq!(starts.len(), 3, "missed ticks were replayed");
        let overrun = starts[1] - starts[0];
        assert!(
            overrun >= Duration::from_millis(2500) && overrun < Duration::from_millis(2800),
            "round after overrun started {overrun:?} after the previous one"
        );
        let next = starts[2] - starts[1];
        assert!(
            next >= Duration::from_millis(900) && next < Duration::from_millis(1200),
            "rounds started {next:?} apart after the overrun"
        );
    }
}
