//! Pipeline Integration Tests for Ferroprof
//!
//! Drive the whole profiler (scheduler, channel, dispatcher, sweeper) with
//! fake capture facilities against a temp directory or a local agent.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use ferroprof::capture::wait_window;
use ferroprof::sink::parse_file_name;
use ferroprof::{
    AgentPayload, CaptureError, Event, EventKind, MemoryStats, MetricsSource, ProfileSource,
    ProfileType, Profiler, ProfilerState, RuntimeCounters, Settings,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Test Helpers
// =============================================================================

/// Capture facility returning fixed payloads and recording CPU windows.
#[derive(Clone, Default)]
struct FakeProfiles {
    fail: Option<ProfileType>,
    windows: Arc<Mutex<Vec<(Instant, Instant)>>>,
}

impl ProfileSource for FakeProfiles {
    fn capture(&self, kind: ProfileType) -> Result<Vec<u8>, CaptureError> {
        if self.fail == Some(kind) {
            return Err(CaptureError::Profiler(format!("{kind} exploded")));
        }
        Ok(format!("{kind}-profile").into_bytes())
    }

    fn capture_cpu(
        &self,
        window: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, CaptureError> {
        let start = Instant::now();
        wait_window(window, cancel);
        self.windows.lock().unwrap().push((start, Instant::now()));
        Ok(b"cpu-profile".to_vec())
    }
}

struct FakeMetrics;

impl MetricsSource for FakeMetrics {
    fn sample(&self) -> RuntimeCounters {
        RuntimeCounters {
            task_count: 42,
            memory: MemoryStats {
                resident_bytes: 1 << 20,
                ..MemoryStats::default()
            },
        }
    }
}

type Events = Arc<Mutex<Vec<Event>>>;

fn profiler(settings: Settings, profiles: FakeProfiles) -> (Profiler, Events) {
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&events);
    let profiler = Profiler::new(settings)
        .expect("valid settings")
        .with_profile_source(profiles)
        .with_metrics_source(FakeMetrics)
        .with_reporter(move |e: Event| recorded.lock().unwrap().push(e));
    (profiler, events)
}

/// File names in `dir` grouped by type tag.
fn files_by_tag(dir: &Path) -> BTreeMap<String, Vec<String>> {
    let mut by_tag: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for entry in std::fs::read_dir(dir).expect("profiles dir exists") {
        let name = entry.unwrap().file_name().to_string_lossy().into_owned();
        let parsed = parse_file_name(&name).unwrap_or_else(|| panic!("unexpected file {name}"));
        by_tag.entry(parsed.tag).or_default().push(name);
    }
    by_tag
}

/// Start a local agent collecting pushed payloads; returns its URL.
async fn start_test_agent() -> (String, Arc<Mutex<Vec<AgentPayload>>>) {
    async fn receive(
        State(received): State<Arc<Mutex<Vec<AgentPayload>>>>,
        Json(payload): Json<AgentPayload>,
    ) {
        received.lock().unwrap().push(payload);
    }

    let received = Arc::new(Mutex::new(Vec::new()));
    let router = Router::new()
        .route("/profile", post(receive))
        .with_state(Arc::clone(&received));

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let addr = listener.local_addr().expect("Failed to get local addr");

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    // Give server time to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://{}/profile", addr), received)
}

// =============================================================================
// File Output
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_file_mode_writes_artifacts_and_samples_per_round() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::new("api")
        .with_interval(Duration::from_secs(1))
        .with_cpu_profile_duration(Duration::from_millis(300))
        .write_to_dir(dir.path());

    let (profiler, events) = profiler(settings, FakeProfiles::default());
    let handle = profiler.start().unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    let stats = handle.shutdown().await.unwrap();

    assert!(stats.rounds_completed >= 2, "rounds: {}", stats.rounds_completed);
    let rounds = stats.rounds_completed as usize;

    let files = files_by_tag(dir.path());
    assert_eq!(files.keys().collect::<Vec<_>>(), vec!["cpu", "heap", "metrics"]);
    assert_eq!(files["cpu"].len(), rounds);
    assert_eq!(files["heap"].len(), rounds);
    assert_eq!(files["metrics"].len(), rounds);

    // Every file carries this service and process.
    let pid = std::process::id();
    for name in files.values().flatten() {
        let parsed = parse_file_name(name).unwrap();
        assert_eq!(parsed.service, "api");
        assert_eq!(parsed.pid, pid);
    }

    let sample_path = dir.path().join(&files["metrics"][0]);
    let sample: serde_json::Value =
        serde_json::from_slice(&std::fs::read(sample_path).unwrap()).unwrap();
    assert_eq!(sample["task_count"], 42);

    assert!(
        events
            .lock()
            .unwrap()
            .iter()
            .all(|e| e.kind == EventKind::System),
        "unexpected failure events"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_capture_keeps_other_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::new("api")
        .with_interval(Duration::from_secs(5))
        .with_cpu_profile_duration(Duration::from_millis(100))
        .enable_mutex_profile()
        .write_to_dir(dir.path());

    let profiles = FakeProfiles {
        fail: Some(ProfileType::Mutex),
        ..FakeProfiles::default()
    };
    let (profiler, events) = profiler(settings, profiles);
    let handle = profiler.start().unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    let stats = handle.shutdown().await.unwrap();

    assert_eq!(stats.rounds_completed, 1);
    assert_eq!(stats.capture_failures, 1);

    let files = files_by_tag(dir.path());
    assert!(!files.contains_key("mutex"));
    assert_eq!(files["heap"].len(), 1);
    assert_eq!(files["cpu"].len(), 1);
    assert_eq!(files["metrics"].len(), 1);

    let events = events.lock().unwrap();
    let failures: Vec<_> = events
        .iter()
        .filter(|e| e.kind == EventKind::Capture)
        .collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].message.contains("mutex"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_immediate_shutdown_never_splits_a_round() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::new("api")
        .with_cpu_profile_duration(Duration::from_secs(10))
        .write_to_dir(dir.path());

    let (profiler, _) = profiler(settings, FakeProfiles::default());
    let handle = profiler.start().unwrap();
    let stats = handle.shutdown().await.unwrap();

    assert!(stats.rounds_completed <= 1);
    let rounds = stats.rounds_completed as usize;
    if rounds == 0 {
        assert!(!dir.path().exists() || files_by_tag(dir.path()).is_empty());
        return;
    }

    let files = files_by_tag(dir.path());
    assert_eq!(files.get("metrics").map_or(0, Vec::len), rounds);
    assert_eq!(files.get("heap").map_or(0, Vec::len), rounds);
    assert_eq!(files.get("cpu").map_or(0, Vec::len), rounds);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cpu_windows_never_overlap() {
    let dir = tempfile::tempdir().unwrap();
    // The window is longer than the interval, so rounds run back to back.
    let settings = Settings::new("api")
        .with_interval(Duration::from_secs(1))
        .with_cpu_profile_duration(Duration::from_millis(1200))
        .write_to_dir(dir.path());

    let profiles = FakeProfiles::default();
    let windows = Arc::clone(&profiles.windows);
    let (profiler, _) = profiler(settings, profiles);
    let handle = profiler.start().unwrap();
    tokio::time::sleep(Duration::from_millis(3000)).await;
    handle.shutdown().await.unwrap();

    let windows = windows.lock().unwrap();
    assert!(windows.len() >= 2, "windows: {}", windows.len());
    for pair in windows.windows(2) {
        assert!(pair[1].0 >= pair[0].1, "CPU windows overlap");
    }

    // Back-to-back rounds still get distinct file names.
    let files = files_by_tag(dir.path());
    assert_eq!(files["cpu"].len(), windows.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_collection_then_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::new("api")
        .with_cpu_profile_duration(Duration::from_millis(50))
        .write_to_dir(dir.path());

    let (profiler, _) = profiler(settings, FakeProfiles::default());
    let handle = profiler.start().unwrap();
    assert_eq!(handle.state(), ProfilerState::Running);

    tokio::time::sleep(Duration::from_millis(300)).await;
    handle.stop_collection();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(handle.state(), ProfilerState::Stopped);

    let stats = handle.shutdown().await.unwrap();
    assert_eq!(stats.rounds_completed, 1);
    assert_eq!(stats.dispatched, 3);
}

// =============================================================================
// Network Output
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_network_mode_pushes_to_agent() {
    let (url, received) = start_test_agent().await;
    let settings = Settings::new("api")
        .with_interval(Duration::from_secs(5))
        .with_cpu_profile_duration(Duration::from_millis(100))
        .with_target_url(url);

    let (profiler, _) = profiler(settings, FakeProfiles::default());
    let handle = profiler.start().unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    let stats = handle.shutdown().await.unwrap();

    assert_eq!(stats.rounds_completed, 1);
    assert_eq!(stats.dispatched, 3);

    let received = received.lock().unwrap();
    let kinds: Vec<_> = received.iter().map(|p| p.kind.as_str()).collect();
    assert_eq!(kinds, vec!["heap", "cpu", "metrics"]);

    let heap = &received[0];
    assert_eq!(heap.service, "api");
    assert_eq!(heap.pid, std::process::id());
    assert_eq!(heap.decode_data().unwrap().unwrap(), b"heap-profile");

    let sample = &received[2];
    assert_eq!(sample.task_count, Some(42));
    assert!(sample.data.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unreachable_agent_reports_and_keeps_collecting() {
    let settings = Settings::new("api")
        .with_interval(Duration::from_secs(1))
        .with_cpu_profile_duration(Duration::from_millis(100))
        .with_request_timeout(Duration::from_millis(500))
        .with_target_url("http://127.0.0.1:9/profile");

    let (profiler, events) = profiler(settings, FakeProfiles::default());
    let handle = profiler.start().unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    let stats = handle.shutdown().await.unwrap();

    assert!(stats.rounds_completed >= 2);
    assert_eq!(stats.dispatched, 0);
    assert!(stats.dispatch_failures >= 6);

    let events = events.lock().unwrap();
    let dispatch_errors = events
        .iter()
        .filter(|e| e.kind == EventKind::Dispatch)
        .count();
    assert_eq!(dispatch_errors as u64, stats.dispatch_failures);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unreachable_agent_falls_back_to_files() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::new("api")
        .with_interval(Duration::from_secs(5))
        .with_cpu_profile_duration(Duration::from_millis(100))
        .with_request_timeout(Duration::from_millis(500))
        .with_target_url("http://127.0.0.1:9/profile")
        .with_network_fallback(true)
        .with_profiles_dir(dir.path());

    let (profiler, _) = profiler(settings, FakeProfiles::default());
    let handle = profiler.start().unwrap();
    tokio::time::sleep(Duration::from_millis(1000)).await;
    let stats = handle.shutdown().await.unwrap();

    assert_eq!(stats.rounds_completed, 1);
    assert_eq!(stats.fallback_writes, 3);

    let files = files_by_tag(dir.path());
    assert_eq!(files.values().map(Vec::len).sum::<usize>(), 3);
}
