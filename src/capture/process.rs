//! Profile source for the current process.
//!
//! - `cpu`: sampled with `pprof`, encoded as gzip-compressed pprof protobuf (unix)
//! - `heap`: jemalloc's sampled in-use allocations as pprof (Linux). The
//!   process must use `tikv_jemallocator::Jemalloc` as its global allocator
//!   and export a `_rjem_malloc_conf` with `prof:true`, as the `ferroprof`
//!   binary does. Otherwise heap is [`CaptureError::Unsupported`].
//! - `goroutine` / `threadcreate`: text listing of OS threads from `/proc/self/task` (Linux)
//! - everything else: [`CaptureError::Unsupported`]; embedders can provide
//!   their own [`ProfileSource`]

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::capture::traits::wait_window;
use crate::capture::{CaptureError, ProfileSource, ProfileType};

/// Default CPU sampling frequency in Hz.
pub const DEFAULT_CPU_FREQUENCY: i32 = 99;

/// Libraries whose frames are dropped from CPU samples.
#[cfg(unix)]
const CPU_BLOCKLIST: [&str; 4] = ["libc", "libgcc", "pthread", "vdso"];

/// Captures profiles of the process it runs in.
#[derive(Debug, Clone)]
pub struct ProcessProfileSource {
    frequency: i32,
}

impl ProcessProfileSource {
    /// Create a source sampling CPU at [`DEFAULT_CPU_FREQUENCY`].
    pub fn new() -> Self {
        Self {
            frequency: DEFAULT_CPU_FREQUENCY,
        }
    }

    /// Set the CPU sampling frequency in Hz.
    pub fn with_frequency(mut self, frequency: i32) -> Self {
        self.frequency = frequency.max(1);
        self
    }
}

impl Default for ProcessProfileSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileSource for ProcessProfileSource {
    fn capture(&self, kind: ProfileType) -> Result<Vec<u8>, CaptureError> {
        match kind {
            ProfileType::Heap => heap_profile(),
            ProfileType::Goroutine | ProfileType::ThreadCreate => thread_listing(kind),
            ProfileType::Cpu => Err(CaptureError::Profiler(
                "cpu profile requires a capture window".to_string(),
            )),
            other => Err(CaptureError::Unsupported(other)),
        }
    }

    fn capture_cpu(
        &self,
        window: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, CaptureError> {
        cpu_profile(self.frequency, window, cancel)
    }
}

#[cfg(unix)]
fn cpu_profile(
    frequency: i32,
    window: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, CaptureError> {
    use std::io::Write;

    use flate2::{Compression, write::GzEncoder};
    use pprof::protos::Message;

    let guard = pprof::ProfilerGuardBuilder::default()
        .frequency(frequency)
        .blocklist(&CPU_BLOCKLIST[..])
        .build()
        .map_err(|e| CaptureError::Profiler(format!("failed to start cpu profiler: {e}")))?;

    let observed = wait_window(window, cancel);
    if observed < window {
        tracing::debug!(?observed, ?window, "CPU window closed early by cancellation");
    }

    let report = guard
        .report()
        .build()
        .map_err(|e| CaptureError::Profiler(format!("failed to build cpu report: {e}")))?;
    let profile = report
        .pprof()
        .map_err(|e| CaptureError::Profiler(format!("failed to encode cpu profile: {e}")))?;

    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(&profile.encode_to_vec())?;
    Ok(gz.finish()?)
}

#[cfg(not(unix))]
fn cpu_profile(
    _frequency: i32,
    _window: Duration,
    _cancel: &CancellationToken,
) -> Result<Vec<u8>, CaptureError> {
    Err(CaptureError::Unsupported(ProfileType::Cpu))
}

#[cfg(target_os = "linux")]
fn heap_profile() -> Result<Vec<u8>, CaptureError> {
    // `None` unless jemalloc is the allocator and was started with `prof:true`.
    let Some(ctl) = jemalloc_pprof::PROF_CTL.as_ref() else {
        return Err(CaptureError::Unsupported(ProfileType::Heap));
    };

    let mut ctl = ctl.blocking_lock();
    if !ctl.activated() {
        return Err(CaptureError::Profiler("jemalloc heap profiling is not active".to_string()));
    }
    ctl.dump_pprof()
        .map_err(|e| CaptureError::Profiler(format!("failed to dump heap profile: {e}")))
}

#[cfg(not(target_os = "linux"))]
fn heap_profile() -> Result<Vec<u8>, CaptureError> {
    Err(CaptureError::Unsupported(ProfileType::Heap))
}

#[cfg(target_os = "linux")]
fn thread_listing(kind: ProfileType) -> Result<Vec<u8>, CaptureError> {
    let mut threads = Vec::new();
    for entry in std::fs::read_dir("/proc/self/task")? {
        let entry = entry?;
        let tid = entry.file_name().to_string_lossy().into_owned();
        // Threads can exit between listing and reading their name.
        let name = std::fs::read_to_string(entry.path().join("comm"))
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default();
        threads.push((tid, name));
    }
    threads.sort_by(|a, b| a.0.cmp(&b.0));

    let mut out = format!("{} profile: total {}\n", kind, threads.len());
    for (tid, name) in threads {
        out.push_str(&format!("{tid}\t{name}\n"));
    }
    Ok(out.into_bytes())
}

#[cfg(not(target_os = "linux"))]
fn thread_listing(kind: ProfileType) -> Result<Vec<u8>, CaptureError> {
    Err(CaptureError::Unsupported(kind))
}
