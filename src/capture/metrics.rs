//! Process metrics sampler backed by `sysinfo` and tokio runtime metrics.

use std::sync::Mutex;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::capture::{MemoryStats, MetricsSource, RuntimeCounters};

/// Reads memory and task counters of the current process.
pub struct ProcessMetricsSource {
    system: Mutex<System>,
    pid: Pid,
}

impl ProcessMetricsSource {
    /// Create a sampler for the current process.
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: Pid::from_u32(std::process::id()),
        }
    }

    fn memory(&self) -> MemoryStats {
        let mut stats = MemoryStats {
            os_threads: os_thread_count(),
            ..MemoryStats::default()
        };

        let Ok(mut system) = self.system.lock() else {
            tracing::warn!("Metrics sampler lock poisoned, reporting thread count only");
            return stats;
        };
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::nothing().with_memory().with_cpu(),
        );
        if let Some(process) = system.process(self.pid) {
            stats.resident_bytes = process.memory();
            stats.virtual_bytes = process.virtual_memory();
            stats.cpu_usage = process.cpu_usage();
        }
        stats
    }
}

impl Default for ProcessMetricsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProcessMetricsSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessMetricsSource")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl MetricsSource for ProcessMetricsSource {
    fn sample(&self) -> RuntimeCounters {
        let memory = self.memory();
        // Outside a runtime there are no tasks to count; fall back to threads.
        let task_count = tokio::runtime::Handle::try_current()
            .map(|h| h.metrics().num_alive_tasks())
            .unwrap_or_else(|_| memory.os_threads.unwrap_or(1));

        RuntimeCounters { task_count, memory }
    }
}

#[cfg(target_os = "linux")]
fn os_thread_count() -> Option<usize> {
    std::fs::read_dir("/proc/self/task")
        .ok()
        .map(|entries| entries.count())
}

#[cfg(not(target_os = "linux"))]
fn os_thread_count() -> Option<usize> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_outside_runtime() {
        let source = ProcessMetricsSource::new();
        let counters = source.sample();
        assert!(counters.task_count >= 1);
    }

    #[tokio::test]
    async fn test_sample_counts_runtime_tasks() {
        let source = ProcessMetricsSource::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _ = rx.await;
        });

        let counters = source.sample();
        assert!(counters.task_count >= 1);
        #[cfg(target_os = "linux")]
        assert!(counters.memory.resident_bytes > 0);

        tx.send(()).unwrap();
        task.await.unwrap();
    }
}
