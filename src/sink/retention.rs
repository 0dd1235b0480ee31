//! Retention sweeper for the profiles directory.
//!
//! Runs on its own timer, independent of collection rounds. Only files whose
//! names follow the naming convention are considered; their age comes from
//! the timestamp embedded in the name. Temporary files from in-flight writes
//! never match the convention, so a file is never removed mid-write.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::event::{Event, EventKind, EventSeverity, SharedReporter};
use crate::pipeline::PipelineStats;
use crate::sink::RetentionError;
use crate::sink::file::parse_file_name;

const EVENT_SOURCE: &str = "retention";

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Files matching the naming convention.
    pub scanned: usize,
    /// Files removed.
    pub removed: Vec<PathBuf>,
    /// Files that could not be removed.
    pub failed: usize,
}

/// Whether a file captured at `timestamp` has outlived `max_age` at `now`.
pub fn is_expired(timestamp: i64, max_age: Duration, now: DateTime<Utc>) -> bool {
    let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
    now.timestamp().saturating_sub(timestamp) > max_age
}

/// Periodically deletes expired profile files.
pub struct RetentionSweeper {
    dir: PathBuf,
    max_age: Duration,
    period: Duration,
    reporter: SharedReporter,
    stats: Arc<PipelineStats>,
}

impl std::fmt::Debug for RetentionSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionSweeper")
            .field("dir", &self.dir)
            .field("max_age", &self.max_age)
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}

impl RetentionSweeper {
    /// Create a sweeper for `dir`.
    pub fn new(
        dir: impl AsRef<Path>,
        max_age: Duration,
        period: Duration,
        reporter: SharedReporter,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            max_age,
            period,
            reporter,
            stats,
        }
    }

    /// Sweep on every tick (the first one immediately) until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(dir = %self.dir.display(), max_age = ?self.max_age, "Retention sweeper started");

        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.sweep_at(Utc::now()).await;
                    if !report.removed.is_empty() || report.failed > 0 {
                        tracing::info!(
                            scanned = report.scanned,
                            removed = report.removed.len(),
                            failed = report.failed,
                            "Retention sweep finished"
                        );
                    }
                }
            }
        }

        tracing::info!("Retention sweeper stopped");
    }

    /// Run one sweep treating `now` as the current time.
    ///
    /// Failures are reported and skipped; the sweep always covers every file.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(dir = %self.dir.display(), "Profiles directory does not exist yet");
                return report;
            }
            Err(e) => {
                self.emit_error(&RetentionError::List {
                    dir: self.dir.clone(),
                    source: e,
                });
                return report;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    self.emit_error(&RetentionError::List {
                        dir: self.dir.clone(),
                        source: e,
                    });
                    break;
                }
            };

            let name = entry.file_name();
            let Some(parsed) = name.to_str().and_then(parse_file_name) else {
                continue;
            };
            report.scanned += 1;

            if !is_expired(parsed.timestamp, self.max_age, now) {
                continue;
            }

            let path = entry.path();
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "Expired profile removed");
                    self.stats.record_removal();
                    report.removed.push(path);
                }
                // Already gone (e.g., removed by an operator); nothing to do.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    self.stats.record_removal_failure();
                    report.failed += 1;
                    self.emit_error(&RetentionError::Remove { path, source: e });
                }
            }
        }

        report
    }

    fn emit_error(&self, err: &RetentionError) {
        self.reporter.report(
            Event::new(
                EVENT_SOURCE,
                EventKind::Retention,
                EventSeverity::Error,
                format!("Retention sweep error: {err}"),
            )
            .with_payload(serde_json::json!({
                "dir": self.dir.display().to_string(),
                "error": err.to_string(),
            })),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TracingReporter;

    fn sweeper(dir: &Path, max_age: Duration) -> (RetentionSweeper, Arc<PipelineStats>) {
        let stats = Arc::new(PipelineStats::new());
        let sweeper = RetentionSweeper::new(
            dir,
            max_age,
            Duration::from_secs(60),
            Arc::new(TracingReporter),
            Arc::clone(&stats),
        );
        (sweeper, stats)
    }

    #[test]
    fn test_is_expired_boundary() {
        let now = Utc::now();
        let max_age = Duration::from_secs(900);
        assert!(is_expired(now.timestamp() - 901, max_age, now));
        assert!(!is_expired(now.timestamp() - 900, max_age, now));
        assert!(!is_expired(now.timestamp() + 10, max_age, now));
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let ts = now.timestamp();

        let old = dir.path().join(format!("api_{}_7.heap", ts - 2000));
        let recent = dir.path().join(format!("api_{}_7.heap", ts - 500));
        let fresh = dir.path().join(format!("api_{}_7.cpu", ts - 100));
        for path in [&old, &recent, &fresh] {
            std::fs::write(path, b"data").unwrap();
        }

        let (sweeper, stats) = sweeper(dir.path(), Duration::from_secs(900));
        let report = sweeper.sweep_at(now).await;

        assert_eq!(report.scanned, 3);
        assert_eq!(report.removed, vec![old.clone()]);
        assert!(!old.exists());
        assert!(recent.exists());
        assert!(fresh.exists());
        assert_eq!(stats.snapshot().files_removed, 1);
    }

    #[tokio::test]
    async fn test_sweep_ignores_foreign_and_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let ancient = now.timestamp() - 100_000;

        let foreign = dir.path().join("README.md");
        let temp = dir.path().join(format!(".api_{ancient}_7.heap.tmp"));
        std::fs::write(&foreign, b"keep").unwrap();
        std::fs::write(&temp, b"in flight").unwrap();

        let (sweeper, _) = sweeper(dir.path(), Duration::from_secs(1));
        let report = sweeper.sweep_at(now).await;

        assert_eq!(report.scanned, 0);
        assert!(foreign.exists());
        assert!(temp.exists());
    }

    #[tokio::test]
    async fn test_sweep_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (sweeper, _) = sweeper(&dir.path().join("absent"), Duration::from_secs(1));
        assert_eq!(sweeper.sweep_at(Utc::now()).await, SweepReport::default());
    }

    #[tokio::test]
    async fn test_run_sweeps_immediately_and_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir
            .path()
            .join(format!("api_{}_7.metrics", Utc::now().timestamp() - 5000));
        std::fs::write(&old, b"{}").unwrap();

        let (sweeper, stats) = sweeper(dir.path(), Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(sweeper.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        task.await.unwrap();

        assert!(!old.exists());
        assert_eq!(stats.snapshot().files_removed, 1);
    }
}
