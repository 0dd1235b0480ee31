//! Output dispatcher.
//!
//! Consumes the output channel and writes each item to the configured sink,
//! one attempt per item. Failures are reported and, when a fallback file
//! sink is configured, the item is written there instead; otherwise it is
//! dropped. The dispatcher exits when the channel closes (the scheduler has
//! stopped and everything queued was handled) or when told to stop, in which
//! case whatever is still queued is drained first.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::capture::Collected;
use crate::event::{Event, EventKind, EventSeverity, SharedReporter};
use crate::pipeline::{OutputReceiver, PipelineStats};
use crate::sink::{DispatchError, FileSink, Sink};

/// Writes collected items to a sink.
pub struct Dispatcher {
    rx: OutputReceiver,
    primary: Arc<dyn Sink>,
    fallback: Option<FileSink>,
    reporter: SharedReporter,
    stats: Arc<PipelineStats>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("primary", &self.primary.name())
            .field("fallback", &self.fallback.as_ref().map(FileSink::dir))
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        rx: OutputReceiver,
        primary: Arc<dyn Sink>,
        reporter: SharedReporter,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            rx,
            primary,
            fallback: None,
            reporter,
            stats,
        }
    }

    /// Write items the primary sink fails on to `fallback`.
    pub fn with_fallback(mut self, fallback: FileSink) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Dispatch until the channel closes or `stop` fires.
    pub async fn run(mut self, stop: CancellationToken) {
        tracing::info!(sink = %self.primary.name(), "Dispatcher started");

        loop {
            tokio::select! {
                biased;
                item = self.rx.recv() => match item {
                    Some(item) => self.dispatch(item).await,
                    None => break,
                },
                _ = stop.cancelled() => {
                    self.drain().await;
                    break;
                }
            }
        }

        let stats = self.stats.snapshot();
        tracing::info!(
            dispatched = stats.dispatched,
            failed = stats.dispatch_failures,
            "Dispatcher stopped"
        );
    }

    async fn drain(&mut self) {
        let mut drained = 0usize;
        while let Ok(item) = self.rx.try_recv() {
            self.dispatch(item).await;
            drained += 1;
        }
        if drained > 0 {
            tracing::debug!(drained, "Drained queued items on stop");
        }
    }

    /// Deliver one item: primary sink, then the fallback if configured.
    pub async fn dispatch(&self, item: Collected) {
        let start = Instant::now();
        let err = match self.primary.write(&item).await {
            Ok(()) => {
                self.stats.record_dispatch();
                tracing::debug!(
                    sink = %self.primary.name(),
                    kind = %item.tag(),
                    duration_ms = start.elapsed().as_millis(),
                    "Item dispatched"
                );
                return;
            }
            Err(e) => e,
        };

        self.stats.record_dispatch_failure();
        tracing::error!(sink = %self.primary.name(), kind = %item.tag(), error = %err, "Dispatch failed");
        self.emit_error(self.primary.name(), &item, &err);

        let Some(fallback) = &self.fallback else {
            return;
        };
        match fallback.write(&item).await {
            Ok(()) => {
                self.stats.record_fallback();
                tracing::info!(
                    kind = %item.tag(),
                    dir = %fallback.dir().display(),
                    "Item written to fallback directory"
                );
            }
            Err(e) => {
                tracing::error!(kind = %item.tag(), error = %e, "Fallback write failed");
                self.emit_error(fallback.name(), &item, &e);
            }
        }
    }

    fn emit_error(&self, sink: &str, item: &Collected, err: &DispatchError) {
        self.reporter.report(
            Event::new(
                format!("dispatcher.{sink}"),
                EventKind::Dispatch,
                EventSeverity::Error,
                format!("Dispatch of {} item failed: {err}", item.tag()),
            )
            .with_payload(serde_json::json!({
                "sink": sink,
                "type": item.tag(),
                "timestamp": item.timestamp().timestamp(),
                "error": err.to_string(),
            })),
        );
    }
}
