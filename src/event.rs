//! Structured profiler events and the reporting hook.
//!
//! Every recoverable failure in the pipeline (a capture that failed, a push
//! the agent rejected, a file the sweeper could not delete) is turned into an
//! [`Event`] and handed to the [`Reporter`] injected at construction time.
//! The default [`TracingReporter`] forwards events to `tracing`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// A structured event emitted by one of the pipeline components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event timestamp (UTC).
    pub ts: DateTime<Utc>,
    /// Emitting component (e.g., "scheduler", "dispatcher.file").
    pub source: String,
    /// Which stage of the pipeline produced the event.
    pub kind: EventKind,
    /// Delivery priority/urgency.
    pub severity: EventSeverity,
    /// Short human-readable description.
    pub message: String,
    /// Context snapshot as JSON.
    pub payload: Option<serde_json::Value>,
}

impl Event {
    /// Create an event stamped with the current time and no payload.
    pub fn new(
        source: impl Into<String>,
        kind: EventKind,
        severity: EventSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            ts: Utc::now(),
            source: source.into(),
            kind,
            severity,
            message: message.into(),
            payload: None,
        }
    }

    /// Attach a JSON payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Pipeline stage an event belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum EventKind {
    /// Lifecycle transitions (start, stop, shutdown).
    System,
    /// Profile or metrics capture.
    Capture,
    /// Output channel handoff.
    Channel,
    /// Sink write or push.
    Dispatch,
    /// Retention sweep.
    Retention,
}

/// Event severity classification.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum EventSeverity {
    /// Verbose diagnostic information.
    Debug,
    /// Normal operational information.
    Info,
    /// Potential issue that may require attention.
    Warn,
    /// Error condition requiring investigation.
    Error,
}

/// Logging hook receiving every event the pipeline emits.
///
/// Implementations must be cheap and non-blocking: they are called from the
/// scheduler and dispatcher tasks.
pub trait Reporter: Send + Sync + 'static {
    /// Handle one event.
    fn report(&self, event: Event);
}

impl<F> Reporter for F
where
    F: Fn(Event) + Send + Sync + 'static,
{
    fn report(&self, event: Event) {
        self(event)
    }
}

/// Shared reporter handle passed to each component.
pub type SharedReporter = Arc<dyn Reporter>;

/// Reporter that forwards events to `tracing` at the matching level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, event: Event) {
        let payload = event
            .payload
            .as_ref()
            .map(|p| p.to_string())
            .unwrap_or_default();
        match event.severity {
            EventSeverity::Debug => {
                tracing::debug!(source = %event.source, kind = %event.kind, %payload, "{}", event.message)
            }
            EventSeverity::Info => {
                tracing::info!(source = %event.source, kind = %event.kind, %payload, "{}", event.message)
            }
            EventSeverity::Warn => {
                tracing::warn!(source = %event.source, kind = %event.kind, %payload, "{}", event.message)
            }
            EventSeverity::Error => {
                tracing::error!(source = %event.source, kind = %event.kind, %payload, "{}", event.message)
            }
        }
    }
}
