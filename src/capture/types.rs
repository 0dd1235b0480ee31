//! Core data types flowing through the pipeline.
//!
//! - [`ProfileType`]: the catalog of capturable profile kinds
//! - [`Identity`]: process metadata stamped on everything captured
//! - [`CapturedArtifact`]: one opaque profile blob from one round
//! - [`MetricsSample`]: process counters sampled once per round
//! - [`Collected`]: the item type carried by the output channel

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// File extension / wire tag used for metrics samples.
pub const METRICS_TAG: &str = "metrics";

/// Kind of runtime profile.
///
/// Declaration order is the capture order within a round: instantaneous
/// snapshots first, the blocking CPU window last.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProfileType {
    /// Stacks that led to the creation of new OS threads.
    ThreadCreate,
    /// Stacks that blocked on synchronization primitives.
    Block,
    /// Holders of contended locks.
    Mutex,
    /// Stacks of all live tasks / threads.
    Goroutine,
    /// Sampling of all past allocations.
    Allocs,
    /// Sampling of live heap allocations.
    Heap,
    /// CPU time, collected over a blocking window.
    Cpu,
}

impl ProfileType {
    /// Every supported profile type, in capture order.
    pub const ALL: [ProfileType; 7] = [
        ProfileType::ThreadCreate,
        ProfileType::Block,
        ProfileType::Mutex,
        ProfileType::Goroutine,
        ProfileType::Allocs,
        ProfileType::Heap,
        ProfileType::Cpu,
    ];

    /// Whether capturing this type blocks for a window instead of snapshotting.
    pub fn is_windowed(&self) -> bool {
        matches!(self, Self::Cpu)
    }
}

/// Process identity attached to every artifact and sample at capture time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Service name configured by the operator.
    pub service: String,
    /// OS process id.
    pub pid: u32,
    /// Runtime/agent version string.
    pub runtime_version: String,
    /// Host the process runs on.
    pub hostname: String,
}

impl Identity {
    /// Build the identity of the current process.
    ///
    /// The hostname falls back to `"unknown"` when it cannot be resolved.
    pub fn current(service: impl Into<String>, runtime_version: impl Into<String>) -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            service: service.into(),
            pid: std::process::id(),
            runtime_version: runtime_version.into(),
            hostname,
        }
    }
}

/// One captured profile. Owned by whichever sink consumes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedArtifact {
    /// Wall-clock start of the round that captured this artifact.
    pub timestamp: DateTime<Utc>,
    /// Profile kind that produced the payload.
    pub profile_type: ProfileType,
    /// Identity metadata, immutable after capture.
    pub identity: Identity,
    /// Opaque profile bytes.
    pub payload: Vec<u8>,
}

/// Process memory counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Resident set size in bytes.
    pub resident_bytes: u64,
    /// Virtual memory size in bytes.
    pub virtual_bytes: u64,
    /// Number of OS threads, when the platform reports it.
    pub os_threads: Option<usize>,
    /// CPU usage percentage since the previous sample.
    pub cpu_usage: f32,
}

/// Raw counters read by a metrics source, before identity is attached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeCounters {
    /// Live async tasks (or threads outside an async runtime).
    pub task_count: usize,
    /// Memory statistics.
    pub memory: MemoryStats,
}

/// Process metrics sampled once per round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSample {
    /// Wall-clock start of the round that sampled these counters.
    pub timestamp: DateTime<Utc>,
    /// Identity metadata.
    #[serde(flatten)]
    pub identity: Identity,
    /// Live async tasks (or threads outside an async runtime).
    pub task_count: usize,
    /// Memory statistics.
    pub memory: MemoryStats,
}

/// Item carried by the output channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Collected {
    /// A captured profile.
    Profile(CapturedArtifact),
    /// The round's metrics sample.
    Metrics(MetricsSample),
}

impl Collected {
    /// Type tag used in file names and wire payloads.
    pub fn tag(&self) -> &str {
        match self {
            Self::Profile(a) => a.profile_type.as_ref(),
            Self::Metrics(_) => METRICS_TAG,
        }
    }

    /// Round timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Profile(a) => a.timestamp,
            Self::Metrics(m) => m.timestamp,
        }
    }

    /// Identity metadata.
    pub fn identity(&self) -> &Identity {
        match self {
            Self::Profile(a) => &a.identity,
            Self::Metrics(m) => &m.identity,
        }
    }
}
