//! Network sink pushing items to a collection agent over HTTP.
//!
//! Each item is POSTed as one JSON document ([`AgentPayload`]). The
//! envelope keys follow the agent's intake contract: identity as flat
//! `pid`/`service`/`go_version`/`hostname` keys, base64 profile bytes in
//! `data`, and `num_goroutines`/`mem_stats` on metrics samples. The version
//! key carries [`Identity::runtime_version`], `num_goroutines` the live
//! task count, and `mem_stats` a [`MemoryStats`] object. Deserialization
//! also accepts the crate's own field names.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::capture::{Collected, Identity, MemoryStats};
use crate::sink::{DispatchError, Sink};

/// JSON document sent to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPayload {
    /// Unix timestamp (seconds) of the capturing round.
    pub timestamp: i64,
    /// Profile tag or `metrics`.
    #[serde(rename = "type")]
    pub kind: String,
    pub pid: u32,
    pub service: String,
    #[serde(rename = "go_version", alias = "runtime_version")]
    pub runtime_version: String,
    pub hostname: String,
    /// Base64 profile bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(
        rename = "num_goroutines",
        alias = "task_count",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub task_count: Option<usize>,
    #[serde(
        rename = "mem_stats",
        alias = "memory",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub memory: Option<MemoryStats>,
}

impl AgentPayload {
    /// Build the wire document for an item.
    pub fn from_collected(item: &Collected) -> Self {
        let identity = item.identity();
        let mut payload = Self {
            timestamp: item.timestamp().timestamp(),
            kind: item.tag().to_string(),
            pid: identity.pid,
            service: identity.service.clone(),
            runtime_version: identity.runtime_version.clone(),
            hostname: identity.hostname.clone(),
            data: None,
            task_count: None,
            memory: None,
        };
        match item {
            Collected::Profile(artifact) => {
                payload.data = Some(STANDARD.encode(&artifact.payload));
            }
            Collected::Metrics(sample) => {
                payload.task_count = Some(sample.task_count);
                payload.memory = Some(sample.memory.clone());
            }
        }
        payload
    }

    /// Identity of the process that produced this document.
    pub fn identity(&self) -> Identity {
        Identity {
            service: self.service.clone(),
            pid: self.pid,
            runtime_version: self.runtime_version.clone(),
            hostname: self.hostname.clone(),
        }
    }

    /// Decode the profile bytes, if this document carries any.
    pub fn decode_data(&self) -> Option<Result<Vec<u8>, base64::DecodeError>> {
        self.data.as_ref().map(|d| STANDARD.decode(d))
    }
}

/// Pushes items to the collection agent.
#[derive(Debug, Clone)]
pub struct NetworkSink {
    client: Client,
    url: String,
}

impl NetworkSink {
    /// Create a sink posting to `url` with a per-request timeout.
    ///
    /// # Errors
    /// Returns `DispatchError::Http` if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Agent endpoint.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl Sink for NetworkSink {
    fn name(&self) -> &str {
        "network"
    }

    async fn write(&self, item: &Collected) -> Result<(), DispatchError> {
        let payload = AgentPayload::from_collected(item);
        let response = self.client.post(&self.url).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Rejected(status.as_u16()));
        }

        tracing::debug!(url = %self.url, kind = %payload.kind, "Pushed to agent");
        Ok(())
    }
}
