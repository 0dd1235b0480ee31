//! Bounded output channel between the scheduler and the dispatcher.
//!
//! When the channel is full the producer waits up to the configured send
//! timeout; past that the item being enqueued is dropped, counted and the
//! caller gets [`ChannelError::Full`]. Delivered items keep enqueue order.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

use crate::capture::Collected;
use crate::pipeline::PipelineStats;

/// Errors returned when handing an item to the dispatcher.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel stayed full for the whole send timeout; the item was dropped.
    #[error("output channel full for {0:?}, {1} item dropped")]
    Full(Duration, String),

    /// The dispatcher is gone; the item was dropped.
    #[error("output channel closed, {0} item dropped")]
    Closed(String),
}

/// Producer half held by the scheduler.
#[derive(Debug, Clone)]
pub struct OutputSender {
    tx: mpsc::Sender<Collected>,
    send_timeout: Duration,
    stats: Arc<PipelineStats>,
}

/// Consumer half held by the dispatcher.
pub type OutputReceiver = mpsc::Receiver<Collected>;

/// Create the output channel.
pub fn output_channel(
    capacity: usize,
    send_timeout: Duration,
    stats: Arc<PipelineStats>,
) -> (OutputSender, OutputReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        OutputSender {
            tx,
            send_timeout,
            stats,
        },
        rx,
    )
}

impl OutputSender {
    /// Enqueue an item, waiting at most the send timeout for capacity.
    ///
    /// # Errors
    /// Returns `ChannelError::Full` or `ChannelError::Closed` when the item
    /// was dropped instead of enqueued.
    pub async fn send(&self, item: Collected) -> Result<(), ChannelError> {
        match self.tx.send_timeout(item, self.send_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(item)) => {
                self.stats.record_drop();
                Err(ChannelError::Full(self.send_timeout, item.tag().to_string()))
            }
            Err(SendTimeoutError::Closed(item)) => {
                self.stats.record_drop();
                Err(ChannelError::Closed(item.tag().to_string()))
            }
        }
    }

    /// Whether the receiving side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
