//! Sink trait.

use crate::capture::Collected;
use crate::sink::DispatchError;

/// Destination for collected items.
///
/// A sink performs exactly one delivery attempt per call; retries and
/// fallbacks are the dispatcher's concern.
#[async_trait::async_trait]
pub trait Sink: Send + Sync + 'static {
    /// Short name used in events and logs (e.g., "file", "network").
    fn name(&self) -> &str;

    /// Deliver one item.
    async fn write(&self, item: &Collected) -> Result<(), DispatchError>;
}
