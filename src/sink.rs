//! Sink Layer
//!
//! Destinations for collected items and the retention policy for the one
//! that writes to disk.
//!
//! # Components
//!
//! - [`Sink`]: single-attempt delivery of one item
//! - [`FileSink`]: `{service}_{unixTimestamp}_{pid}.{type}` files, rename-after-write
//! - [`NetworkSink`]: JSON push to a collection agent
//! - [`RetentionSweeper`]: periodic removal of expired files

mod error;
pub mod file;
mod network;
mod retention;
mod traits;

pub use error::{DispatchError, RetentionError};
pub use file::{FileName, FileSink, file_name, parse_file_name};
pub use network::{AgentPayload, NetworkSink};
pub use retention::{RetentionSweeper, SweepReport, is_expired};
pub use traits::Sink;
