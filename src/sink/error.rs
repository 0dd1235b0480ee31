//! Sink-specific error types.
//!
//! Every sink write returns [`DispatchError`] on failure; the dispatcher
//! reports it and drops (or reroutes) the item. Sweeper failures use
//! [`RetentionError`].

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while delivering an item to a sink.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Filesystem write failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Destination file already exists; artifacts are never overwritten.
    #[error("file already exists: {}", .0.display())]
    Collision(PathBuf),

    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport error (connect, timeout, TLS, ...).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Agent answered with a non-success status.
    #[error("agent rejected push with status {0}")]
    Rejected(u16),
}

/// Errors that can occur during a retention sweep.
#[derive(Debug, Error)]
pub enum RetentionError {
    /// Listing the profiles directory failed.
    #[error("failed to list {}: {source}", dir.display())]
    List {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Removing an expired file failed.
    #[error("failed to remove {}: {source}", path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
