//! File sink and the on-disk naming convention.
//!
//! Files are named `{service}_{unixTimestamp}_{pid}.{type}` where `type` is a
//! profile tag or `metrics`. Each write lands in a hidden temporary file that
//! is renamed into place, so a name matching the convention always refers to
//! a complete file.

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::capture::{Collected, METRICS_TAG, ProfileType};
use crate::sink::{DispatchError, Sink};

/// Build the file name for an item.
pub fn file_name(service: &str, timestamp: DateTime<Utc>, pid: u32, tag: &str) -> String {
    format!("{service}_{}_{pid}.{tag}", timestamp.timestamp())
}

/// Components of a file name following the naming convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileName {
    pub service: String,
    pub timestamp: i64,
    pub pid: u32,
    pub tag: String,
}

/// Parse a file name written by [`FileSink`].
///
/// Returns `None` for anything else, including in-flight temporary files.
/// Fields are split from the right since service names may contain `_`.
pub fn parse_file_name(name: &str) -> Option<FileName> {
    let (stem, tag) = name.rsplit_once('.')?;
    if tag != METRICS_TAG && !ProfileType::from_str(tag).is_ok_and(|t| t.as_ref() == tag) {
        return None;
    }

    let (rest, pid) = stem.rsplit_once('_')?;
    let (service, timestamp) = rest.rsplit_once('_')?;
    if service.is_empty() || service.starts_with('.') {
        return None;
    }

    Some(FileName {
        service: service.to_string(),
        timestamp: timestamp.parse().ok()?,
        pid: pid.parse().ok()?,
        tag: tag.to_string(),
    })
}

/// Writes each item to its own file under a directory.
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    /// Create a sink writing under `dir`. The directory is created on first write.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Target directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Final path an item is written to.
    pub fn path_for(&self, item: &Collected) -> PathBuf {
        let identity = item.identity();
        self.dir.join(file_name(
            &identity.service,
            item.timestamp(),
            identity.pid,
            item.tag(),
        ))
    }

    fn body(item: &Collected) -> Result<Cow<'_, [u8]>, DispatchError> {
        match item {
            Collected::Profile(artifact) => Ok(Cow::Borrowed(&artifact.payload)),
            Collected::Metrics(sample) => Ok(Cow::Owned(serde_json::to_vec_pretty(sample)?)),
        }
    }
}

#[async_trait::async_trait]
impl Sink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn write(&self, item: &Collected) -> Result<(), DispatchError> {
        let body = Self::body(item)?;
        let path = self.path_for(item);

        tokio::fs::create_dir_all(&self.dir).await?;
        if tokio::fs::try_exists(&path).await? {
            return Err(DispatchError::Collision(path));
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp_path = self.dir.join(format!(".{file_name}.tmp"));

        tokio::fs::write(&tmp_path, &body).await?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        tracing::debug!(path = %path.display(), bytes = body.len(), "Artifact written");
        Ok(())
    }
}
