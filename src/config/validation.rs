//! Configuration errors, CLI duration parsing and `${VAR}` expansion for
//! profile directories and agent URLs.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use regex::{Captures, Regex};
use thiserror::Error;

/// Errors raised while loading or validating profiler configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The YAML file could not be read.
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The YAML document is malformed or has unknown values.
    #[error("failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A setting is out of range (interval, windows, paths, URL).
    #[error("invalid profiler settings: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    pub(crate) fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }
}

/// Parse a collection interval or CPU window as given on the command line.
///
/// Accepts humantime syntax. A bare number has no unit and is rejected.
///
/// ```
/// use std::time::Duration;
/// use ferroprof::config::parse_duration;
///
/// assert_eq!(parse_duration("60s"), Ok(Duration::from_secs(60)));
/// assert_eq!(parse_duration("1m30s"), Ok(Duration::from_secs(90)));
/// assert!(parse_duration("60").is_err());
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration is empty; expected e.g. 60s or 1m".to_string());
    }
    humantime::parse_duration(s).map_err(|e| format!("invalid duration {s:?}: {e}"))
}

fn env_reference() -> Option<&'static Regex> {
    static ENV_REF: OnceLock<Option<Regex>> = OnceLock::new();
    ENV_REF
        .get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").ok())
        .as_ref()
}

/// Substitute `${VAR}` and `${VAR:-default}` references, so one config file
/// can point each deployment at its own profiles directory or agent.
///
/// An unset variable without a default expands to the empty string, which
/// settings validation then rejects for the directory and the URL.
///
/// ```
/// use ferroprof::config::expand_env_vars;
///
/// let url = expand_env_vars("http://${FERROPROF_DOC_AGENT_HOST:-127.0.0.1}:8586/profile");
/// assert_eq!(url, "http://127.0.0.1:8586/profile");
/// ```
pub fn expand_env_vars(input: &str) -> String {
    let Some(pattern) = env_reference() else {
        return input.to_string();
    };

    pattern
        .replace_all(input, |caps: &Captures| {
            let name = &caps[1];
            match (std::env::var(name), caps.get(2)) {
                (Ok(value), _) => value,
                (Err(_), Some(default)) => default.as_str().to_string(),
                (Err(_), None) => {
                    tracing::warn!(variable = name, "Config references an unset variable");
                    String::new()
                }
            }
        })
        .into_owned()
}
