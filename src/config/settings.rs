//! Profiler settings and builder.
//!
//! [`Settings`] is assembled once per profiler instance and handed to
//! [`Profiler::new`](crate::Profiler::new) by value, so it cannot change once
//! collection has started.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumString};

use crate::capture::ProfileType;

use super::validation::ConfigError;

// =============================================================================
// Constants
// =============================================================================

/// Default directory where profiles are stored in file mode.
pub const DEFAULT_PROFILES_DIR: &str = "./profiles";

/// Default age after which profile files are removed.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(900);

/// Default collection agent endpoint.
pub const DEFAULT_AGENT_URL: &str = "http://127.0.0.1:8586/profile";

/// Default CPU capture window.
pub const DEFAULT_CPU_PROFILE_DURATION: Duration = Duration::from_secs(10);

/// Default interval between collection rounds.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Minimum interval. File names carry second-resolution timestamps.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Default output channel capacity: one full round plus headroom.
pub const DEFAULT_CHANNEL_CAPACITY: usize = ProfileType::ALL.len() + 1;

/// Default time the scheduler waits for channel space before dropping.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Default interval between retention sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default timeout for a single push to the agent.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Profile types enabled by default.
pub const DEFAULT_PROFILES: [ProfileType; 2] = [ProfileType::Heap, ProfileType::Cpu];

/// Where collected artifacts are sent.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OutputMode {
    /// Write artifacts under the profiles directory.
    #[default]
    File,
    /// Push artifacts to the collection agent.
    Network,
}

/// Profiler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    service: String,
    profiles: BTreeSet<ProfileType>,
    interval: Duration,
    cpu_duration: Duration,
    output: OutputMode,
    profiles_dir: PathBuf,
    retention: Duration,
    target_url: String,
    network_fallback: bool,
    channel_capacity: usize,
    send_timeout: Duration,
    sweep_interval: Duration,
    request_timeout: Duration,
    runtime_version: String,
}

impl Settings {
    /// Create settings with defaults.
    ///
    /// The service name is required for identification.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            profiles: DEFAULT_PROFILES.into_iter().collect(),
            interval: DEFAULT_INTERVAL,
            cpu_duration: DEFAULT_CPU_PROFILE_DURATION,
            output: OutputMode::File,
            profiles_dir: PathBuf::from(DEFAULT_PROFILES_DIR),
            retention: DEFAULT_RETENTION,
            target_url: DEFAULT_AGENT_URL.to_string(),
            network_fallback: false,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            runtime_version: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))
                .to_string(),
        }
    }

    // --- Builder methods ---

    /// Set the interval between collection rounds.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set how long the CPU profile is collected each round.
    pub fn with_cpu_profile_duration(mut self, duration: Duration) -> Self {
        self.cpu_duration = duration;
        self
    }

    /// Enable one profile type. Enabling twice has no further effect.
    pub fn enable_profile(mut self, kind: ProfileType) -> Self {
        self.profiles.insert(kind);
        self
    }

    /// Enable the block profile.
    pub fn enable_block_profile(self) -> Self {
        self.enable_profile(ProfileType::Block)
    }

    /// Enable the mutex profile.
    pub fn enable_mutex_profile(self) -> Self {
        self.enable_profile(ProfileType::Mutex)
    }

    /// Enable the goroutine (task/thread listing) profile.
    pub fn enable_goroutine_profile(self) -> Self {
        self.enable_profile(ProfileType::Goroutine)
    }

    /// Enable the threadcreate profile.
    pub fn enable_thread_create_profile(self) -> Self {
        self.enable_profile(ProfileType::ThreadCreate)
    }

    /// Enable the allocs profile.
    pub fn enable_allocs_profile(self) -> Self {
        self.enable_profile(ProfileType::Allocs)
    }

    /// Replace the enabled set with every supported profile type.
    pub fn enable_all_profiles(mut self) -> Self {
        self.profiles = ProfileType::iter().collect();
        self
    }

    /// Replace the enabled set.
    pub fn with_profiles(mut self, profiles: impl IntoIterator<Item = ProfileType>) -> Self {
        self.profiles = profiles.into_iter().collect();
        self
    }

    /// Write profiles to [`DEFAULT_PROFILES_DIR`], named `service_timestamp_pid.type`.
    pub fn write_to_file(mut self) -> Self {
        self.output = OutputMode::File;
        self
    }

    /// Write profiles to the given directory.
    pub fn write_to_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.output = OutputMode::File;
        self.profiles_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Push profiles to the collection agent at `url`.
    pub fn with_target_url(mut self, url: impl Into<String>) -> Self {
        self.output = OutputMode::Network;
        self.target_url = url.into();
        self
    }

    /// Push profiles to the collection agent at the current target URL.
    pub fn send_to_agent(mut self) -> Self {
        self.output = OutputMode::Network;
        self
    }

    /// In network mode, write items the agent rejected to the profiles directory.
    pub fn with_network_fallback(mut self, enabled: bool) -> Self {
        self.network_fallback = enabled;
        self
    }

    /// Set the directory used by file mode and the network fallback.
    pub fn with_profiles_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.profiles_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set how long profile files are kept.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Set the output channel capacity.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Set how long the scheduler waits for channel space before dropping an item.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Set the interval between retention sweeps.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the timeout for a single push to the agent.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the runtime version reported in identity metadata.
    pub fn with_runtime_version(mut self, version: impl Into<String>) -> Self {
        self.runtime_version = version.into();
        self
    }

    // --- Accessors ---

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn cpu_duration(&self) -> Duration {
        self.cpu_duration
    }

    pub fn output(&self) -> OutputMode {
        self.output
    }

    pub fn profiles_dir(&self) -> &Path {
        &self.profiles_dir
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    pub fn network_fallback(&self) -> bool {
        self.network_fallback
    }

    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn runtime_version(&self) -> &str {
        &self.runtime_version
    }

    /// Enabled profile types.
    pub fn profiles(&self) -> &BTreeSet<ProfileType> {
        &self.profiles
    }

    /// Enabled profile types in capture order (instantaneous first, CPU last).
    pub fn capture_order(&self) -> Vec<ProfileType> {
        self.profiles.iter().copied().collect()
    }

    /// Directory written by the file sink, if any sink writes to disk.
    pub fn storage_dir(&self) -> Option<&Path> {
        match self.output {
            OutputMode::File => Some(&self.profiles_dir),
            OutputMode::Network if self.network_fallback => Some(&self.profiles_dir),
            OutputMode::Network => None,
        }
    }

    /// Validate settings.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` describing the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.trim().is_empty() {
            return Err(ConfigError::invalid("service name must not be empty"));
        }

        if self.service.contains(['/', '\\']) {
            return Err(ConfigError::invalid(format!(
                "service name must not contain path separators, got '{}'",
                self.service
            )));
        }

        if self.interval < MIN_INTERVAL {
            return Err(ConfigError::invalid(format!(
                "interval must be at least {:?}, got {:?}",
                MIN_INTERVAL, self.interval
            )));
        }

        if self.cpu_duration.is_zero() {
            return Err(ConfigError::invalid("cpu profile duration must be positive"));
        }

        if self.profiles.contains(&ProfileType::Cpu) && self.cpu_duration >= self.interval {
            tracing::warn!(
                cpu_duration = ?self.cpu_duration,
                interval = ?self.interval,
                "CPU profile duration is not shorter than the interval; rounds will run back to back"
            );
        }

        if self.channel_capacity == 0 {
            return Err(ConfigError::invalid("channel capacity must be positive"));
        }

        if self.send_timeout.is_zero() {
            return Err(ConfigError::invalid("send timeout must be positive"));
        }

        if self.retention.is_zero() {
            return Err(ConfigError::invalid("retention must be positive"));
        }

        if self.sweep_interval.is_zero() {
            return Err(ConfigError::invalid("sweep interval must be positive"));
        }

        if self.storage_dir().is_some() && self.profiles_dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid("profiles directory must not be empty"));
        }

        if self.output == OutputMode::Network {
            let url = self.target_url.trim();
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::invalid(format!(
                    "target url must be http(s), got '{}'",
                    self.target_url
                )));
            }
            if self.request_timeout.is_zero() {
                return Err(ConfigError::invalid("request timeout must be positive"));
            }
        }

        Ok(())
    }
}
