//! YAML application configuration.
//!
//! ```yaml
//! service: checkout-api
//! interval: 60s
//! cpu_duration: 10s
//! profiles:
//!   enabled: [cpu, heap, goroutine]
//! output:
//!   mode: network
//!   target_url: http://${AGENT_HOST:-127.0.0.1}:8586/profile
//!   fallback: true
//!   dir: ./profiles
//!   retention: 15m
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::ProfileType;

use super::settings::{
    DEFAULT_AGENT_URL, DEFAULT_CHANNEL_CAPACITY, DEFAULT_CPU_PROFILE_DURATION, DEFAULT_INTERVAL,
    DEFAULT_PROFILES, DEFAULT_PROFILES_DIR, DEFAULT_REQUEST_TIMEOUT, DEFAULT_RETENTION,
    DEFAULT_SEND_TIMEOUT, DEFAULT_SWEEP_INTERVAL, OutputMode, Settings,
};
use super::validation::{ConfigError, expand_env_vars};

fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

fn default_cpu_duration() -> Duration {
    DEFAULT_CPU_PROFILE_DURATION
}

fn default_profiles() -> Vec<ProfileType> {
    DEFAULT_PROFILES.to_vec()
}

// =============================================================================
// Profiles Configuration
// =============================================================================

/// Which profile types to collect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilesConfig {
    /// Collect every supported profile type (overrides `enabled`).
    #[serde(default)]
    pub all: bool,

    /// Profile types to collect (default: cpu, heap).
    #[serde(default = "default_profiles")]
    pub enabled: Vec<ProfileType>,
}

impl Default for ProfilesConfig {
    fn default() -> Self {
        Self {
            all: false,
            enabled: default_profiles(),
        }
    }
}

// =============================================================================
// Output Configuration
// =============================================================================

/// Output sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// `file` or `network` (default: file).
    pub mode: OutputMode,

    /// Profiles directory for file mode and the network fallback.
    pub dir: String,

    /// Age after which profile files are removed (default: 15m).
    #[serde(with = "humantime_serde")]
    pub retention: Duration,

    /// Interval between retention sweeps (default: 1m).
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Collection agent endpoint for network mode.
    pub target_url: String,

    /// Write rejected pushes to `dir` instead of dropping them (default: false).
    pub fallback: bool,

    /// Timeout for one push (default: 10s).
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            mode: OutputMode::File,
            dir: DEFAULT_PROFILES_DIR.to_string(),
            retention: DEFAULT_RETENTION,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            target_url: DEFAULT_AGENT_URL.to_string(),
            fallback: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

// =============================================================================
// Channel Configuration
// =============================================================================

/// Output channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Queue capacity (default: one full round plus one).
    pub capacity: usize,

    /// How long a full queue may stall the scheduler before the item is dropped.
    #[serde(with = "humantime_serde")]
    pub send_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CHANNEL_CAPACITY,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Service name used in file names and agent payloads.
    pub service: String,

    /// Interval between collection rounds (default: 60s).
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// CPU profile window (default: 10s).
    #[serde(default = "default_cpu_duration", with = "humantime_serde")]
    pub cpu_duration: Duration,

    /// Profile selection.
    #[serde(default)]
    pub profiles: ProfilesConfig,

    /// Output sink.
    #[serde(default)]
    pub output: OutputConfig,

    /// Output channel tuning.
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Runtime version override for identity metadata.
    #[serde(default)]
    pub runtime_version: Option<String>,
}

impl AppConfig {
    /// Configuration with defaults for everything but the service name.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            interval: DEFAULT_INTERVAL,
            cpu_duration: DEFAULT_CPU_PROFILE_DURATION,
            profiles: ProfilesConfig::default(),
            output: OutputConfig::default(),
            channel: ChannelConfig::default(),
            runtime_version: None,
        }
    }

    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read(path, e))?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string.
    ///
    /// # Errors
    /// Returns `ConfigError` if the document cannot be parsed or validated.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.to_settings().validate()
    }

    /// Build profiler settings, expanding `${VAR}` references in paths and URLs.
    pub fn to_settings(&self) -> Settings {
        let mut settings = Settings::new(&self.service)
            .with_interval(self.interval)
            .with_cpu_profile_duration(self.cpu_duration)
            .with_profiles(self.profiles.enabled.iter().copied())
            .with_profiles_dir(expand_env_vars(&self.output.dir))
            .with_retention(self.output.retention)
            .with_sweep_interval(self.output.sweep_interval)
            .with_request_timeout(self.output.request_timeout)
            .with_network_fallback(self.output.fallback)
            .with_channel_capacity(self.channel.capacity)
            .with_send_timeout(self.channel.send_timeout);

        if self.profiles.all {
            settings = settings.enable_all_profiles();
        }

        settings = match self.output.mode {
            OutputMode::File => settings.write_to_file(),
            OutputMode::Network => settings.with_target_url(expand_env_vars(&self.output.target_url)),
        };

        if let Some(version) = &self.runtime_version {
            settings = settings.with_runtime_version(version);
        }

        settings
    }
}
