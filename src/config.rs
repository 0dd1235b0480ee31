//! Configuration module.
//!
//! - [`Settings`]: the validated, immutable-after-start profiler settings
//! - [`AppConfig`]: YAML file format used by the `ferroprof` binary
//! - [`ConfigError`]: errors raised while loading or validating either

mod app;
mod settings;
mod validation;

pub use app::{AppConfig, ChannelConfig, OutputConfig, ProfilesConfig};
pub use settings::{OutputMode, Settings};
pub use validation::{ConfigError, expand_env_vars, parse_duration};

// Re-export constants
pub use settings::{
    DEFAULT_AGENT_URL, DEFAULT_CHANNEL_CAPACITY, DEFAULT_CPU_PROFILE_DURATION, DEFAULT_INTERVAL,
    DEFAULT_PROFILES, DEFAULT_PROFILES_DIR, DEFAULT_REQUEST_TIMEOUT, DEFAULT_RETENTION,
    DEFAULT_SEND_TIMEOUT, DEFAULT_SWEEP_INTERVAL, MIN_INTERVAL,
};
