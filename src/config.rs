//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

fn default_process_name() -> String {
    "harness-host".into()
}

fn default_channel_prefix() -> String {
    "HostHarness".into()
}

fn default_probe_timeout_ms() -> u64 {
    100
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_startup_timeout_secs() -> u64 {
    30
}

fn default_listener_timeout_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

fn default_grace_secs() -> u64 {
    10
}

/// Remote-runner settings: discovery, launch, and connection timeouts.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RunnerConfig {
    /// Well-known process name used to enumerate candidate hosts.
    #[serde(default = "default_process_name")]
    pub host_process_name: String,
    /// Executable launched when no candidate is reachable.
    ///
    /// Launching is disabled when unset, regardless of `allow_launch`.
    #[serde(default)]
    pub host_executable: Option<PathBuf>,
    /// Channel name prefix; must match the host's prefix.
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,
    /// Per-candidate connect timeout while probing (milliseconds).
    ///
    /// Kept short because most candidates will not be listening on the
    /// guessed name.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Connect timeout against a freshly launched host (seconds).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Ceiling on waiting for a launched process to come alive (seconds).
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
    /// Ceiling on waiting for the launched process's test channel to
    /// accept connections (seconds).  Process readiness does not imply
    /// listener readiness.
    #[serde(default = "default_listener_timeout_secs")]
    pub listener_timeout_secs: u64,
    /// Interval between readiness polls (milliseconds).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Whether a host may be launched when none is reachable.
    #[serde(default = "default_true")]
    pub allow_launch: bool,
}

impl RunnerConfig {
    /// Per-candidate probe timeout.
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Connect timeout for a known-to-exist host.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Launched-process liveness ceiling.
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    /// Launched-process listener-readiness ceiling.
    #[must_use]
    pub fn listener_timeout(&self) -> Duration {
        Duration::from_secs(self.listener_timeout_secs)
    }

    /// Readiness poll interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            host_process_name: default_process_name(),
            host_executable: None,
            channel_prefix: default_channel_prefix(),
            probe_timeout_ms: default_probe_timeout_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            startup_timeout_secs: default_startup_timeout_secs(),
            listener_timeout_secs: default_listener_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            allow_launch: default_true(),
        }
    }
}

/// Host-side settings: channel identity and shutdown behavior.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HostConfig {
    /// Channel name prefix; must match the runner's prefix.
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,
    /// Grace period for the in-flight response during shutdown (seconds).
    #[serde(default = "default_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl HostConfig {
    /// Shutdown grace period for the in-flight response.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            channel_prefix: default_channel_prefix(),
            shutdown_grace_secs: default_grace_secs(),
        }
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Remote-runner settings.
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Host-side settings.
    #[serde(default)]
    pub host: HostConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.runner.host_process_name.trim().is_empty() {
            return Err(AppError::Config("host_process_name must not be empty".into()));
        }
        validate_prefix(&self.runner.channel_prefix)?;
        validate_prefix(&self.host.channel_prefix)?;
        if self.runner.probe_timeout_ms == 0 {
            return Err(AppError::Config("probe_timeout_ms must be greater than zero".into()));
        }
        if self.runner.connect_timeout_secs == 0 {
            return Err(AppError::Config(
                "connect_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.runner.poll_interval_ms == 0 {
            return Err(AppError::Config("poll_interval_ms must be greater than zero".into()));
        }
        Ok(())
    }
}

/// Channel prefixes become part of an OS channel name, so they are
/// restricted to characters safe on every supported platform.
fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Err(AppError::Config("channel_prefix must not be empty".into()));
    }
    if !prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
    {
        return Err(AppError::Config(format!(
            "channel_prefix '{prefix}' contains characters unsafe for channel names"
        )));
    }
    Ok(())
}
