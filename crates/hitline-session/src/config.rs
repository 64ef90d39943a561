//! Session engine configuration.

use std::time::Duration;

use hitline_core::lifecycle::DEFAULT_HISTORY_LEN;
use hitline_ingest::reconnect::ReconnectPolicy;
use hitline_ingest::reorder::DEFAULT_HOLD_MS;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Per-device deadline for a single start/stop call (default 5000).
    pub command_timeout_ms: u64,
    /// How long a launch may stay unconfirmed (default 10000).
    pub launch_grace_ms: u64,
    /// Session length when the selection does not set one. `None` runs until
    /// a manual stop or all goals are met.
    pub default_duration_secs: Option<u64>,
    /// Hold window for device-time reordering of hits (default 250).
    pub reorder_hold_ms: u64,
    /// Cap on manual retry invocations per session. `None` (default) leaves
    /// retrying to the operator.
    pub max_manual_retries: Option<u32>,
    /// Lifecycle transitions kept in snapshots (default 32).
    pub history_len: usize,
    /// Capacity of the telemetry and batch channels (default 256).
    pub channel_capacity: usize,
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 5_000,
            launch_grace_ms: 10_000,
            default_duration_secs: None,
            reorder_hold_ms: DEFAULT_HOLD_MS,
            max_manual_retries: None,
            history_len: DEFAULT_HISTORY_LEN,
            channel_capacity: 256,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("command timeout must be positive")]
    ZeroCommandTimeout,

    #[error("command timeout ({command_ms}ms) must be shorter than launch grace ({grace_ms}ms)")]
    CommandTimeoutNotBelowGrace { command_ms: u64, grace_ms: u64 },

    #[error("session duration must be at least one second")]
    ZeroDuration,

    #[error("channel capacity must be positive")]
    ZeroChannelCapacity,

    #[error("invalid reconnect policy: {0}")]
    InvalidReconnect(String),
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_timeout_ms == 0 {
            return Err(ConfigError::ZeroCommandTimeout);
        }
        if self.command_timeout_ms >= self.launch_grace_ms {
            return Err(ConfigError::CommandTimeoutNotBelowGrace {
                command_ms: self.command_timeout_ms,
                grace_ms: self.launch_grace_ms,
            });
        }
        if self.default_duration_secs == Some(0) {
            return Err(ConfigError::ZeroDuration);
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::ZeroChannelCapacity);
        }
        let r = &self.reconnect;
        if r.initial_backoff_ms == 0 || r.initial_backoff_ms > r.max_backoff_ms {
            return Err(ConfigError::InvalidReconnect(format!(
                "initial backoff {}ms must be in 1..={}ms",
                r.initial_backoff_ms, r.max_backoff_ms
            )));
        }
        if r.multiplier.is_nan() || r.multiplier < 1.0 {
            return Err(ConfigError::InvalidReconnect(format!(
                "multiplier {} must be at least 1.0",
                r.multiplier
            )));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn launch_grace(&self) -> Duration {
        Duration::from_millis(self.launch_grace_ms)
    }
}
