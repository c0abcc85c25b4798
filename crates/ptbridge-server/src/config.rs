use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Default wait for the device to become reachable in `start`.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(3);
/// Default wait for both worker threads to exit in `stop`.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
/// Default period between heartbeat pings.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
/// Default wait for a heartbeat reply.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_millis(500);
/// Default bound on one receiver poll.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(10);
/// Default pause between connection attempts during startup.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(50);

/// Tunables for a bridge session.
///
/// Serialized with durations as whole milliseconds, e.g.
/// `{"heartbeat_interval_ms": 1000, "max_channels": 8}`. Missing keys keep
/// their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    #[serde(rename = "startup_timeout_ms", with = "duration_ms")]
    pub startup_timeout: Duration,
    #[serde(rename = "shutdown_timeout_ms", with = "duration_ms")]
    pub shutdown_timeout: Duration,
    #[serde(rename = "heartbeat_interval_ms", with = "duration_ms")]
    pub heartbeat_interval: Duration,
    #[serde(rename = "heartbeat_timeout_ms", with = "duration_ms")]
    pub heartbeat_timeout: Duration,
    #[serde(rename = "poll_timeout_ms", with = "duration_ms")]
    pub poll_timeout: Duration,
    #[serde(rename = "reconnect_interval_ms", with = "duration_ms")]
    pub reconnect_interval: Duration,
    /// Channels that may be open at once.
    pub max_channels: usize,
    /// Filters each channel may hold.
    pub max_filters_per_channel: usize,
    /// Inbound messages buffered per channel before the oldest is dropped.
    pub queue_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            max_channels: 8,
            max_filters_per_channel: 10,
            queue_capacity: 256,
        }
    }
}

impl BridgeConfig {
    /// Load a config from a JSON file and validate it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| BridgeError::Config(format!("{}: {err}", path.display())))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|err| BridgeError::Config(format!("{}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the workers cannot run with.
    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("startup_timeout_ms", self.startup_timeout),
            ("shutdown_timeout_ms", self.shutdown_timeout),
            ("heartbeat_interval_ms", self.heartbeat_interval),
            ("heartbeat_timeout_ms", self.heartbeat_timeout),
            ("poll_timeout_ms", self.poll_timeout),
        ];
        for (name, value) in nonzero {
            if value.is_zero() {
                return Err(BridgeError::Config(format!("{name} must be greater than 0")));
            }
        }
        if self.max_channels == 0 || self.queue_capacity == 0 {
            return Err(BridgeError::Config(
                "max_channels and queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.max_channels > u8::MAX as usize {
            return Err(BridgeError::Config(format!(
                "max_channels {} exceeds {}",
                self.max_channels,
                u8::MAX
            )));
        }
        Ok(())
    }

    /// Override the startup wait.
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Override the heartbeat period and reply wait.
    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_timeout = timeout;
        self
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
