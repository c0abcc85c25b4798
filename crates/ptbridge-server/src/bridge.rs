//! The passthru API facade over one device.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use ptbridge_link::Connector;
use serde::Serialize;

use crate::channel::{ChannelId, ReadStatus};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::filter::{FilterId, FilterType};
use crate::health::{DeviceHealth, HealthSnapshot};
use crate::message::PassThruMsg;
use crate::registry::{ChannelInfo, ChannelRegistry};
use crate::server::{CommServer, LifecycleState};
use crate::transport::FrameTransport;

/// J2534 API revision implemented.
pub const API_VERSION: &str = "04.04";

/// Versions reported by [`Bridge::version`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    pub firmware: String,
    pub driver: String,
    pub api: String,
}

impl VersionInfo {
    /// Versions of this build.
    pub fn current() -> Self {
        Self {
            // The device does not report its firmware revision yet.
            firmware: "unknown".to_string(),
            driver: env!("CARGO_PKG_VERSION").to_string(),
            api: API_VERSION.to_string(),
        }
    }
}

/// A passthru device behind one link.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct Bridge {
    transport: Arc<FrameTransport>,
    registry: Arc<ChannelRegistry>,
    health: Arc<DeviceHealth>,
    server: CommServer,
    last_error: Mutex<Option<String>>,
}

impl Bridge {
    /// Build a bridge; nothing is opened until [`Bridge::start`].
    pub fn new(connector: impl Connector + 'static, config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        let transport = Arc::new(FrameTransport::new(connector, &config));
        let registry = Arc::new(ChannelRegistry::new(Arc::clone(&transport), &config));
        let health = Arc::new(DeviceHealth::new());
        let server = CommServer::new(
            Arc::clone(&transport),
            Arc::clone(&registry),
            Arc::clone(&health),
            config,
        );
        Ok(Self {
            transport,
            registry,
            health,
            server,
            last_error: Mutex::new(None),
        })
    }

    pub fn start(&self) -> Result<()> {
        self.record(|| self.server.start())
    }

    pub fn stop(&self) -> Result<()> {
        self.record(|| self.server.stop())
    }

    pub fn state(&self) -> LifecycleState {
        self.server.state()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Description of the most recent failed call, like `PassThruGetLastError`.
    ///
    /// Successful calls leave it unchanged.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    fn record<T>(&self, op: impl FnOnce() -> Result<T>) -> Result<T> {
        let result = op();
        if let Err(err) = &result {
            *self.last_error.lock() = Some(err.to_string());
        }
        result
    }

    /// Worker threads currently alive; zero whenever the bridge is stopped.
    pub fn active_workers(&self) -> usize {
        self.server.active_workers()
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.transport.is_connected() {
            Ok(())
        } else {
            Err(BridgeError::DeviceNotConnected)
        }
    }

    /// Open a logical channel.
    pub fn add_channel(&self, protocol_id: u32, flags: u32, baud_rate: u32) -> Result<ChannelId> {
        self.record(|| {
            self.ensure_connected()?;
            self.registry.add_channel(protocol_id, flags, baud_rate)
        })
    }

    pub fn remove_channel(&self, id: ChannelId) -> Result<()> {
        self.record(|| {
            self.ensure_connected()?;
            self.registry.remove_channel(id)
        })
    }

    /// Read up to `max` messages into `out`, waiting up to `timeout` for the first.
    pub fn read_channel(
        &self,
        id: ChannelId,
        out: &mut Vec<PassThruMsg>,
        max: usize,
        timeout: Duration,
    ) -> Result<ReadStatus> {
        self.record(|| {
            self.ensure_connected()?;
            self.registry.request_channel_data(id, out, max, timeout)
        })
    }

    /// Write messages in order; returns how many were sent.
    pub fn write_channel(
        &self,
        id: ChannelId,
        messages: &[PassThruMsg],
        timeout: Duration,
    ) -> Result<usize> {
        self.record(|| {
            self.ensure_connected()?;
            self.registry.send_payload(id, messages, timeout)
        })
    }

    pub fn set_filter(
        &self,
        id: ChannelId,
        kind: FilterType,
        mask: &[u8],
        pattern: &[u8],
        flow_control: Option<&[u8]>,
    ) -> Result<FilterId> {
        self.record(|| {
            self.ensure_connected()?;
            self.registry.set_filter(id, kind, mask, pattern, flow_control)
        })
    }

    pub fn remove_filter(&self, id: ChannelId, filter: FilterId) -> Result<()> {
        self.record(|| {
            self.ensure_connected()?;
            self.registry.remove_filter(id, filter)
        })
    }

    /// Change a channel's bit rate within its protocol's limits.
    pub fn set_baud_rate(&self, id: ChannelId, baud_rate: u32) -> Result<()> {
        self.record(|| {
            self.ensure_connected()?;
            self.registry.set_baud_rate(id, baud_rate)
        })
    }

    pub fn set_flags(&self, id: ChannelId, flags: u32) -> Result<()> {
        self.record(|| {
            self.ensure_connected()?;
            self.registry.set_flags(id, flags)
        })
    }

    pub fn channel_info(&self, id: ChannelId) -> Result<ChannelInfo> {
        self.record(|| self.registry.channel_info(id))
    }

    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.registry.channel_ids()
    }

    /// Inbound data arrived since the last call.
    pub fn take_data_ready(&self) -> bool {
        self.server.take_data_ready()
    }

    pub fn device_health(&self) -> HealthSnapshot {
        self.health.snapshot()
    }

    /// Battery voltage in millivolts from the latest heartbeat; 0 before the first.
    pub fn read_battery_voltage(&self) -> Result<u32> {
        self.record(|| {
            self.ensure_connected()?;
            Ok(self.health.snapshot().battery_millivolts)
        })
    }

    pub fn version(&self) -> VersionInfo {
        VersionInfo::current()
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("transport", &self.transport)
            .field("state", &self.state())
            .finish()
    }
}
