use std::time::{Duration, Instant};

use parking_lot::RwLock;
use ptbridge_frame::PingReply;

/// Point-in-time view of the device, as last reported by a heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub battery_millivolts: u32,
    pub active_channel_count: u8,
    pub last_heartbeat: Option<Instant>,
    pub connected: bool,
}

impl HealthSnapshot {
    /// Time since the last healthy heartbeat reply.
    pub fn heartbeat_age(&self) -> Option<Duration> {
        self.last_heartbeat.map(|at| at.elapsed())
    }
}

/// Device health shared between the workers and API callers.
#[derive(Debug, Default)]
pub struct DeviceHealth {
    state: RwLock<HealthSnapshot>,
}

impl DeviceHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        *self.state.read()
    }

    /// Fold a heartbeat reply into the snapshot.
    pub fn record_ping(&self, reply: &PingReply) {
        let mut state = self.state.write();
        state.battery_millivolts = reply.battery_millivolts();
        state.active_channel_count = reply.active_channels;
        state.last_heartbeat = Some(Instant::now());
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.write().connected = connected;
    }

    /// Forget everything learned in the previous session.
    pub fn reset(&self) {
        *self.state.write() = HealthSnapshot::default();
    }
}
