//! Host-side engine for a passthru vehicle-interface device.
//!
//! A [`Bridge`] owns one device link, multiplexes logical channels over it,
//! keeps the device alive with heartbeats, and hands inbound traffic to
//! callers through per-channel queues.

pub mod bridge;
pub mod channel;
pub mod config;
pub mod error;
pub mod filter;
pub mod health;
pub mod message;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod signal;
pub mod status;
pub mod transport;

pub use bridge::{Bridge, VersionInfo, API_VERSION};
pub use channel::{Channel, ChannelId, ReadStatus};
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use filter::{Filter, FilterId, FilterSet, FilterType, MAX_FILTER_BYTES};
pub use health::{DeviceHealth, HealthSnapshot};
pub use message::{PassThruMsg, RxStatus, TxFlags};
pub use protocol::{CanIdMode, ConnectFlags, ProtocolHandler, ProtocolId};
pub use registry::{ChannelInfo, ChannelRegistry, RouteOutcome};
pub use server::{CommServer, LifecycleState};
pub use signal::{LifecycleSignals, Signal};
pub use transport::FrameTransport;
