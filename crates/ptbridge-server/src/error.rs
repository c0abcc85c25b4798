use std::time::Duration;

use ptbridge_frame::FrameError;
use ptbridge_link::LinkError;

use crate::channel::ChannelId;
use crate::filter::FilterId;
use crate::protocol::ProtocolId;
use crate::server::LifecycleState;
use crate::status;

/// Errors that can occur in bridge operations.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The device link is down.
    #[error("device not connected")]
    DeviceNotConnected,

    /// A frame could not be written completely.
    #[error("send failed: {0}")]
    SendFailure(#[source] FrameError),

    /// A bounded wait expired.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// No live channel has this id.
    #[error("channel {0} not found")]
    ChannelNotFound(ChannelId),

    /// The channel has no filter with this id.
    #[error("filter {filter} not found on channel {channel}")]
    FilterNotFound { channel: ChannelId, filter: FilterId },

    /// The protocol id is unknown or not implemented by the device.
    #[error("protocol {0} not supported")]
    ProtocolNotSupported(u32),

    /// Baud rate outside the protocol's legal range.
    #[error("baud rate {baud} outside {protocol} range {min}..={max}")]
    InvalidBaudRate {
        protocol: ProtocolId,
        baud: u32,
        min: u32,
        max: u32,
    },

    /// Connect flags not valid for the protocol.
    #[error("flags 0x{flags:08x} not valid for {protocol}")]
    InvalidFlags { protocol: ProtocolId, flags: u32 },

    /// Filter definition rejected.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// Message data does not fit one frame.
    #[error("message of {size} bytes exceeds {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// Message tagged with a protocol other than the channel's.
    #[error("message protocol {actual} does not match channel protocol {expected}")]
    ProtocolMismatch {
        expected: ProtocolId,
        actual: ProtocolId,
    },

    /// A configured limit was reached.
    #[error("{0} limit reached")]
    ResourceExhausted(&'static str),

    /// A multi-message write stopped early.
    #[error("write stopped after {sent} message(s): {source}")]
    PartialWrite {
        sent: usize,
        source: Box<BridgeError>,
    },

    /// The device did not become ready in time.
    #[error("device not ready within {0:?}")]
    StartupTimeout(Duration),

    /// Worker threads did not exit in time.
    #[error("worker threads did not exit within {0:?}")]
    ShutdownTimeout(Duration),

    /// Lifecycle call made in the wrong state.
    #[error("operation not allowed while {0}")]
    InvalidState(LifecycleState),

    /// A received frame could not be decoded.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The link could not be opened or configured.
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Thread(#[source] std::io::Error),

    /// Configuration rejected.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl BridgeError {
    /// J2534 status code for this error, as returned across the passthru API.
    pub fn status_code(&self) -> u32 {
        match self {
            BridgeError::DeviceNotConnected => status::ERR_DEVICE_NOT_CONNECTED,
            BridgeError::Timeout(_) => status::ERR_TIMEOUT,
            BridgeError::ChannelNotFound(_) => status::ERR_INVALID_CHANNEL_ID,
            BridgeError::FilterNotFound { .. } => status::ERR_INVALID_FILTER_ID,
            BridgeError::ProtocolNotSupported(_) => status::ERR_INVALID_PROTOCOL_ID,
            BridgeError::InvalidBaudRate { .. } => status::ERR_INVALID_BAUDRATE,
            BridgeError::InvalidFlags { .. } => status::ERR_INVALID_FLAGS,
            BridgeError::InvalidFilter(_) | BridgeError::MessageTooLarge { .. } => {
                status::ERR_INVALID_MSG
            }
            BridgeError::ProtocolMismatch { .. } => status::ERR_MSG_PROTOCOL_ID,
            BridgeError::ResourceExhausted(_) => status::ERR_EXCEEDED_LIMIT,
            BridgeError::PartialWrite { source, .. } => source.status_code(),
            BridgeError::Link(_) => status::ERR_DEVICE_NOT_CONNECTED,
            _ => status::ERR_FAILED,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
