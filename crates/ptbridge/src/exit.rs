use std::fmt;
use std::io;

use ptbridge_link::LinkError;
use ptbridge_server::BridgeError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const DEVICE_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => DEVICE_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn link_error(context: &str, err: LinkError) -> CliError {
    match err {
        LinkError::Connect { source, .. } | LinkError::Io(source) => io_error(context, source),
        LinkError::PathTooLong { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(DEVICE_ERROR, format!("{context}: {other}")),
    }
}

pub fn bridge_error(context: &str, err: BridgeError) -> CliError {
    let err = match err {
        BridgeError::Link(inner) => return link_error(context, inner),
        other => other,
    };
    let code = match &err {
        BridgeError::Timeout(_) | BridgeError::StartupTimeout(_) => TIMEOUT,
        BridgeError::DeviceNotConnected
        | BridgeError::SendFailure(_)
        | BridgeError::Frame(_) => DEVICE_ERROR,
        BridgeError::ProtocolNotSupported(_)
        | BridgeError::InvalidBaudRate { .. }
        | BridgeError::InvalidFlags { .. }
        | BridgeError::InvalidFilter(_)
        | BridgeError::Config(_) => USAGE,
        BridgeError::MessageTooLarge { .. } | BridgeError::ProtocolMismatch { .. } => DATA_INVALID,
        BridgeError::PartialWrite { .. } | BridgeError::ResourceExhausted(_) => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(
        code,
        format!("{context}: {err} (status 0x{:02x})", err.status_code()),
    )
}
