//! J2534 status codes returned across the passthru API.

pub const STATUS_NOERROR: u32 = 0x00;
pub const ERR_INVALID_CHANNEL_ID: u32 = 0x02;
pub const ERR_INVALID_PROTOCOL_ID: u32 = 0x03;
pub const ERR_INVALID_FLAGS: u32 = 0x06;
pub const ERR_FAILED: u32 = 0x07;
pub const ERR_DEVICE_NOT_CONNECTED: u32 = 0x08;
pub const ERR_TIMEOUT: u32 = 0x09;
pub const ERR_INVALID_MSG: u32 = 0x0A;
pub const ERR_EXCEEDED_LIMIT: u32 = 0x0C;
pub const ERR_BUFFER_EMPTY: u32 = 0x10;
pub const ERR_MSG_PROTOCOL_ID: u32 = 0x15;
pub const ERR_INVALID_FILTER_ID: u32 = 0x16;
pub const ERR_INVALID_BAUDRATE: u32 = 0x19;
