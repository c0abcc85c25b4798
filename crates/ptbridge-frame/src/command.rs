//! Command identifiers carried in the frame header.
//!
//! Ids not listed here are reserved for forward extension; receivers
//! ignore them rather than treating them as errors.

/// Device log line (device → host).
pub const LOG: u16 = 0x01;

/// Firmware-side voltage query. Reserved, never sent by the host.
pub const VOLTAGE: u16 = 0x02;

/// Heartbeat request and device-health reply.
pub const PING: u16 = 0x03;

/// Channel-tagged vehicle network bytes (both directions).
pub const CHANNEL_DATA: u16 = 0x04;

/// Announce a new logical channel to the device.
pub const OPEN_CHANNEL: u16 = 0x05;

/// Announce removal of a logical channel.
pub const CLOSE_CHANNEL: u16 = 0x06;

/// Host driver is shutting down; the session ends.
pub const EXIT: u16 = 0xFF;

/// Returns a human-readable name for a command id.
pub fn command_name(id: u16) -> &'static str {
    match id {
        LOG => "LOG",
        VOLTAGE => "VOLTAGE",
        PING => "PING",
        CHANNEL_DATA => "CHANNEL_DATA",
        OPEN_CHANNEL => "OPEN_CHANNEL",
        CLOSE_CHANNEL => "CLOSE_CHANNEL",
        EXIT => "EXIT",
        _ => "RESERVED",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_known_and_reserved_ids() {
        assert_eq!(command_name(PING), "PING");
        assert_eq!(command_name(EXIT), "EXIT");
        assert_eq!(command_name(0x42), "RESERVED");
    }
}
