//! Argument layouts for the commands the host understands.
//!
//! All multi-byte fields are little-endian and byte-addressed from the
//! start of the argument area.

use std::borrow::Cow;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{Frame, ARGS_CAPACITY};
use crate::command::{CHANNEL_DATA, CLOSE_CHANNEL, LOG, OPEN_CHANNEL, PING};
use crate::error::{FrameError, Result};

/// Channel id (4) + status/flags (4) + timestamp (4).
pub const CHANNEL_DATA_HEADER: usize = 12;

/// Largest vehicle-network payload one `CHANNEL_DATA` frame can carry.
pub const MAX_CHANNEL_DATA: usize = ARGS_CAPACITY - CHANNEL_DATA_HEADER;

/// Status byte of a healthy heartbeat reply.
pub const PING_STATUS_OK: u8 = 0x00;

/// Status (1) + battery volts as f32 (4) + active channel count (1).
const PING_REPLY_LEN: usize = 6;

const OPEN_CHANNEL_LEN: usize = 16;
const CLOSE_CHANNEL_LEN: usize = 4;

fn expect_command(frame: &Frame, expected: u16) -> Result<()> {
    if frame.cmd_id() != expected {
        return Err(FrameError::UnexpectedCommand {
            expected,
            actual: frame.cmd_id(),
        });
    }
    Ok(())
}

fn expect_len(frame: &Frame, command: &'static str, expected: usize) -> Result<()> {
    if frame.arg_size() < expected {
        return Err(FrameError::Truncated {
            command,
            expected,
            actual: frame.arg_size(),
        });
    }
    Ok(())
}

/// Vehicle-network bytes tagged with the logical channel they belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelData {
    /// Host-assigned channel identifier.
    pub channel_id: u32,
    /// Rx status bits inbound, tx flags outbound.
    pub flags: u32,
    /// Device timestamp in microseconds; zero on outbound frames.
    pub timestamp: u32,
    /// Raw protocol bytes.
    pub data: Bytes,
}

impl ChannelData {
    /// Build the `CHANNEL_DATA` frame for this payload.
    pub fn to_frame(&self) -> Result<Frame> {
        if self.data.len() > MAX_CHANNEL_DATA {
            return Err(FrameError::ArgsTooLarge {
                size: CHANNEL_DATA_HEADER + self.data.len(),
                max: ARGS_CAPACITY,
            });
        }
        let mut args = BytesMut::with_capacity(CHANNEL_DATA_HEADER + self.data.len());
        args.put_u32_le(self.channel_id);
        args.put_u32_le(self.flags);
        args.put_u32_le(self.timestamp);
        args.put_slice(&self.data);
        Frame::new(CHANNEL_DATA, args.freeze())
    }

    /// Parse a `CHANNEL_DATA` frame.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        expect_command(frame, CHANNEL_DATA)?;
        expect_len(frame, "CHANNEL_DATA", CHANNEL_DATA_HEADER)?;

        let mut args = frame.args().clone();
        let channel_id = args.get_u32_le();
        let flags = args.get_u32_le();
        let timestamp = args.get_u32_le();
        Ok(Self {
            channel_id,
            flags,
            timestamp,
            data: args,
        })
    }
}

/// Device health carried by a heartbeat reply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PingReply {
    /// [`PING_STATUS_OK`] or a device-specific failure code.
    pub status: u8,
    /// Vehicle battery voltage in volts, as measured by the device.
    pub battery_volts: f32,
    /// Channels the device currently has open.
    pub active_channels: u8,
}

impl PingReply {
    /// Parse a `PING` reply.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        expect_command(frame, PING)?;
        expect_len(frame, "PING", PING_REPLY_LEN)?;

        let mut args = frame.args().clone();
        let status = args.get_u8();
        let battery_volts = args.get_f32_le();
        let active_channels = args.get_u8();
        Ok(Self {
            status,
            battery_volts,
            active_channels,
        })
    }

    /// Build the reply frame (device side; used by simulators).
    pub fn to_frame(&self) -> Frame {
        let mut args = BytesMut::with_capacity(PING_REPLY_LEN);
        args.put_u8(self.status);
        args.put_f32_le(self.battery_volts);
        args.put_u8(self.active_channels);
        Frame::empty(PING).with_args(args.freeze())
    }

    /// Whether the device reported itself healthy.
    pub fn is_ok(&self) -> bool {
        self.status == PING_STATUS_OK
    }

    /// Battery voltage in whole millivolts; negative or non-finite readings map to 0.
    pub fn battery_millivolts(&self) -> u32 {
        let mv = (self.battery_volts * 1000.0).round();
        if mv.is_finite() && mv > 0.0 {
            mv.min(u32::MAX as f32) as u32
        } else {
            0
        }
    }
}

/// Host announcement of a new logical channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenChannel {
    pub channel_id: u32,
    pub protocol_id: u32,
    pub baud_rate: u32,
    pub flags: u32,
}

impl OpenChannel {
    /// Build the `OPEN_CHANNEL` frame.
    pub fn to_frame(&self) -> Frame {
        let mut args = BytesMut::with_capacity(OPEN_CHANNEL_LEN);
        args.put_u32_le(self.channel_id);
        args.put_u32_le(self.protocol_id);
        args.put_u32_le(self.baud_rate);
        args.put_u32_le(self.flags);
        Frame::empty(OPEN_CHANNEL).with_args(args.freeze())
    }

    /// Parse an `OPEN_CHANNEL` frame.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        expect_command(frame, OPEN_CHANNEL)?;
        expect_len(frame, "OPEN_CHANNEL", OPEN_CHANNEL_LEN)?;

        let mut args = frame.args().clone();
        Ok(Self {
            channel_id: args.get_u32_le(),
            protocol_id: args.get_u32_le(),
            baud_rate: args.get_u32_le(),
            flags: args.get_u32_le(),
        })
    }
}

/// Host announcement that a channel is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseChannel {
    pub channel_id: u32,
}

impl CloseChannel {
    /// Build the `CLOSE_CHANNEL` frame.
    pub fn to_frame(&self) -> Frame {
        let mut args = BytesMut::with_capacity(CLOSE_CHANNEL_LEN);
        args.put_u32_le(self.channel_id);
        Frame::empty(CLOSE_CHANNEL).with_args(args.freeze())
    }

    /// Parse a `CLOSE_CHANNEL` frame.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        expect_command(frame, CLOSE_CHANNEL)?;
        expect_len(frame, "CLOSE_CHANNEL", CLOSE_CHANNEL_LEN)?;
        Ok(Self {
            channel_id: frame.args().clone().get_u32_le(),
        })
    }
}

/// Text of a device `LOG` frame, without trailing NULs.
pub fn log_text(frame: &Frame) -> Result<Cow<'_, str>> {
    expect_command(frame, LOG)?;
    let args = frame.args().as_ref();
    let end = args.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    Ok(String::from_utf8_lossy(&args[..end]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::EXIT;

    #[test]
    fn channel_data_layout() {
        let payload = ChannelData {
            channel_id: 7,
            flags: 0x40,
            timestamp: 0,
            data: Bytes::from_static(&[0x00, 0x00, 0x07, 0xE0, 0x09, 0x02]),
        };
        let frame = payload.to_frame().unwrap();

        assert_eq!(frame.cmd_id(), CHANNEL_DATA);
        assert_eq!(&frame.args()[..4], &7u32.to_le_bytes());
        assert_eq!(&frame.args()[4..8], &0x40u32.to_le_bytes());
        assert_eq!(&frame.args()[CHANNEL_DATA_HEADER..], payload.data.as_ref());
        assert_eq!(ChannelData::from_frame(&frame).unwrap(), payload);
    }

    #[test]
    fn channel_data_rejects_short_header() {
        let frame = Frame::new(CHANNEL_DATA, vec![1, 0, 0]).unwrap();
        let err = ChannelData::from_frame(&frame).unwrap_err();
        assert!(matches!(err, FrameError::Truncated { expected: 12, actual: 3, .. }));
    }

    #[test]
    fn channel_data_rejects_oversized_data() {
        let payload = ChannelData {
            channel_id: 1,
            flags: 0,
            timestamp: 0,
            data: Bytes::from(vec![0u8; MAX_CHANNEL_DATA + 1]),
        };
        assert!(matches!(payload.to_frame(), Err(FrameError::ArgsTooLarge { .. })));
    }

    #[test]
    fn ping_reply_byte_layout() {
        let mut args = vec![PING_STATUS_OK];
        args.extend_from_slice(&12.6f32.to_le_bytes());
        args.push(2);
        let frame = Frame::new(PING, args).unwrap();

        let reply = PingReply::from_frame(&frame).unwrap();
        assert!(reply.is_ok());
        assert_eq!(reply.active_channels, 2);
        assert_eq!(reply.battery_millivolts(), 12_600);
        assert_eq!(reply.to_frame(), frame);
    }

    #[test]
    fn ping_reply_clamps_bad_voltage() {
        let reply = PingReply {
            status: 1,
            battery_volts: -3.0,
            active_channels: 0,
        };
        assert!(!reply.is_ok());
        assert_eq!(reply.battery_millivolts(), 0);

        let reply = PingReply {
            battery_volts: f32::NAN,
            ..reply
        };
        assert_eq!(reply.battery_millivolts(), 0);
    }

    #[test]
    fn empty_ping_is_truncated_reply() {
        let err = PingReply::from_frame(&Frame::empty(PING)).unwrap_err();
        assert!(matches!(err, FrameError::Truncated { .. }));
    }

    #[test]
    fn decoders_check_command_id() {
        let err = CloseChannel::from_frame(&Frame::empty(EXIT)).unwrap_err();
        assert!(matches!(
            err,
            FrameError::UnexpectedCommand { expected: CLOSE_CHANNEL, actual: EXIT }
        ));
    }

    #[test]
    fn open_channel_fields_in_order() {
        let open = OpenChannel {
            channel_id: 3,
            protocol_id: 6,
            baud_rate: 500_000,
            flags: 0x100,
        };
        let frame = open.to_frame();
        assert_eq!(&frame.args()[8..12], &500_000u32.to_le_bytes());
        assert_eq!(OpenChannel::from_frame(&frame).unwrap(), open);
    }

    #[test]
    fn log_text_strips_padding() {
        let frame = Frame::new(LOG, b"CAN bus up\0\0".to_vec()).unwrap();
        assert_eq!(log_text(&frame).unwrap(), "CAN bus up");
    }
}
