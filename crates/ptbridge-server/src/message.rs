use bitflags::bitflags;
use bytes::Bytes;
use ptbridge_frame::{ChannelData, MAX_CHANNEL_DATA};

use crate::channel::ChannelId;
use crate::error::{BridgeError, Result};
use crate::protocol::ProtocolId;

bitflags! {
    /// Receive status bits reported by the device.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RxStatus: u32 {
        const TX_MSG_TYPE = 0x0000_0001;
        const START_OF_MESSAGE = 0x0000_0002;
        const RX_BREAK = 0x0000_0004;
        const TX_INDICATION = 0x0000_0008;
        const ISO15765_PADDING_ERROR = 0x0000_0010;
        const ISO15765_ADDR_TYPE = 0x0000_0080;
        const CAN_29BIT_ID = 0x0000_0100;
    }
}

bitflags! {
    /// Transmit flags passed through to the device.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TxFlags: u32 {
        const ISO15765_FRAME_PAD = 0x0000_0040;
        const ISO15765_ADDR_TYPE = 0x0000_0080;
        const CAN_29BIT_ID = 0x0000_0100;
        const WAIT_P3_MIN_ONLY = 0x0000_0200;
    }
}

/// One vehicle-network message as seen by API callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassThruMsg {
    pub protocol: ProtocolId,
    pub rx_status: RxStatus,
    pub tx_flags: TxFlags,
    /// Device timestamp in microseconds; zero for messages built on the host.
    pub timestamp: u32,
    pub data: Bytes,
}

impl PassThruMsg {
    /// An outbound message with no flags set.
    pub fn new(protocol: ProtocolId, data: impl Into<Bytes>) -> Self {
        Self {
            protocol,
            rx_status: RxStatus::empty(),
            tx_flags: TxFlags::empty(),
            timestamp: 0,
            data: data.into(),
        }
    }

    pub fn with_tx_flags(mut self, flags: TxFlags) -> Self {
        self.tx_flags = flags;
        self
    }

    /// Build from an inbound `CHANNEL_DATA` payload.
    ///
    /// Unknown status bits from the device are kept.
    pub fn from_channel_data(protocol: ProtocolId, payload: ChannelData) -> Self {
        Self {
            protocol,
            rx_status: RxStatus::from_bits_retain(payload.flags),
            tx_flags: TxFlags::empty(),
            timestamp: payload.timestamp,
            data: payload.data,
        }
    }

    /// Outbound payload for `channel`, rejecting data that cannot fit one frame.
    pub fn to_channel_data(&self, channel: ChannelId) -> Result<ChannelData> {
        if self.data.len() > MAX_CHANNEL_DATA {
            return Err(BridgeError::MessageTooLarge {
                size: self.data.len(),
                max: MAX_CHANNEL_DATA,
            });
        }
        Ok(ChannelData {
            channel_id: channel.get(),
            flags: self.tx_flags.bits(),
            timestamp: 0,
            data: self.data.clone(),
        })
    }

    pub fn data_len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_keeps_status_and_timestamp() {
        let msg = PassThruMsg::from_channel_data(
            ProtocolId::Can,
            ChannelData {
                channel_id: 2,
                flags: 0x0000_0102,
                timestamp: 1234,
                data: Bytes::from_static(&[0x00, 0x00, 0x07, 0xE8]),
            },
        );
        assert!(msg.rx_status.contains(RxStatus::CAN_29BIT_ID | RxStatus::START_OF_MESSAGE));
        assert_eq!(msg.timestamp, 1234);
        assert_eq!(msg.data_len(), 4);
    }

    #[test]
    fn outbound_carries_tx_flags() {
        let msg = PassThruMsg::new(ProtocolId::Iso15765, vec![0x00, 0x00, 0x07, 0xE0, 0x3E])
            .with_tx_flags(TxFlags::ISO15765_FRAME_PAD);
        let payload = msg.to_channel_data(ChannelId::new(9)).unwrap();
        assert_eq!(payload.channel_id, 9);
        assert_eq!(payload.flags, 0x40);
        assert_eq!(payload.timestamp, 0);
    }

    #[test]
    fn oversized_message_rejected() {
        let msg = PassThruMsg::new(ProtocolId::Can, vec![0u8; MAX_CHANNEL_DATA + 1]);
        let err = msg.to_channel_data(ChannelId::new(1)).unwrap_err();
        assert!(matches!(err, BridgeError::MessageTooLarge { max: MAX_CHANNEL_DATA, .. }));
    }
}
