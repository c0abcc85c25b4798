//! Protocol handler variants and their connect-time validation.

use std::fmt;
use std::ops::RangeInclusive;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::channel::ChannelId;
use crate::error::{BridgeError, Result};

/// J2534 protocol identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u32)]
pub enum ProtocolId {
    J1850Vpw = 1,
    J1850Pwm = 2,
    Iso9141 = 3,
    Iso14230 = 4,
    Can = 5,
    Iso15765 = 6,
}

impl ProtocolId {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::J1850Vpw),
            2 => Some(Self::J1850Pwm),
            3 => Some(Self::Iso9141),
            4 => Some(Self::Iso14230),
            5 => Some(Self::Can),
            6 => Some(Self::Iso15765),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::J1850Vpw => "J1850VPW",
            Self::J1850Pwm => "J1850PWM",
            Self::Iso9141 => "ISO9141",
            Self::Iso14230 => "ISO14230",
            Self::Can => "CAN",
            Self::Iso15765 => "ISO15765",
        }
    }

    /// Whether the device implements this protocol.
    pub fn is_supported(self) -> bool {
        matches!(self, Self::Can | Self::Iso9141 | Self::Iso15765)
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Connect flags accepted when opening a channel.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ConnectFlags: u32 {
        const CAN_29BIT_ID = 0x0000_0100;
        const ISO9141_NO_CHECKSUM = 0x0000_0200;
        const CAN_ID_BOTH = 0x0000_0800;
        const ISO9141_K_LINE_ONLY = 0x0000_1000;
    }
}

/// Which CAN identifier lengths a channel accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanIdMode {
    Standard,
    Extended,
    Both,
}

impl CanIdMode {
    fn from_flags(flags: ConnectFlags) -> Self {
        if flags.contains(ConnectFlags::CAN_ID_BOTH) {
            Self::Both
        } else if flags.contains(ConnectFlags::CAN_29BIT_ID) {
            Self::Extended
        } else {
            Self::Standard
        }
    }
}

/// Settings every handler variant carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerSettings {
    pub channel_id: ChannelId,
    pub baud_rate: u32,
    pub flags: ConnectFlags,
}

/// Raw CAN frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanConfig {
    pub settings: HandlerSettings,
    pub id_mode: CanIdMode,
}

/// K-line diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Iso9141Config {
    pub settings: HandlerSettings,
    /// The device appends and verifies the checksum byte.
    pub checksum: bool,
    /// Initialization uses the K line only, without L.
    pub k_line_only: bool,
}

/// ISO-TP over CAN; segmentation happens on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Iso15765Config {
    pub settings: HandlerSettings,
    pub id_mode: CanIdMode,
}

/// A validated per-channel protocol configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolHandler {
    Can(CanConfig),
    Iso9141(Iso9141Config),
    Iso15765(Iso15765Config),
}

fn baud_range(protocol: ProtocolId) -> RangeInclusive<u32> {
    match protocol {
        ProtocolId::Iso9141 | ProtocolId::Iso14230 => 1_200..=20_000,
        _ => 10_000..=1_000_000,
    }
}

fn allowed_flags(protocol: ProtocolId) -> ConnectFlags {
    match protocol {
        ProtocolId::Can | ProtocolId::Iso15765 => {
            ConnectFlags::CAN_29BIT_ID | ConnectFlags::CAN_ID_BOTH
        }
        ProtocolId::Iso9141 => {
            ConnectFlags::ISO9141_NO_CHECKSUM | ConnectFlags::ISO9141_K_LINE_ONLY
        }
        _ => ConnectFlags::empty(),
    }
}

fn check_baud(protocol: ProtocolId, baud: u32) -> Result<()> {
    let range = baud_range(protocol);
    if range.contains(&baud) {
        Ok(())
    } else {
        Err(BridgeError::InvalidBaudRate {
            protocol,
            baud,
            min: *range.start(),
            max: *range.end(),
        })
    }
}

fn check_flags(protocol: ProtocolId, raw: u32) -> Result<ConnectFlags> {
    ConnectFlags::from_bits(raw)
        .filter(|flags| allowed_flags(protocol).contains(*flags))
        .ok_or(BridgeError::InvalidFlags {
            protocol,
            flags: raw,
        })
}

impl ProtocolHandler {
    /// Select and validate the handler for `protocol_id`.
    pub fn new(protocol_id: u32, channel_id: ChannelId, flags: u32, baud_rate: u32) -> Result<Self> {
        let protocol = ProtocolId::from_raw(protocol_id)
            .filter(|protocol| protocol.is_supported())
            .ok_or(BridgeError::ProtocolNotSupported(protocol_id))?;
        check_baud(protocol, baud_rate)?;
        let flags = check_flags(protocol, flags)?;

        let settings = HandlerSettings {
            channel_id,
            baud_rate,
            flags,
        };
        let handler = match protocol {
            ProtocolId::Can => Self::Can(CanConfig {
                id_mode: CanIdMode::from_flags(flags),
                settings,
            }),
            ProtocolId::Iso15765 => Self::Iso15765(Iso15765Config {
                id_mode: CanIdMode::from_flags(flags),
                settings,
            }),
            _ => Self::Iso9141(Iso9141Config {
                checksum: !flags.contains(ConnectFlags::ISO9141_NO_CHECKSUM),
                k_line_only: flags.contains(ConnectFlags::ISO9141_K_LINE_ONLY),
                settings,
            }),
        };
        debug!(%channel_id, %protocol, baud_rate, flags = flags.bits(), "protocol handler created");
        Ok(handler)
    }

    pub fn protocol(&self) -> ProtocolId {
        match self {
            Self::Can(_) => ProtocolId::Can,
            Self::Iso9141(_) => ProtocolId::Iso9141,
            Self::Iso15765(_) => ProtocolId::Iso15765,
        }
    }

    fn settings(&self) -> &HandlerSettings {
        match self {
            Self::Can(cfg) => &cfg.settings,
            Self::Iso9141(cfg) => &cfg.settings,
            Self::Iso15765(cfg) => &cfg.settings,
        }
    }

    fn settings_mut(&mut self) -> &mut HandlerSettings {
        match self {
            Self::Can(cfg) => &mut cfg.settings,
            Self::Iso9141(cfg) => &mut cfg.settings,
            Self::Iso15765(cfg) => &mut cfg.settings,
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.settings().channel_id
    }

    pub fn baud_rate(&self) -> u32 {
        self.settings().baud_rate
    }

    pub fn flags(&self) -> ConnectFlags {
        self.settings().flags
    }

    /// Change the baud rate, keeping the old one if the new one is out of range.
    pub fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        check_baud(self.protocol(), baud_rate)?;
        self.settings_mut().baud_rate = baud_rate;
        Ok(())
    }

    /// Change the connect flags, keeping the old ones if the new ones are rejected.
    pub fn set_flags(&mut self, raw: u32) -> Result<()> {
        let flags = check_flags(self.protocol(), raw)?;
        match self {
            Self::Can(cfg) => cfg.id_mode = CanIdMode::from_flags(flags),
            Self::Iso15765(cfg) => cfg.id_mode = CanIdMode::from_flags(flags),
            Self::Iso9141(cfg) => {
                cfg.checksum = !flags.contains(ConnectFlags::ISO9141_NO_CHECKSUM);
                cfg.k_line_only = flags.contains(ConnectFlags::ISO9141_K_LINE_ONLY);
            }
        }
        self.settings_mut().flags = flags;
        Ok(())
    }

    /// Whether flow-control filters apply to this protocol.
    pub fn supports_flow_control(&self) -> bool {
        matches!(self, Self::Iso15765(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chan() -> ChannelId {
        ChannelId::new(1)
    }

    #[test]
    fn selects_variant_by_protocol() {
        let can = ProtocolHandler::new(5, chan(), 0, 500_000).unwrap();
        assert!(matches!(can, ProtocolHandler::Can(_)));
        assert_eq!(can.protocol(), ProtocolId::Can);

        let kline = ProtocolHandler::new(3, chan(), 0, 10_400).unwrap();
        assert!(matches!(kline, ProtocolHandler::Iso9141(ref cfg) if cfg.checksum));

        let isotp = ProtocolHandler::new(6, chan(), 0x100, 500_000).unwrap();
        assert!(matches!(
            isotp,
            ProtocolHandler::Iso15765(ref cfg) if cfg.id_mode == CanIdMode::Extended
        ));
        assert!(isotp.supports_flow_control());
        assert!(!can.supports_flow_control());
    }

    #[test]
    fn unknown_and_unimplemented_protocols_rejected() {
        for raw in [0, 1, 2, 4, 7, 0x8000] {
            let err = ProtocolHandler::new(raw, chan(), 0, 500_000).unwrap_err();
            assert!(matches!(err, BridgeError::ProtocolNotSupported(p) if p == raw));
        }
    }

    #[test]
    fn baud_out_of_range_rejected() {
        let err = ProtocolHandler::new(5, chan(), 0, 2_000_000).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::InvalidBaudRate { baud: 2_000_000, max: 1_000_000, .. }
        ));
        assert!(ProtocolHandler::new(3, chan(), 0, 500_000).is_err());
        assert!(ProtocolHandler::new(3, chan(), 0, 1_200).is_ok());
    }

    #[test]
    fn flags_checked_per_protocol() {
        let err = ProtocolHandler::new(5, chan(), 0x200, 500_000).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidFlags { flags: 0x200, .. }));
        assert!(ProtocolHandler::new(3, chan(), 0x100, 10_400).is_err());
        assert!(ProtocolHandler::new(5, chan(), 0x8000_0000, 500_000).is_err());

        let kline = ProtocolHandler::new(3, chan(), 0x1200, 10_400).unwrap();
        assert!(matches!(
            kline,
            ProtocolHandler::Iso9141(ref cfg) if !cfg.checksum && cfg.k_line_only
        ));
    }

    #[test]
    fn setters_revalidate_and_keep_old_value_on_error() {
        let mut handler = ProtocolHandler::new(5, chan(), 0, 500_000).unwrap();
        handler.set_baud_rate(250_000).unwrap();
        assert_eq!(handler.baud_rate(), 250_000);

        assert!(handler.set_baud_rate(5).is_err());
        assert_eq!(handler.baud_rate(), 250_000);

        handler.set_flags(0x800).unwrap();
        assert!(matches!(handler, ProtocolHandler::Can(ref cfg) if cfg.id_mode == CanIdMode::Both));
        assert!(handler.set_flags(0x1000).is_err());
        assert_eq!(handler.flags(), ConnectFlags::CAN_ID_BOTH);
    }

    #[test]
    fn protocol_id_roundtrips_raw_values() {
        for raw in 1..=6 {
            assert_eq!(ProtocolId::from_raw(raw).unwrap().as_raw(), raw);
        }
        assert_eq!(ProtocolId::Iso15765.to_string(), "ISO15765");
    }
}
