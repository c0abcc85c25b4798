use std::fmt;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::command::command_name;
use crate::error::{FrameError, Result};

/// Total wire size of every frame.
pub const FRAME_SIZE: usize = 512;

/// Frame header: command id (2) + declared argument length (2) = 4 bytes.
pub const HEADER_SIZE: usize = 4;

/// Argument bytes available in one frame.
pub const ARGS_CAPACITY: usize = FRAME_SIZE - HEADER_SIZE;

/// One command frame.
///
/// Only the declared argument bytes are kept; padding never leaves the codec.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    cmd_id: u16,
    args: Bytes,
}

impl Frame {
    /// Create a frame, rejecting arguments that do not fit.
    pub fn new(cmd_id: u16, args: impl Into<Bytes>) -> Result<Self> {
        let args = args.into();
        if args.len() > ARGS_CAPACITY {
            return Err(FrameError::ArgsTooLarge {
                size: args.len(),
                max: ARGS_CAPACITY,
            });
        }
        Ok(Self { cmd_id, args })
    }

    /// Create a frame with no arguments.
    pub fn empty(cmd_id: u16) -> Self {
        Self {
            cmd_id,
            args: Bytes::new(),
        }
    }

    /// Attach arguments known to fit (fixed-layout payloads built in this crate).
    pub(crate) fn with_args(mut self, args: Bytes) -> Self {
        debug_assert!(args.len() <= ARGS_CAPACITY);
        self.args = args;
        self
    }

    /// The command identifier.
    pub fn cmd_id(&self) -> u16 {
        self.cmd_id
    }

    /// The declared argument bytes.
    pub fn args(&self) -> &Bytes {
        &self.args
    }

    /// The declared argument length.
    pub fn arg_size(&self) -> usize {
        self.args.len()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("cmd", &format_args!("{}(0x{:02x})", command_name(self.cmd_id), self.cmd_id))
            .field("arg_size", &self.args.len())
            .finish()
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────────┬──────────────────────────────────┐
/// │ Command (2B) │ ArgSize (2B) │ Args (508B, zero-padded)         │
/// │ LE           │ LE           │                                  │
/// └──────────────┴──────────────┴──────────────────────────────────┘
/// ```
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) {
    let len = frame.args.len();
    dst.reserve(FRAME_SIZE);
    dst.put_u16_le(frame.cmd_id);
    // Frame::new caps args at ARGS_CAPACITY, well inside u16.
    dst.put_u16_le(len as u16);
    dst.put_slice(&frame.args);
    dst.put_bytes(0, ARGS_CAPACITY - len);
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// Whole frames are always consumed, including ones rejected for a bad
/// declared length, so the next call starts on a frame boundary.
pub fn decode_frame(src: &mut BytesMut) -> Result<Option<Frame>> {
    if src.len() < FRAME_SIZE {
        return Ok(None);
    }

    let mut frame = src.split_to(FRAME_SIZE);
    let cmd_id = frame.get_u16_le();
    let arg_size = frame.get_u16_le() as usize;

    if arg_size > ARGS_CAPACITY {
        return Err(FrameError::ArgsTooLarge {
            size: arg_size,
            max: ARGS_CAPACITY,
        });
    }

    frame.truncate(arg_size);
    Ok(Some(Frame {
        cmd_id,
        args: frame.freeze(),
    }))
}

/// Configuration for framed link I/O.
#[derive(Debug, Clone, Default)]
pub struct FrameConfig {
    /// Bound on a single link read. `None` leaves the link's own setting.
    pub read_timeout: Option<Duration>,
    /// Bound on a single link write. `None` leaves the link's own setting.
    pub write_timeout: Option<Duration>,
}
