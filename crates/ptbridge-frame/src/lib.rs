//! Fixed-size command framing for the passthru bridge serial protocol.
//!
//! Every message on the link is exactly [`FRAME_SIZE`] bytes:
//! - A 2-byte little-endian command id
//! - A 2-byte little-endian declared argument length
//! - [`ARGS_CAPACITY`] argument bytes, zero-padded past the declared length
//!
//! Fixed sizing means a reader can always resynchronise on a frame boundary;
//! callers only ever see whole frames.

pub mod codec;
pub mod command;
pub mod error;
pub mod payload;
pub mod reader;
pub mod writer;

pub use codec::{decode_frame, encode_frame, Frame, FrameConfig, ARGS_CAPACITY, FRAME_SIZE, HEADER_SIZE};
pub use command::{
    command_name, CHANNEL_DATA, CLOSE_CHANNEL, EXIT, LOG, OPEN_CHANNEL, PING, VOLTAGE,
};
pub use error::{FrameError, Result};
pub use payload::{
    log_text, ChannelData, CloseChannel, OpenChannel, PingReply, CHANNEL_DATA_HEADER,
    MAX_CHANNEL_DATA, PING_STATUS_OK,
};
pub use reader::FrameReader;
pub use writer::FrameWriter;
