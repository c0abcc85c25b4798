use std::io::{ErrorKind, Write};

use bytes::{Bytes, BytesMut};
use ptbridge_link::LinkStream;

use crate::codec::{encode_frame, Frame, FrameConfig, FRAME_SIZE};
use crate::error::{FrameError, Result};

/// Writes complete frames to any `Write` stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(FRAME_SIZE),
            config,
        }
    }

    /// Write a complete frame (blocking).
    ///
    /// A stream that stops accepting bytes part-way through yields
    /// [`FrameError::IncompleteWrite`]; the frame is never silently truncated.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.buf.clear();
        encode_frame(frame, &mut self.buf);

        let total = self.buf.len();
        let mut offset = 0usize;
        while offset < total {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err)
                    if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    return Err(FrameError::IncompleteWrite {
                        written: offset,
                        total,
                    });
                }
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Encode and send arguments under a command id.
    pub fn send(&mut self, cmd_id: u16, args: &[u8]) -> Result<()> {
        let frame = Frame::new(cmd_id, Bytes::copy_from_slice(args))?;
        self.write_frame(&frame)
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameWriter<LinkStream> {
    /// Create a frame writer for a device link and apply the write timeout from config.
    pub fn with_config_link(mut inner: LinkStream, config: FrameConfig) -> Result<Self> {
        if let Some(timeout) = config.write_timeout {
            inner.set_write_timeout(timeout)?;
        }
        Ok(Self::with_config(inner, config))
    }
}
