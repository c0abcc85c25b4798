use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use ptbridge_link::LinkStream;
use tracing::trace;

use crate::codec::{decode_frame, Frame, FrameConfig, FRAME_SIZE};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 4 * FRAME_SIZE;
const READ_CHUNK_SIZE: usize = 4 * FRAME_SIZE;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete frames.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = decode_frame(&mut self.buf)? {
                return Ok(frame);
            }

            match self.fill()? {
                0 => return Err(FrameError::ConnectionClosed),
                _ => continue,
            }
        }
    }

    /// Return a frame if one is complete after at most one read attempt.
    ///
    /// A read that times out or would block yields `Ok(None)`; the wait is
    /// bounded by the stream's read timeout.
    pub fn poll_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(frame) = decode_frame(&mut self.buf)? {
            return Ok(Some(frame));
        }

        match self.fill() {
            Ok(0) => Err(FrameError::ConnectionClosed),
            Ok(_) => decode_frame(&mut self.buf),
            Err(FrameError::Io(err))
                if matches!(
                    err.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn fill(&mut self) -> Result<usize> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.inner.read(&mut chunk) {
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    trace!(read = n, buffered = self.buf.len(), "link read");
                    return Ok(n);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Bytes received but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<LinkStream> {
    /// Create a frame reader for a device link and apply the read timeout from config.
    pub fn with_config_link(mut inner: LinkStream, config: FrameConfig) -> Result<Self> {
        if let Some(timeout) = config.read_timeout {
            inner.set_read_timeout(timeout)?;
        }
        Ok(Self::with_config(inner, config))
    }
}
