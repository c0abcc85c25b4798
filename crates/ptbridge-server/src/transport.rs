//! Connection-owning frame transport shared by the workers and API callers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use ptbridge_frame::{command_name, Frame, FrameConfig, FrameError, FrameReader, FrameWriter};
use ptbridge_link::{Connector, LinkStream};
use tracing::{debug, info, trace, warn};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};

/// Frames read during an exchange that were not the awaited reply.
const STASH_LIMIT: usize = 1024;

/// Sends and receives whole frames over the device link.
///
/// Writers serialize on the write half; the read half is shared between
/// the receiver loop ([`FrameTransport::poll`]) and request/reply
/// exchanges ([`FrameTransport::send_and_await`]). Frames an exchange reads
/// that are not its reply are stashed and handed to the next `poll`.
pub struct FrameTransport {
    connector: Box<dyn Connector>,
    frame_config: FrameConfig,
    poll_timeout: Duration,
    reader: Mutex<Option<FrameReader<LinkStream>>>,
    writer: Mutex<Option<FrameWriter<LinkStream>>>,
    exchange: Mutex<()>,
    stash: Mutex<VecDeque<Frame>>,
    connected: AtomicBool,
}

impl FrameTransport {
    pub fn new(connector: impl Connector + 'static, config: &BridgeConfig) -> Self {
        Self {
            connector: Box::new(connector),
            frame_config: FrameConfig {
                read_timeout: Some(config.poll_timeout),
                write_timeout: Some(config.heartbeat_timeout),
            },
            poll_timeout: config.poll_timeout,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            exchange: Mutex::new(()),
            stash: Mutex::new(VecDeque::new()),
            connected: AtomicBool::new(false),
        }
    }

    /// Endpoint description for logs.
    pub fn endpoint(&self) -> String {
        self.connector.describe()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Open the link unless already open. Returns whether the link is up.
    pub fn try_open(&self) -> bool {
        if self.is_connected() {
            return true;
        }
        match self.open() {
            Ok(()) => true,
            Err(err) => {
                debug!(endpoint = %self.endpoint(), %err, "device not available");
                false
            }
        }
    }

    fn open(&self) -> Result<()> {
        let link = self.connector.open()?;
        let read_half = link.try_clone()?;
        let reader = FrameReader::with_config_link(read_half, self.frame_config.clone())?;
        let writer = FrameWriter::with_config_link(link, self.frame_config.clone())?;

        let mut writer_slot = self.writer.lock();
        let mut reader_slot = self.reader.lock();
        *writer_slot = Some(writer);
        *reader_slot = Some(reader);
        self.stash.lock().clear();
        self.connected.store(true, Ordering::SeqCst);
        info!(endpoint = %self.endpoint(), "device link open");
        Ok(())
    }

    /// Close the link. Safe to call when already closed.
    pub fn disconnect(&self) {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        self.writer.lock().take();
        self.reader.lock().take();
        self.stash.lock().clear();
        if was_connected {
            info!(endpoint = %self.endpoint(), "device link closed");
        }
    }

    fn link_lost(&self, err: &FrameError) {
        if self.connected.swap(false, Ordering::SeqCst) {
            warn!(endpoint = %self.endpoint(), %err, "device link lost");
        }
    }

    /// Write one frame. Fails immediately when the link is down.
    pub fn send(&self, frame: &Frame) -> Result<()> {
        if !self.is_connected() {
            return Err(BridgeError::DeviceNotConnected);
        }
        let mut slot = self.writer.lock();
        let Some(writer) = slot.as_mut() else {
            return Err(BridgeError::DeviceNotConnected);
        };
        match writer.write_frame(frame) {
            Ok(()) => {
                trace!(cmd = command_name(frame.cmd_id()), len = frame.arg_size(), "frame sent");
                Ok(())
            }
            Err(err) => {
                if err.is_link_failure() {
                    slot.take();
                    self.link_lost(&err);
                }
                Err(BridgeError::SendFailure(err))
            }
        }
    }

    /// Return the next inbound frame, or `None` if nothing arrived within
    /// the poll timeout.
    pub fn poll(&self) -> Result<Option<Frame>> {
        if let Some(frame) = self.stash.lock().pop_front() {
            return Ok(Some(frame));
        }
        let Some(_exchange) = self.exchange.try_lock_for(self.poll_timeout) else {
            return Ok(None);
        };
        if let Some(frame) = self.stash.lock().pop_front() {
            return Ok(Some(frame));
        }
        self.read_once()
    }

    fn read_once(&self) -> Result<Option<Frame>> {
        if !self.is_connected() {
            return Err(BridgeError::DeviceNotConnected);
        }
        let mut slot = self.reader.lock();
        let Some(reader) = slot.as_mut() else {
            return Err(BridgeError::DeviceNotConnected);
        };
        match reader.poll_frame() {
            Ok(frame) => Ok(frame),
            Err(err) => {
                if err.is_link_failure() {
                    slot.take();
                    self.link_lost(&err);
                }
                Err(BridgeError::Frame(err))
            }
        }
    }

    fn stash_frame(&self, frame: Frame) {
        let mut stash = self.stash.lock();
        if stash.len() >= STASH_LIMIT {
            if let Some(old) = stash.pop_front() {
                warn!(?old, "stash full; dropping oldest inbound frame");
            }
        }
        stash.push_back(frame);
    }

    /// Send `request` and wait for the next frame with the same command id.
    ///
    /// Other frames read while waiting are kept for [`FrameTransport::poll`].
    pub fn send_and_await(&self, request: &Frame, timeout: Duration) -> Result<Frame> {
        let deadline = Instant::now() + timeout;
        let Some(_exchange) = self.exchange.try_lock_until(deadline) else {
            return Err(BridgeError::Timeout(timeout));
        };
        self.send(request)?;

        while Instant::now() < deadline {
            match self.read_once() {
                Ok(Some(reply)) if reply.cmd_id() == request.cmd_id() => return Ok(reply),
                Ok(Some(other)) => self.stash_frame(other),
                Ok(None) => {}
                Err(BridgeError::Frame(err)) if !err.is_link_failure() => {
                    debug!(%err, "discarding undecodable frame");
                }
                Err(err) => return Err(err),
            }
        }
        Err(BridgeError::Timeout(timeout))
    }
}

impl std::fmt::Debug for FrameTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameTransport")
            .field("endpoint", &self.endpoint())
            .field("connected", &self.is_connected())
            .finish()
    }
}
