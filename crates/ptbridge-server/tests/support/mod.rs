//! A simulated passthru device on the far end of a socket pair.
#![allow(dead_code)]

use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use ptbridge_frame::{Frame, FrameError, FrameReader, FrameWriter, PingReply, PING};
use ptbridge_link::{Connector, LinkError, LinkStream};
use ptbridge_server::BridgeConfig;

/// Knobs for the simulated firmware.
#[derive(Debug, Clone, Copy)]
pub struct SimOptions {
    pub reply_to_ping: bool,
    pub battery_volts: f32,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            reply_to_ping: true,
            battery_volts: 12.6,
        }
    }
}

pub struct SimDevice {
    received: Arc<Mutex<Vec<Frame>>>,
    pings: Arc<AtomicUsize>,
    writer: Arc<Mutex<FrameWriter<UnixStream>>>,
    socket: UnixStream,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SimDevice {
    /// Start a device and return it with a connector for the host side.
    pub fn start(options: SimOptions) -> (Self, impl Connector) {
        let (host, device) = UnixStream::pair().expect("socket pair");
        device
            .set_read_timeout(Some(Duration::from_millis(10)))
            .expect("read timeout");

        let received = Arc::new(Mutex::new(Vec::new()));
        let pings = Arc::new(AtomicUsize::new(0));
        let writer = Arc::new(Mutex::new(FrameWriter::new(
            device.try_clone().expect("clone writer"),
        )));
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let mut reader = FrameReader::new(device.try_clone().expect("clone reader"));
            let received = Arc::clone(&received);
            let pings = Arc::clone(&pings);
            let writer = Arc::clone(&writer);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    match reader.poll_frame() {
                        Ok(Some(frame)) if frame.cmd_id() == PING => {
                            pings.fetch_add(1, Ordering::SeqCst);
                            if options.reply_to_ping {
                                let reply = PingReply {
                                    status: 0,
                                    battery_volts: options.battery_volts,
                                    active_channels: 0,
                                };
                                if writer.lock().write_frame(&reply.to_frame()).is_err() {
                                    break;
                                }
                            }
                        }
                        Ok(Some(frame)) => received.lock().push(frame),
                        Ok(None) => {}
                        Err(FrameError::ConnectionClosed) => break,
                        Err(err) if err.is_link_failure() => break,
                        Err(_) => {}
                    }
                }
            })
        };

        let connector = one_shot(host);
        (
            Self {
                received,
                pings,
                writer,
                socket: device,
                stop,
                handle: Some(handle),
            },
            connector,
        )
    }

    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    /// Every non-PING frame received so far.
    pub fn received(&self) -> Vec<Frame> {
        self.received.lock().clone()
    }

    /// Wait until `count` frames with `cmd_id` have arrived.
    pub fn wait_for(&self, cmd_id: u16, count: usize, timeout: Duration) -> Vec<Frame> {
        let deadline = Instant::now() + timeout;
        loop {
            let frames: Vec<Frame> = self
                .received
                .lock()
                .iter()
                .filter(|frame| frame.cmd_id() == cmd_id)
                .cloned()
                .collect();
            if frames.len() >= count || Instant::now() >= deadline {
                return frames;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    pub fn wait_for_pings(&self, count: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.ping_count() >= count)
    }

    /// Send a frame to the host.
    pub fn inject(&self, frame: &Frame) {
        self.writer.lock().write_frame(frame).expect("inject frame");
    }

    /// Stop accepting bytes from the host; host writes start failing.
    pub fn stop_reading(&self) {
        self.socket.shutdown(Shutdown::Read).expect("shutdown read");
    }

    /// Pull the plug: the host sees end-of-stream.
    pub fn unplug(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.socket.shutdown(Shutdown::Both);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        self.halt();
    }
}

/// A connector that hands out one prepared socket, then fails.
pub fn one_shot(stream: UnixStream) -> impl Connector {
    let slot = Mutex::new(Some(stream));
    move || -> ptbridge_link::Result<LinkStream> {
        slot.lock()
            .take()
            .map(LinkStream::from_unix)
            .ok_or_else(|| LinkError::Io(std::io::Error::other("device already taken")))
    }
}

/// Try `first`; once it stops handing out links, use `second`.
pub fn fallback(first: impl Connector, second: impl Connector) -> impl Connector {
    move || -> ptbridge_link::Result<LinkStream> { first.open().or_else(|_| second.open()) }
}

/// A connector for a device that is never there.
pub fn absent() -> impl Connector {
    || -> ptbridge_link::Result<LinkStream> {
        Err(LinkError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no device",
        )))
    }
}

/// Timings short enough for tests.
pub fn fast_config() -> BridgeConfig {
    BridgeConfig {
        startup_timeout: Duration::from_millis(500),
        shutdown_timeout: Duration::from_secs(2),
        heartbeat_interval: Duration::from_millis(50),
        heartbeat_timeout: Duration::from_millis(200),
        reconnect_interval: Duration::from_millis(10),
        ..BridgeConfig::default()
    }
}

pub fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}
