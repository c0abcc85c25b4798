use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use ptbridge_frame::{
    log_text, ChannelData, CloseChannel, Frame, FrameError, FrameReader, FrameWriter,
    OpenChannel, PingReply, CHANNEL_DATA, CLOSE_CHANNEL, EXIT, LOG, OPEN_CHANNEL, PING,
    PING_STATUS_OK,
};
use tracing::{debug, info, warn};

use crate::cmd::{install_ctrlc_handler, SimulateArgs};
use crate::exit::{io_error, CliResult, SUCCESS};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);
const READ_SLICE: Duration = Duration::from_millis(20);

/// Arbitration id the simulated ECU answers from.
const ECU_RESPONSE_ID: [u8; 4] = [0x00, 0x00, 0x07, 0xE8];

pub fn run(args: SimulateArgs) -> CliResult<i32> {
    // A socket file left by an earlier run would make bind fail.
    if args.path.exists() {
        std::fs::remove_file(&args.path)
            .map_err(|err| io_error("remove stale socket failed", err))?;
    }
    let listener =
        UnixListener::bind(&args.path).map_err(|err| io_error("bind failed", err))?;
    listener
        .set_nonblocking(true)
        .map_err(|err| io_error("listener setup failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;
    info!(path = %args.path.display(), battery = args.battery, "simulated device listening");

    let result = accept_loop(&listener, &args, &running);
    let _ = std::fs::remove_file(&args.path);
    result
}

fn accept_loop(listener: &UnixListener, args: &SimulateArgs, running: &AtomicBool) -> CliResult<i32> {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                info!("host connected");
                match serve(stream, args, running) {
                    Ok(()) => info!("host session ended"),
                    Err(err) => warn!(error = %err, "host session failed"),
                }
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => std::thread::sleep(ACCEPT_BACKOFF),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(io_error("accept failed", err)),
        }
    }
    Ok(SUCCESS)
}

/// One host session: the device's view of the link.
struct Session<'a> {
    args: &'a SimulateArgs,
    writer: FrameWriter<UnixStream>,
    channels: BTreeMap<u32, OpenChannel>,
    started: Instant,
    last_chatter: Instant,
    counter: u16,
}

fn serve(stream: UnixStream, args: &SimulateArgs, running: &AtomicBool) -> Result<(), FrameError> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_SLICE))?;
    let mut reader = FrameReader::new(stream.try_clone()?);
    let mut session = Session {
        args,
        writer: FrameWriter::new(stream),
        channels: BTreeMap::new(),
        started: Instant::now(),
        last_chatter: Instant::now(),
        counter: 0,
    };
    session.log("simulator ready")?;

    while running.load(Ordering::SeqCst) {
        match reader.poll_frame() {
            Ok(Some(frame)) => {
                if !session.handle(&frame)? {
                    return Ok(());
                }
            }
            Ok(None) => {}
            Err(FrameError::ConnectionClosed) => return Ok(()),
            Err(err) if err.is_link_failure() => return Err(err),
            Err(err) => warn!(error = %err, "discarding bad frame"),
        }
        session.chatter()?;
    }
    Ok(())
}

impl Session<'_> {
    /// Returns false once the host has said goodbye.
    fn handle(&mut self, frame: &Frame) -> Result<bool, FrameError> {
        match frame.cmd_id() {
            PING => {
                let reply = PingReply {
                    status: PING_STATUS_OK,
                    battery_volts: self.args.battery,
                    active_channels: u8::try_from(self.channels.len()).unwrap_or(u8::MAX),
                };
                self.writer.write_frame(&reply.to_frame())?;
            }
            OPEN_CHANNEL => match OpenChannel::from_frame(frame) {
                Ok(open) => {
                    info!(
                        channel = open.channel_id,
                        protocol = open.protocol_id,
                        baud = open.baud_rate,
                        "channel opened"
                    );
                    self.channels.insert(open.channel_id, open);
                    self.log(&format!("channel {} open", open.channel_id))?;
                }
                Err(err) => warn!(error = %err, "bad OPEN_CHANNEL"),
            },
            CLOSE_CHANNEL => match CloseChannel::from_frame(frame) {
                Ok(close) => {
                    if self.channels.remove(&close.channel_id).is_some() {
                        info!(channel = close.channel_id, "channel closed");
                    }
                }
                Err(err) => warn!(error = %err, "bad CLOSE_CHANNEL"),
            },
            CHANNEL_DATA => match ChannelData::from_frame(frame) {
                Ok(data) if self.channels.contains_key(&data.channel_id) => {
                    debug!(channel = data.channel_id, len = data.data.len(), "echoing");
                    let echo = ChannelData {
                        flags: 0,
                        timestamp: self.timestamp(),
                        ..data
                    };
                    self.writer.write_frame(&echo.to_frame()?)?;
                }
                Ok(data) => debug!(channel = data.channel_id, "data for closed channel"),
                Err(err) => warn!(error = %err, "bad CHANNEL_DATA"),
            },
            EXIT => {
                info!("host exiting");
                return Ok(false);
            }
            LOG => {
                if let Ok(text) = log_text(frame) {
                    debug!(%text, "host log");
                }
            }
            other => debug!(cmd = other, "ignoring command"),
        }
        Ok(true)
    }

    /// Periodic traffic on every open channel, shaped like an engine-speed reply.
    fn chatter(&mut self) -> Result<(), FrameError> {
        let Some(period) = self.args.chatter else {
            return Ok(());
        };
        if self.last_chatter.elapsed() < period {
            return Ok(());
        }
        self.last_chatter = Instant::now();
        self.counter = self.counter.wrapping_add(1);

        let [hi, lo] = self.counter.to_be_bytes();
        let mut bytes = ECU_RESPONSE_ID.to_vec();
        bytes.extend_from_slice(&[0x04, 0x41, 0x0C, hi, lo]);
        let bytes = Bytes::from(bytes);

        let ids: Vec<u32> = self.channels.keys().copied().collect();
        for channel_id in ids {
            let data = ChannelData {
                channel_id,
                flags: 0,
                timestamp: self.timestamp(),
                data: bytes.clone(),
            };
            self.writer.write_frame(&data.to_frame()?)?;
        }
        Ok(())
    }

    fn log(&mut self, text: &str) -> Result<(), FrameError> {
        let frame = Frame::new(LOG, Bytes::copy_from_slice(text.as_bytes()))?;
        self.writer.write_frame(&frame)
    }

    /// Microseconds since the session began; wraps like a device counter.
    fn timestamp(&self) -> u32 {
        (self.started.elapsed().as_micros() & u128::from(u32::MAX)) as u32
    }
}
