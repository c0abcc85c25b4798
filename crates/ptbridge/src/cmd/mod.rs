use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args, Subcommand, ValueEnum};
use ptbridge_link::{SerialConnector, DEFAULT_BAUD_RATE};
use ptbridge_server::{Bridge, BridgeConfig, ProtocolId};

use crate::exit::{bridge_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod capture;
pub mod monitor;
pub mod send;
#[cfg(unix)]
pub mod simulate;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the bridge and print device health.
    Monitor(MonitorArgs),
    /// Open a channel and print received messages.
    Capture(CaptureArgs),
    /// Open a channel and transmit one message.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
    /// Run a simulated device on a Unix socket.
    #[cfg(unix)]
    Simulate(SimulateArgs),
}

pub fn run(command: Command, format: OutputFormat, config: BridgeConfig) -> CliResult<i32> {
    match command {
        Command::Monitor(args) => monitor::run(args, format, config),
        Command::Capture(args) => capture::run(args, format, config),
        Command::Send(args) => send::run(args, format, config),
        Command::Version(args) => version::run(args, format),
        #[cfg(unix)]
        Command::Simulate(args) => simulate::run(args),
    }
}

/// Where the bridge device is.
#[derive(Args, Debug, Clone)]
pub struct DeviceArgs {
    /// Serial port of the bridge device (e.g. /dev/ttyACM0).
    #[arg(
        long,
        value_name = "PATH",
        env = "PTBRIDGE_PORT",
        conflicts_with = "socket",
        required_unless_present = "socket"
    )]
    pub port: Option<String>,
    /// Serial line rate.
    #[arg(long, value_name = "N", default_value_t = DEFAULT_BAUD_RATE)]
    pub serial_baud: u32,
    /// Unix socket of a simulated device.
    #[arg(long, value_name = "PATH")]
    pub socket: Option<PathBuf>,
}

impl DeviceArgs {
    /// Build a bridge for the selected device. Nothing is opened yet.
    pub fn bridge(&self, config: BridgeConfig) -> CliResult<Bridge> {
        let bridge = match (&self.port, &self.socket) {
            (Some(port), None) => Bridge::new(
                SerialConnector::new(port.clone()).with_baud_rate(self.serial_baud),
                config,
            ),
            #[cfg(unix)]
            (None, Some(path)) => Bridge::new(ptbridge_link::UnixConnector::new(path), config),
            _ => {
                return Err(CliError::new(
                    USAGE,
                    "exactly one of --port or --socket is required",
                ))
            }
        };
        bridge.map_err(|err| bridge_error("invalid configuration", err))
    }
}

/// Vehicle protocols the device implements.
#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum ProtocolArg {
    Can,
    Iso9141,
    Iso15765,
}

impl From<ProtocolArg> for ProtocolId {
    fn from(arg: ProtocolArg) -> Self {
        match arg {
            ProtocolArg::Can => ProtocolId::Can,
            ProtocolArg::Iso9141 => ProtocolId::Iso9141,
            ProtocolArg::Iso15765 => ProtocolId::Iso15765,
        }
    }
}

/// Channel settings shared by `capture` and `send`.
#[derive(Args, Debug, Clone)]
pub struct ChannelArgs {
    /// Vehicle network protocol.
    #[arg(long, value_enum)]
    pub protocol: ProtocolArg,
    /// Vehicle network bit rate.
    #[arg(long, value_name = "N")]
    pub baud: u32,
    /// Connect flags (decimal or 0x-prefixed hex).
    #[arg(long, value_name = "FLAGS", default_value = "0", value_parser = parse_u32)]
    pub flags: u32,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    /// Exit after printing N snapshots.
    #[arg(long)]
    pub count: Option<usize>,
    /// Time between snapshots (e.g. 1s, 500ms).
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    pub interval: Duration,
}

#[derive(Args, Debug)]
pub struct CaptureArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    #[command(flatten)]
    pub channel: ChannelArgs,
    /// Filter mask as hex bytes.
    #[arg(long, default_value = "00", value_parser = parse_hex)]
    pub mask: HexBytes,
    /// Filter pattern as hex bytes.
    #[arg(long, default_value = "00", value_parser = parse_hex)]
    pub pattern: HexBytes,
    /// Install a flow-control filter answering with this message (ISO15765).
    #[arg(long, value_name = "HEX", value_parser = parse_hex)]
    pub flow_control: Option<HexBytes>,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
    /// Give up after this long (e.g. 10s, 500ms).
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    #[command(flatten)]
    pub channel: ChannelArgs,
    /// Message bytes as hex, including the CAN id (e.g. 000007DF0201 0C).
    #[arg(long, value_parser = parse_hex)]
    pub data: HexBytes,
    /// Transmit flags (decimal or 0x-prefixed hex).
    #[arg(long, value_name = "FLAGS", default_value = "0", value_parser = parse_u32)]
    pub tx_flags: u32,
    /// Write timeout (e.g. 1s, 500ms).
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    pub timeout: Duration,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[cfg(unix)]
#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Battery voltage to report in heartbeat replies.
    #[arg(long, default_value_t = 12.6)]
    pub battery: f32,
    /// Emit a frame on every open channel this often (e.g. 200ms).
    #[arg(long, value_parser = parse_duration)]
    pub chatter: Option<Duration>,
}

/// Parse `5s`, `250ms`, or a bare number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("duration must not be empty".to_string());
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration value: {input}"))?;
    if value == 0 {
        return Err("duration must be greater than zero".to_string());
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

/// Parse a decimal or `0x`-prefixed hex integer.
pub fn parse_u32(input: &str) -> Result<u32, String> {
    let input = input.trim();
    let parsed = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|_| format!("invalid number: {input}"))
}

/// Bytes given on the command line as hex.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

/// Parse hex bytes; spaces, colons, and a `0x` prefix are ignored.
pub fn parse_hex(input: &str) -> Result<HexBytes, String> {
    let cleaned: String = input
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    if cleaned.is_empty() {
        return Err("hex data must not be empty".to_string());
    }
    hex::decode(&cleaned)
        .map(HexBytes)
        .map_err(|err| format!("invalid hex data: {err}"))
}

pub fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

/// Sleep up to `duration`, waking early on Ctrl-C. Returns whether to keep going.
pub fn pause(duration: Duration, running: &AtomicBool) -> bool {
    const SLICE: Duration = Duration::from_millis(50);
    let deadline = Instant::now() + duration;
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(SLICE.min(deadline - now));
    }
    false
}

/// Stop the bridge, turning a shutdown failure into a CLI error only if
/// the command itself succeeded.
pub fn finish(bridge: &Bridge, result: CliResult<i32>) -> CliResult<i32> {
    let stopped = bridge
        .stop()
        .map_err(|err| bridge_error("shutdown failed", err));
    match (result, stopped) {
        (Ok(code), Ok(())) => Ok(code),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), _) => Err(err),
    }
}
