use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ptbridge_server::{Bridge, BridgeConfig, FilterType, ProtocolId};

use crate::cmd::{finish, install_ctrlc_handler, CaptureArgs};
use crate::exit::{bridge_error, CliError, CliResult, SUCCESS, TIMEOUT};
use crate::output::{print_message, OutputFormat};

/// Longest single read, so Ctrl-C is noticed promptly.
const READ_SLICE: Duration = Duration::from_millis(100);
const BATCH: usize = 32;

pub fn run(args: CaptureArgs, format: OutputFormat, config: BridgeConfig) -> CliResult<i32> {
    let bridge = args.device.bridge(config)?;
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    bridge
        .start()
        .map_err(|err| bridge_error("start failed", err))?;
    let result = capture(&bridge, &args, format, &running);
    finish(&bridge, result)
}

fn capture(
    bridge: &Bridge,
    args: &CaptureArgs,
    format: OutputFormat,
    running: &AtomicBool,
) -> CliResult<i32> {
    let protocol = ProtocolId::from(args.channel.protocol);
    let id = bridge
        .add_channel(protocol.as_raw(), args.channel.flags, args.channel.baud)
        .map_err(|err| bridge_error("open channel failed", err))?;

    let (kind, flow_control) = match &args.flow_control {
        Some(fc) => (FilterType::FlowControl, Some(fc.0.as_slice())),
        None => (FilterType::Pass, None),
    };
    bridge
        .set_filter(id, kind, &args.mask.0, &args.pattern.0, flow_control)
        .map_err(|err| bridge_error("set filter failed", err))?;
    tracing::info!(channel = %id, %protocol, baud = args.channel.baud, "capturing");

    let deadline = args.timeout.map(|timeout| Instant::now() + timeout);
    let mut received = 0usize;
    let mut batch = Vec::with_capacity(BATCH);

    while running.load(Ordering::SeqCst) {
        let wait = match deadline {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    break;
                }
                left.min(READ_SLICE)
            }
            None => READ_SLICE,
        };
        let max = args
            .count
            .map_or(BATCH, |count| count.saturating_sub(received).min(BATCH));

        batch.clear();
        bridge
            .read_channel(id, &mut batch, max, wait)
            .map_err(|err| bridge_error("read failed", err))?;
        for msg in &batch {
            print_message(id, msg, format);
        }
        received += batch.len();

        if args.count.is_some_and(|count| received >= count) {
            return Ok(SUCCESS);
        }
    }

    match args.count {
        Some(count) if running.load(Ordering::SeqCst) => Err(CliError::new(
            TIMEOUT,
            format!("received {received} of {count} messages before timeout"),
        )),
        _ => Ok(SUCCESS),
    }
}
