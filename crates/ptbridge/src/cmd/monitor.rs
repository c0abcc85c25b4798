use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ptbridge_server::{Bridge, BridgeConfig};

use crate::cmd::{finish, install_ctrlc_handler, pause, MonitorArgs};
use crate::exit::{bridge_error, CliError, CliResult, DEVICE_ERROR, SUCCESS};
use crate::output::{print_health, OutputFormat};

pub fn run(args: MonitorArgs, format: OutputFormat, config: BridgeConfig) -> CliResult<i32> {
    let bridge = args.device.bridge(config)?;
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    bridge
        .start()
        .map_err(|err| bridge_error("start failed", err))?;
    let result = watch(&bridge, &args, format, &running);
    finish(&bridge, result)
}

fn watch(
    bridge: &Bridge,
    args: &MonitorArgs,
    format: OutputFormat,
    running: &AtomicBool,
) -> CliResult<i32> {
    let mut printed = 0usize;
    while pause(args.interval, running) {
        print_health(&bridge.device_health(), format);
        printed = printed.saturating_add(1);

        if !bridge.is_connected() {
            return Err(CliError::new(DEVICE_ERROR, "device link lost"));
        }
        if args.count.is_some_and(|count| printed >= count) {
            break;
        }
    }
    running.store(false, Ordering::SeqCst);
    Ok(SUCCESS)
}
