use ptbridge_server::{Bridge, BridgeConfig, PassThruMsg, ProtocolId, TxFlags};
use serde::Serialize;

use crate::cmd::{finish, SendArgs};
use crate::exit::{bridge_error, CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct SendOutput {
    channel: u32,
    protocol: &'static str,
    sent: usize,
    size: usize,
}

pub fn run(args: SendArgs, format: OutputFormat, config: BridgeConfig) -> CliResult<i32> {
    let bridge = args.device.bridge(config)?;
    bridge
        .start()
        .map_err(|err| bridge_error("start failed", err))?;
    let result = transmit(&bridge, &args, format);
    finish(&bridge, result)
}

fn transmit(bridge: &Bridge, args: &SendArgs, format: OutputFormat) -> CliResult<i32> {
    let protocol = ProtocolId::from(args.channel.protocol);
    let id = bridge
        .add_channel(protocol.as_raw(), args.channel.flags, args.channel.baud)
        .map_err(|err| bridge_error("open channel failed", err))?;

    let msg = PassThruMsg::new(protocol, args.data.0.clone())
        .with_tx_flags(TxFlags::from_bits_retain(args.tx_flags));
    let sent = bridge
        .write_channel(id, &[msg], args.timeout)
        .map_err(|err| bridge_error("write failed", err))?;

    let out = SendOutput {
        channel: id.get(),
        protocol: protocol.name(),
        sent,
        size: args.data.0.len(),
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table | OutputFormat::Pretty => println!(
            "sent {} message(s) of {} bytes on channel {} ({})",
            out.sent, out.size, out.channel, out.protocol
        ),
    }

    bridge
        .remove_channel(id)
        .map_err(|err| bridge_error("close channel failed", err))?;
    Ok(SUCCESS)
}
