//! Ask the engine for its speed over ISO 15765 and print the answer.
//!
//! Run against real hardware:
//!   cargo run --example obd-query -- /dev/ttyACM0
//!
//! Or against the simulator, which echoes requests back:
//!   cargo run --features cli -- simulate /tmp/ptbridge-sim.sock
//!   cargo run --example obd-query -- --socket /tmp/ptbridge-sim.sock

use std::time::Duration;

use ptbridge::link::SerialConnector;
use ptbridge::server::{Bridge, BridgeConfig, FilterType, PassThruMsg, ProtocolId, ReadStatus};

/// Functional broadcast id, mode 01, PID 0C (engine speed).
const REQUEST: [u8; 6] = [0x00, 0x00, 0x07, 0xDF, 0x01, 0x0C];

fn open(args: &[String]) -> Result<Bridge, Box<dyn std::error::Error>> {
    let config = BridgeConfig::default();
    match args {
        #[cfg(unix)]
        [flag, path] if flag == "--socket" => {
            Ok(Bridge::new(ptbridge::link::UnixConnector::new(path), config)?)
        }
        [port] => Ok(Bridge::new(SerialConnector::new(port.clone()), config)?),
        _ => Err("usage: obd-query <serial-port> | --socket <path>".into()),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let bridge = open(&args)?;
    bridge.start()?;

    let channel = bridge.add_channel(ProtocolId::Iso15765.as_raw(), 0, 500_000)?;
    // Responses from 0x7E8 pass; the device answers its flow control from 0x7E0.
    bridge.set_filter(
        channel,
        FilterType::FlowControl,
        &[0xFF, 0xFF, 0xFF, 0xFF],
        &[0x00, 0x00, 0x07, 0xE8],
        Some(&[0x00, 0x00, 0x07, 0xE0]),
    )?;
    // The simulator loops requests back; let them through too.
    bridge.set_filter(
        channel,
        FilterType::Pass,
        &[0xFF, 0xFF, 0xFF, 0xFF],
        &[0x00, 0x00, 0x07, 0xDF],
        None,
    )?;

    let request = PassThruMsg::new(ProtocolId::Iso15765, REQUEST.to_vec());
    bridge.write_channel(channel, &[request], Duration::from_secs(1))?;

    let mut replies = Vec::new();
    match bridge.read_channel(channel, &mut replies, 4, Duration::from_secs(2))? {
        ReadStatus::TimedOut => eprintln!("no reply within 2s"),
        ReadStatus::Ready(_) => {
            for reply in &replies {
                match reply.data.as_ref() {
                    [_, _, _, _, 0x41, 0x0C, hi, lo, ..] => {
                        let rpm = u32::from(u16::from_be_bytes([*hi, *lo])) / 4;
                        println!("engine speed: {rpm} rpm");
                    }
                    other => println!("reply: {other:02X?}"),
                }
            }
        }
    }

    println!(
        "battery: {} mV",
        bridge.read_battery_voltage().unwrap_or_default()
    );
    bridge.remove_channel(channel)?;
    bridge.stop()?;
    Ok(())
}
