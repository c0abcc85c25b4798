use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use ptbridge_server::{ChannelId, HealthSnapshot, PassThruMsg};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    channel: u32,
    protocol: &'a str,
    timestamp_us: u32,
    rx_status: u32,
    size: usize,
    data: String,
}

impl<'a> MessageOutput<'a> {
    fn new(channel: ChannelId, msg: &'a PassThruMsg) -> Self {
        Self {
            channel: channel.get(),
            protocol: msg.protocol.name(),
            timestamp_us: msg.timestamp,
            rx_status: msg.rx_status.bits(),
            size: msg.data.len(),
            data: hex::encode(&msg.data),
        }
    }
}

pub fn print_message(channel: ChannelId, msg: &PassThruMsg, format: OutputFormat) {
    let out = MessageOutput::new(channel, msg);
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHANNEL", "PROTOCOL", "TIMESTAMP", "STATUS", "DATA"])
                .add_row(vec![
                    out.channel.to_string(),
                    out.protocol.to_string(),
                    out.timestamp_us.to_string(),
                    format!("0x{:08x}", out.rx_status),
                    spaced_hex(&msg.data),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "channel={} {} t={}us status=0x{:08x} [{}] {}",
                out.channel,
                out.protocol,
                out.timestamp_us,
                out.rx_status,
                out.size,
                spaced_hex(&msg.data)
            );
        }
    }
}

#[derive(Serialize)]
struct HealthOutput {
    connected: bool,
    battery_millivolts: u32,
    active_channel_count: u8,
    heartbeat_age_ms: Option<u64>,
}

pub fn print_health(health: &HealthSnapshot, format: OutputFormat) {
    let out = HealthOutput {
        connected: health.connected,
        battery_millivolts: health.battery_millivolts,
        active_channel_count: health.active_channel_count,
        heartbeat_age_ms: health
            .heartbeat_age()
            .map(|age| u64::try_from(age.as_millis()).unwrap_or(u64::MAX)),
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let age = out
                .heartbeat_age_ms
                .map_or_else(|| "never".to_string(), |ms| format!("{ms}ms"));
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CONNECTED", "BATTERY", "CHANNELS", "LAST HEARTBEAT"])
                .add_row(vec![
                    out.connected.to_string(),
                    format!("{:.2} V", f64::from(out.battery_millivolts) / 1000.0),
                    out.active_channel_count.to_string(),
                    age,
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "connected={} battery={}mV channels={} heartbeat_age={}",
                out.connected,
                out.battery_millivolts,
                out.active_channel_count,
                out.heartbeat_age_ms
                    .map_or_else(|| "never".to_string(), |ms| format!("{ms}ms"))
            );
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn spaced_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
