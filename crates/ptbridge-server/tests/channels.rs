#![cfg(unix)]

mod support;

use std::time::{Duration, Instant};

use bytes::Bytes;
use ptbridge_frame::{
    ChannelData, CloseChannel, Frame, OpenChannel, CHANNEL_DATA, CLOSE_CHANNEL, OPEN_CHANNEL,
};
use ptbridge_server::{
    Bridge, BridgeConfig, BridgeError, ChannelId, FilterType, PassThruMsg, ProtocolId, ReadStatus,
    TxFlags,
};

use support::{fast_config, wait_until, SimDevice, SimOptions};

const CAN: u32 = 5;
const ISO15765: u32 = 6;

fn running() -> (SimDevice, Bridge) {
    let (device, connector) = SimDevice::start(SimOptions::default());
    let bridge = Bridge::new(connector, fast_config()).expect("bridge");
    bridge.start().expect("start");
    (device, bridge)
}

fn data_frame(channel: ChannelId, data: &[u8]) -> Frame {
    ChannelData {
        channel_id: channel.get(),
        flags: 0,
        timestamp: 99,
        data: Bytes::copy_from_slice(data),
    }
    .to_frame()
    .expect("channel data")
}

fn pass_all(bridge: &Bridge, id: ChannelId) {
    bridge
        .set_filter(id, FilterType::Pass, &[0x00], &[0x00], None)
        .expect("pass filter");
}

#[test]
fn iso15765_open_and_double_remove() {
    let (device, bridge) = running();

    let id = bridge.add_channel(ISO15765, 0, 500_000).expect("open");
    let opens = device.wait_for(OPEN_CHANNEL, 1, Duration::from_secs(1));
    let open = OpenChannel::from_frame(&opens[0]).expect("open layout");
    assert_eq!(
        open,
        OpenChannel {
            channel_id: id.get(),
            protocol_id: ISO15765,
            baud_rate: 500_000,
            flags: 0,
        }
    );

    bridge.remove_channel(id).expect("first remove");
    let closes = device.wait_for(CLOSE_CHANNEL, 1, Duration::from_secs(1));
    assert_eq!(CloseChannel::from_frame(&closes[0]).expect("close").channel_id, id.get());

    let err = bridge.remove_channel(id).unwrap_err();
    assert!(matches!(err, BridgeError::ChannelNotFound(gone) if gone == id));
    bridge.stop().expect("stop");
}

#[test]
fn channel_ids_are_never_reused() {
    let (_device, bridge) = running();
    let mut seen = Vec::new();
    for _ in 0..4 {
        let id = bridge.add_channel(CAN, 0, 500_000).expect("open");
        assert!(!seen.contains(&id));
        seen.push(id);
        bridge.remove_channel(id).expect("remove");
    }
    bridge.stop().expect("stop");
}

#[test]
fn no_filters_means_nothing_delivered() {
    let (device, bridge) = running();
    let id = bridge.add_channel(CAN, 0, 500_000).expect("open");

    device.inject(&data_frame(id, &[0x00, 0x00, 0x07, 0xE8, 0x01]));
    let mut out = Vec::new();
    let status = bridge
        .read_channel(id, &mut out, 10, Duration::from_millis(100))
        .expect("read");
    assert_eq!(status, ReadStatus::TimedOut);
    assert!(out.is_empty());
    bridge.stop().expect("stop");
}

#[test]
fn pass_filter_admits_only_matching_ids() {
    let (device, bridge) = running();
    let id = bridge.add_channel(CAN, 0, 500_000).expect("open");
    bridge
        .set_filter(
            id,
            FilterType::Pass,
            &[0xFF, 0xFF, 0xFF, 0xFF],
            &[0x00, 0x00, 0x07, 0xE8],
            None,
        )
        .expect("filter");

    device.inject(&data_frame(id, &[0x00, 0x00, 0x07, 0xE9, 0xAA]));
    device.inject(&data_frame(id, &[0x00, 0x00, 0x07, 0xE8, 0xBB]));

    let mut out = Vec::new();
    let status = bridge
        .read_channel(id, &mut out, 10, Duration::from_secs(2))
        .expect("read");
    assert_eq!(status, ReadStatus::Ready(1));
    assert_eq!(out[0].data.as_ref(), &[0x00, 0x00, 0x07, 0xE8, 0xBB]);
    assert_eq!(out[0].timestamp, 99);
    assert_eq!(out[0].protocol, ProtocolId::Can);

    let status = bridge
        .read_channel(id, &mut out, 10, Duration::from_millis(50))
        .expect("second read");
    assert_eq!(status, ReadStatus::TimedOut);
    bridge.stop().expect("stop");
}

#[test]
fn inbound_data_lands_only_in_tagged_channel() {
    let (device, bridge) = running();
    let a = bridge.add_channel(CAN, 0, 500_000).expect("a");
    let b = bridge.add_channel(CAN, 0, 250_000).expect("b");
    pass_all(&bridge, a);
    pass_all(&bridge, b);

    device.inject(&data_frame(a, &[0x01, 0x02]));
    let mut out = Vec::new();
    assert_eq!(
        bridge
            .read_channel(a, &mut out, 10, Duration::from_secs(2))
            .expect("read a"),
        ReadStatus::Ready(1)
    );
    assert!(wait_until(Duration::from_secs(1), || bridge.take_data_ready()));
    assert_eq!(
        bridge
            .read_channel(b, &mut out, 10, Duration::from_millis(50))
            .expect("read b"),
        ReadStatus::TimedOut
    );
    assert_eq!(out.len(), 1);
    bridge.stop().expect("stop");
}

#[test]
fn read_timeout_is_bounded() {
    let (_device, bridge) = running();
    let id = bridge.add_channel(CAN, 0, 500_000).expect("open");

    let mut out = Vec::new();
    let started = Instant::now();
    let status = bridge
        .read_channel(id, &mut out, 1, Duration::from_millis(100))
        .expect("read");
    let elapsed = started.elapsed();
    assert_eq!(status, ReadStatus::TimedOut);
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(600), "{elapsed:?}");
    bridge.stop().expect("stop");
}

#[test]
fn queued_data_returns_immediately_in_order() {
    let (device, bridge) = running();
    let id = bridge.add_channel(CAN, 0, 500_000).expect("open");
    pass_all(&bridge, id);

    for n in 0..3u8 {
        device.inject(&data_frame(id, &[n]));
    }
    assert!(wait_until(Duration::from_secs(2), || bridge
        .channel_info(id)
        .map(|info| info.queued == 3)
        .unwrap_or(false)));

    let mut out = Vec::new();
    let started = Instant::now();
    let status = bridge
        .read_channel(id, &mut out, 10, Duration::from_secs(5))
        .expect("read");
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(status, ReadStatus::Ready(3));
    assert_eq!(out.iter().map(|m| m.data[0]).collect::<Vec<_>>(), vec![0, 1, 2]);
    bridge.stop().expect("stop");
}

#[test]
fn write_channel_sends_tagged_frames() {
    let (device, bridge) = running();
    let id = bridge.add_channel(ISO15765, 0, 500_000).expect("open");

    let messages = [
        PassThruMsg::new(ProtocolId::Iso15765, vec![0x00, 0x00, 0x07, 0xDF, 0x01, 0x00])
            .with_tx_flags(TxFlags::ISO15765_FRAME_PAD),
        PassThruMsg::new(ProtocolId::Iso15765, vec![0x00, 0x00, 0x07, 0xE0, 0x09, 0x02]),
    ];
    let sent = bridge
        .write_channel(id, &messages, Duration::from_secs(1))
        .expect("write");
    assert_eq!(sent, 2);

    let frames = device.wait_for(CHANNEL_DATA, 2, Duration::from_secs(1));
    assert_eq!(frames.len(), 2);
    let first = ChannelData::from_frame(&frames[0]).expect("first");
    assert_eq!(first.channel_id, id.get());
    assert_eq!(first.flags, TxFlags::ISO15765_FRAME_PAD.bits());
    assert_eq!(first.data.as_ref(), &[0x00, 0x00, 0x07, 0xDF, 0x01, 0x00]);
    bridge.stop().expect("stop");
}

#[test]
fn invalid_requests_are_rejected_without_device_traffic() {
    let (device, bridge) = running();

    assert!(matches!(
        bridge.add_channel(1, 0, 10_400),
        Err(BridgeError::ProtocolNotSupported(1))
    ));
    assert!(matches!(
        bridge.add_channel(CAN, 0, 5_000_000),
        Err(BridgeError::InvalidBaudRate { .. })
    ));
    assert!(matches!(
        bridge.add_channel(CAN, 0x200, 500_000),
        Err(BridgeError::InvalidFlags { .. })
    ));
    assert!(matches!(
        bridge.set_filter(ChannelId::new(999), FilterType::Pass, &[0], &[0], None),
        Err(BridgeError::ChannelNotFound(_))
    ));
    std::thread::sleep(Duration::from_millis(50));
    assert!(device.wait_for(OPEN_CHANNEL, 1, Duration::ZERO).is_empty());
    bridge.stop().expect("stop");
}

#[test]
fn channel_limit_is_enforced() {
    let (device, connector) = SimDevice::start(SimOptions::default());
    let config = BridgeConfig {
        max_channels: 2,
        ..fast_config()
    };
    let bridge = Bridge::new(connector, config).expect("bridge");
    bridge.start().expect("start");

    bridge.add_channel(CAN, 0, 500_000).expect("first");
    bridge.add_channel(CAN, 0, 500_000).expect("second");
    assert!(matches!(
        bridge.add_channel(CAN, 0, 500_000),
        Err(BridgeError::ResourceExhausted(_))
    ));
    assert_eq!(device.wait_for(OPEN_CHANNEL, 2, Duration::from_secs(1)).len(), 2);
    bridge.stop().expect("stop");
}

#[test]
fn operations_before_start_report_not_connected() {
    let (_device, connector) = SimDevice::start(SimOptions::default());
    let bridge = Bridge::new(connector, fast_config()).expect("bridge");

    assert!(matches!(
        bridge.add_channel(CAN, 0, 500_000),
        Err(BridgeError::DeviceNotConnected)
    ));
    let mut out = Vec::new();
    assert!(matches!(
        bridge.read_channel(ChannelId::new(1), &mut out, 1, Duration::ZERO),
        Err(BridgeError::DeviceNotConnected)
    ));
}

#[test]
fn baud_rate_changes_are_validated_per_protocol() {
    let (_device, bridge) = running();
    let id = bridge.add_channel(CAN, 0, 500_000).expect("open");

    bridge.set_baud_rate(id, 250_000).expect("in range");
    assert_eq!(bridge.channel_info(id).expect("info").baud_rate, 250_000);
    assert!(matches!(
        bridge.set_baud_rate(id, 2_000_000),
        Err(BridgeError::InvalidBaudRate { .. })
    ));
    assert_eq!(bridge.channel_info(id).expect("info").baud_rate, 250_000);
    bridge.stop().expect("stop");
}

#[test]
fn last_error_describes_the_latest_failure() {
    let (_device, bridge) = running();
    assert_eq!(bridge.last_error(), None);

    let err = bridge.add_channel(1, 0, 10_400).unwrap_err();
    assert_eq!(bridge.last_error(), Some(err.to_string()));

    bridge.add_channel(CAN, 0, 500_000).expect("open");
    assert_eq!(bridge.last_error(), Some(err.to_string()));

    let err = bridge.remove_channel(ChannelId::new(999)).unwrap_err();
    assert!(matches!(err, BridgeError::ChannelNotFound(_)));
    assert_eq!(bridge.last_error(), Some(err.to_string()));
    bridge.stop().expect("stop");
}
