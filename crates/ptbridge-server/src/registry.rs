//! Live channel table: lifecycle announcements, inbound routing, timed I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use ptbridge_frame::{ChannelData, CloseChannel, Frame, OpenChannel};
use tracing::{debug, info, trace, warn};

use crate::channel::{Channel, ChannelId, Offer, ReadStatus};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::filter::{FilterId, FilterType};
use crate::message::PassThruMsg;
use crate::protocol::{ConnectFlags, ProtocolHandler, ProtocolId};
use crate::transport::FrameTransport;

/// What [`ChannelRegistry::route_inbound`] did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered(ChannelId),
    Filtered(ChannelId),
    UnknownChannel(u32),
    Malformed,
}

/// Read-only view of one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub protocol: ProtocolId,
    pub baud_rate: u32,
    pub flags: ConnectFlags,
    pub filters: usize,
    pub queued: usize,
    pub dropped: u64,
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    max_channels: usize,
    max_filters: usize,
    queue_capacity: usize,
}

/// Owns every live channel and the traffic flowing through them.
#[derive(Debug)]
pub struct ChannelRegistry {
    transport: Arc<FrameTransport>,
    channels: RwLock<HashMap<ChannelId, Arc<Channel>>>,
    next_id: AtomicU32,
    limits: Limits,
}

impl ChannelRegistry {
    pub fn new(transport: Arc<FrameTransport>, config: &BridgeConfig) -> Self {
        Self {
            transport,
            channels: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            limits: Limits {
                max_channels: config.max_channels,
                max_filters: config.max_filters_per_channel,
                queue_capacity: config.queue_capacity,
            },
        }
    }

    fn lookup(&self, id: ChannelId) -> Result<Arc<Channel>> {
        self.channels
            .read()
            .get(&id)
            .cloned()
            .ok_or(BridgeError::ChannelNotFound(id))
    }

    /// Validate, announce to the device, then register a new channel.
    ///
    /// Nothing is registered unless the announcement was sent.
    pub fn add_channel(&self, protocol_id: u32, flags: u32, baud_rate: u32) -> Result<ChannelId> {
        let id = ChannelId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let handler = ProtocolHandler::new(protocol_id, id, flags, baud_rate)?;
        let protocol = handler.protocol();
        if self.channels.read().len() >= self.limits.max_channels {
            return Err(BridgeError::ResourceExhausted("open channels"));
        }

        let open = OpenChannel {
            channel_id: id.get(),
            protocol_id,
            baud_rate,
            flags,
        };
        self.transport.send(&open.to_frame())?;

        let channel = Arc::new(Channel::new(
            handler,
            self.limits.queue_capacity,
            self.limits.max_filters,
        ));
        let mut channels = self.channels.write();
        if channels.len() >= self.limits.max_channels {
            drop(channels);
            self.announce_close(id);
            return Err(BridgeError::ResourceExhausted("open channels"));
        }
        channels.insert(id, channel);
        drop(channels);

        info!(channel = %id, %protocol, baud_rate, "channel opened");
        Ok(id)
    }

    /// Unregister a channel, wake its readers, and tell the device.
    pub fn remove_channel(&self, id: ChannelId) -> Result<()> {
        let channel = self
            .channels
            .write()
            .remove(&id)
            .ok_or(BridgeError::ChannelNotFound(id))?;
        channel.close();
        self.announce_close(id);
        info!(channel = %id, "channel closed");
        Ok(())
    }

    fn announce_close(&self, id: ChannelId) {
        let frame = CloseChannel {
            channel_id: id.get(),
        }
        .to_frame();
        if let Err(err) = self.transport.send(&frame) {
            warn!(channel = %id, %err, "could not announce channel close");
        }
    }

    /// Drop every channel without notifying the device.
    pub fn clear(&self) {
        let drained: Vec<_> = self.channels.write().drain().collect();
        for (_, channel) in &drained {
            channel.close();
        }
        if !drained.is_empty() {
            debug!(count = drained.len(), "channels cleared");
        }
    }

    /// Deliver one inbound `CHANNEL_DATA` frame to its channel's queue.
    pub fn route_inbound(&self, frame: &Frame) -> RouteOutcome {
        let payload = match ChannelData::from_frame(frame) {
            Ok(payload) => payload,
            Err(err) => {
                debug!(%err, "dropping malformed channel data");
                return RouteOutcome::Malformed;
            }
        };
        let raw_id = payload.channel_id;
        let Some(channel) = self.channels.read().get(&ChannelId::new(raw_id)).cloned() else {
            trace!(channel = raw_id, "data for unknown channel");
            return RouteOutcome::UnknownChannel(raw_id);
        };

        let msg = PassThruMsg::from_channel_data(channel.protocol(), payload);
        match channel.offer(msg) {
            Offer::Queued => RouteOutcome::Delivered(channel.id()),
            Offer::QueuedWithEviction => {
                debug!(channel = %channel.id(), "inbound queue full; oldest message dropped");
                RouteOutcome::Delivered(channel.id())
            }
            Offer::Filtered => RouteOutcome::Filtered(channel.id()),
            Offer::Closed => RouteOutcome::UnknownChannel(raw_id),
        }
    }

    /// Append up to `max` queued messages to `out`, waiting up to `timeout`
    /// for the first.
    pub fn request_channel_data(
        &self,
        id: ChannelId,
        out: &mut Vec<PassThruMsg>,
        max: usize,
        timeout: Duration,
    ) -> Result<ReadStatus> {
        self.lookup(id)?.drain(out, max, timeout)
    }

    /// Send messages in order as `CHANNEL_DATA` frames.
    ///
    /// Every message is validated before the first is sent. A failure after
    /// that reports how many were sent.
    pub fn send_payload(
        &self,
        id: ChannelId,
        messages: &[PassThruMsg],
        timeout: Duration,
    ) -> Result<usize> {
        let channel = self.lookup(id)?;
        let protocol = channel.protocol();
        let frames = messages
            .iter()
            .map(|msg| {
                if msg.protocol != protocol {
                    return Err(BridgeError::ProtocolMismatch {
                        expected: protocol,
                        actual: msg.protocol,
                    });
                }
                Ok(msg.to_channel_data(id)?.to_frame()?)
            })
            .collect::<Result<Vec<_>>>()?;

        let deadline = Instant::now() + timeout;
        for (sent, frame) in frames.iter().enumerate() {
            if sent > 0 && Instant::now() >= deadline {
                return Err(BridgeError::PartialWrite {
                    sent,
                    source: Box::new(BridgeError::Timeout(timeout)),
                });
            }
            if let Err(err) = self.transport.send(frame) {
                return Err(if sent == 0 {
                    err
                } else {
                    BridgeError::PartialWrite {
                        sent,
                        source: Box::new(err),
                    }
                });
            }
        }
        trace!(channel = %id, count = frames.len(), "messages sent");
        Ok(frames.len())
    }

    /// Install a filter on a channel.
    pub fn set_filter(
        &self,
        id: ChannelId,
        kind: FilterType,
        mask: &[u8],
        pattern: &[u8],
        flow_control: Option<&[u8]>,
    ) -> Result<FilterId> {
        let channel = self.lookup(id)?;
        let fc_allowed = channel.handler().lock().supports_flow_control();
        let filter = channel
            .filters()
            .lock()
            .add(kind, mask, pattern, flow_control, fc_allowed)?;
        debug!(channel = %id, filter = %filter, ?kind, "filter installed");
        Ok(filter)
    }

    pub fn remove_filter(&self, id: ChannelId, filter: FilterId) -> Result<()> {
        let channel = self.lookup(id)?;
        if channel.filters().lock().remove(filter) {
            debug!(channel = %id, filter = %filter, "filter removed");
            Ok(())
        } else {
            Err(BridgeError::FilterNotFound {
                channel: id,
                filter,
            })
        }
    }

    /// Change a channel's baud rate on the host side.
    pub fn set_baud_rate(&self, id: ChannelId, baud_rate: u32) -> Result<()> {
        self.lookup(id)?.handler().lock().set_baud_rate(baud_rate)
    }

    /// Change a channel's connect flags on the host side.
    pub fn set_flags(&self, id: ChannelId, flags: u32) -> Result<()> {
        self.lookup(id)?.handler().lock().set_flags(flags)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    pub fn channel_ids(&self) -> Vec<ChannelId> {
        let mut ids: Vec<_> = self.channels.read().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn channel_info(&self, id: ChannelId) -> Result<ChannelInfo> {
        let channel = self.lookup(id)?;
        let handler = channel.handler().lock().clone();
        let filters = channel.filters().lock().len();
        let info = ChannelInfo {
            id,
            protocol: handler.protocol(),
            baud_rate: handler.baud_rate(),
            flags: handler.flags(),
            filters,
            queued: channel.queued(),
            dropped: channel.dropped(),
        };
        Ok(info)
    }
}
