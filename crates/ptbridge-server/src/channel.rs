use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{BridgeError, Result};
use crate::filter::FilterSet;
use crate::message::PassThruMsg;
use crate::protocol::{ProtocolHandler, ProtocolId};
use crate::status;

/// Host-assigned logical channel identifier. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u32);

impl ChannelId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of a timed read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// This many messages were appended to the caller's buffer.
    Ready(usize),
    /// Nothing arrived before the timeout.
    TimedOut,
}

impl ReadStatus {
    pub fn count(self) -> usize {
        match self {
            Self::Ready(n) => n,
            Self::TimedOut => 0,
        }
    }

    /// J2534 status for a read: an empty buffer is reported, not raised.
    pub fn status_code(self) -> u32 {
        match self {
            Self::Ready(_) => status::STATUS_NOERROR,
            Self::TimedOut => status::ERR_BUFFER_EMPTY,
        }
    }
}

/// What happened to an inbound message offered to a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    Queued,
    /// Queued after dropping the oldest message.
    QueuedWithEviction,
    Filtered,
    Closed,
}

#[derive(Debug)]
struct InboundQueue {
    messages: VecDeque<PassThruMsg>,
    capacity: usize,
    dropped: u64,
    closed: bool,
}

/// One live logical channel: its handler, filters, and inbound queue.
#[derive(Debug)]
pub struct Channel {
    id: ChannelId,
    handler: Mutex<ProtocolHandler>,
    filters: Mutex<FilterSet>,
    queue: Mutex<InboundQueue>,
    readable: Condvar,
}

impl Channel {
    pub(crate) fn new(handler: ProtocolHandler, queue_capacity: usize, filter_limit: usize) -> Self {
        Self {
            id: handler.channel_id(),
            handler: Mutex::new(handler),
            filters: Mutex::new(FilterSet::new(filter_limit)),
            queue: Mutex::new(InboundQueue {
                messages: VecDeque::with_capacity(queue_capacity.min(64)),
                capacity: queue_capacity,
                dropped: 0,
                closed: false,
            }),
            readable: Condvar::new(),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn protocol(&self) -> ProtocolId {
        self.handler.lock().protocol()
    }

    pub(crate) fn handler(&self) -> &Mutex<ProtocolHandler> {
        &self.handler
    }

    pub(crate) fn filters(&self) -> &Mutex<FilterSet> {
        &self.filters
    }

    /// Run filters and queue the message if admitted.
    pub(crate) fn offer(&self, msg: PassThruMsg) -> Offer {
        if !self.filters.lock().admits(&msg.data) {
            return Offer::Filtered;
        }

        let mut queue = self.queue.lock();
        if queue.closed {
            return Offer::Closed;
        }
        let mut outcome = Offer::Queued;
        if queue.messages.len() >= queue.capacity {
            queue.messages.pop_front();
            queue.dropped += 1;
            outcome = Offer::QueuedWithEviction;
        }
        queue.messages.push_back(msg);
        drop(queue);
        self.readable.notify_all();
        outcome
    }

    /// Move up to `max` queued messages into `out`, waiting up to `timeout`
    /// for the first one.
    pub(crate) fn drain(
        &self,
        out: &mut Vec<PassThruMsg>,
        max: usize,
        timeout: Duration,
    ) -> Result<ReadStatus> {
        if max == 0 {
            return Ok(ReadStatus::Ready(0));
        }

        let deadline = Instant::now() + timeout;
        let mut queue = self.queue.lock();
        loop {
            if queue.closed {
                return Err(BridgeError::ChannelNotFound(self.id));
            }
            if !queue.messages.is_empty() {
                let n = max.min(queue.messages.len());
                out.extend(queue.messages.drain(..n));
                return Ok(ReadStatus::Ready(n));
            }
            if self.readable.wait_until(&mut queue, deadline).timed_out() {
                // A message or close may have raced the timeout.
                if queue.messages.is_empty() && !queue.closed {
                    return Ok(ReadStatus::TimedOut);
                }
            }
        }
    }

    /// Mark the channel dead and wake blocked readers.
    pub(crate) fn close(&self) {
        let mut queue = self.queue.lock();
        queue.closed = true;
        queue.messages.clear();
        drop(queue);
        self.readable.notify_all();
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().messages.len()
    }

    /// Messages evicted because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.queue.lock().dropped
    }
}
