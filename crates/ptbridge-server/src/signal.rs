//! One-shot and level-triggered signals shared by the lifecycle and its workers.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A boolean condition that threads can set and wait on.
#[derive(Debug, Default)]
pub struct Signal {
    raised: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal and wake every waiter.
    pub fn set(&self) {
        *self.raised.lock() = true;
        self.cond.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *self.raised.lock()
    }

    /// Return whether the signal was raised, clearing it.
    pub fn take(&self) -> bool {
        std::mem::take(&mut *self.raised.lock())
    }

    pub fn reset(&self) {
        *self.raised.lock() = false;
    }

    /// Block until the signal is raised or `timeout` passes.
    ///
    /// Returns `true` if the signal is raised on return.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut raised = self.raised.lock();
        while !*raised {
            if self.cond.wait_until(&mut raised, deadline).timed_out() {
                break;
            }
        }
        *raised
    }
}

/// The signals one session's lifecycle and workers coordinate through.
#[derive(Debug, Default)]
pub struct LifecycleSignals {
    /// The link is ready; workers may begin.
    pub init_requested: Signal,
    /// Inbound channel data was delivered since the last `take`.
    pub data_ready: Signal,
    /// Workers must wind down.
    pub exit_requested: Signal,
    /// The receiver loop has returned.
    pub receiver_closed: Signal,
    /// The heartbeat loop has returned.
    pub heartbeat_closed: Signal,
}
