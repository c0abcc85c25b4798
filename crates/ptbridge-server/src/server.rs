//! Session lifecycle: startup, the receiver and heartbeat workers, shutdown.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use ptbridge_frame::{log_text, Frame, PingReply, CHANNEL_DATA, EXIT, LOG, PING};
use tracing::{debug, error, info, trace, warn};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::health::DeviceHealth;
use crate::registry::{ChannelRegistry, RouteOutcome};
use crate::signal::LifecycleSignals;
use crate::transport::FrameTransport;

/// How often a worker waiting for startup rechecks the exit signal.
const INIT_WAIT_SLICE: Duration = Duration::from_millis(20);

/// Where a [`CommServer`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        })
    }
}

struct Session {
    signals: Arc<LifecycleSignals>,
    receiver: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

/// State shared by both worker loops.
#[derive(Clone)]
struct Worker {
    transport: Arc<FrameTransport>,
    registry: Arc<ChannelRegistry>,
    health: Arc<DeviceHealth>,
    signals: Arc<LifecycleSignals>,
    may_continue: Arc<AtomicBool>,
    config: BridgeConfig,
}

/// Owns the worker threads for one device session at a time.
pub struct CommServer {
    transport: Arc<FrameTransport>,
    registry: Arc<ChannelRegistry>,
    health: Arc<DeviceHealth>,
    config: BridgeConfig,
    state: Mutex<LifecycleState>,
    may_continue: Arc<AtomicBool>,
    active_workers: Arc<AtomicUsize>,
    session: Mutex<Option<Session>>,
}

impl CommServer {
    pub fn new(
        transport: Arc<FrameTransport>,
        registry: Arc<ChannelRegistry>,
        health: Arc<DeviceHealth>,
        config: BridgeConfig,
    ) -> Self {
        Self {
            transport,
            registry,
            health,
            config,
            state: Mutex::new(LifecycleState::Stopped),
            may_continue: Arc::new(AtomicBool::new(false)),
            active_workers: Arc::new(AtomicUsize::new(0)),
            session: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    ///
    /// A session whose link dropped stays `Running` until [`CommServer::stop`],
    /// or until [`CommServer::start`] reaps it and opens a new one.
    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Worker threads spawned and not yet finished.
    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    /// A running session whose link dropped or whose workers have returned.
    fn session_ended(&self) -> bool {
        if !self.transport.is_connected() {
            return true;
        }
        self.session.lock().as_ref().is_some_and(|session| {
            session.signals.receiver_closed.is_set() || session.signals.heartbeat_closed.is_set()
        })
    }

    /// Whether inbound channel data arrived since the last call.
    pub fn take_data_ready(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|session| session.signals.data_ready.take())
    }

    /// Spawn the workers and wait for the device link.
    ///
    /// A no-op while a session is live. A session whose link dropped is
    /// stopped first and a new one started. On timeout the workers are
    /// joined and the server is back in [`LifecycleState::Stopped`].
    pub fn start(&self) -> Result<()> {
        if self.state() == LifecycleState::Running && self.session_ended() {
            info!("previous session ended; restarting");
            if let Err(err) = self.stop() {
                warn!(%err, "reaping the ended session");
            }
        }
        {
            let mut state = self.state.lock();
            match *state {
                LifecycleState::Running => return Ok(()),
                LifecycleState::Stopped => *state = LifecycleState::Starting,
                other => return Err(BridgeError::InvalidState(other)),
            }
        }

        match self.start_session() {
            Ok(session) => {
                *self.session.lock() = Some(session);
                *self.state.lock() = LifecycleState::Running;
                info!(endpoint = %self.transport.endpoint(), "bridge running");
                Ok(())
            }
            Err(err) => {
                *self.state.lock() = LifecycleState::Stopped;
                error!(%err, "bridge failed to start");
                Err(err)
            }
        }
    }

    fn start_session(&self) -> Result<Session> {
        let signals = Arc::new(LifecycleSignals::default());
        self.may_continue.store(true, Ordering::SeqCst);
        self.health.reset();
        let worker = Worker {
            transport: Arc::clone(&self.transport),
            registry: Arc::clone(&self.registry),
            health: Arc::clone(&self.health),
            signals: Arc::clone(&signals),
            may_continue: Arc::clone(&self.may_continue),
            config: self.config.clone(),
        };

        let receiver =
            match self.spawn_worker("ptbridge-rx", worker.clone(), Worker::run_receiver) {
                Ok(handle) => handle,
                Err(err) => {
                    self.abort(&signals, Vec::new());
                    return Err(err);
                }
            };
        let heartbeat = match self.spawn_worker("ptbridge-hb", worker, Worker::run_heartbeat) {
            Ok(handle) => handle,
            Err(err) => {
                self.abort(&signals, vec![receiver]);
                return Err(err);
            }
        };

        info!(endpoint = %self.transport.endpoint(), "waiting for device");
        if self.wait_for_link() {
            self.health.set_connected(true);
            signals.init_requested.set();
            Ok(Session {
                signals,
                receiver,
                heartbeat,
            })
        } else {
            self.abort(&signals, vec![receiver, heartbeat]);
            Err(BridgeError::StartupTimeout(self.config.startup_timeout))
        }
    }

    fn wait_for_link(&self) -> bool {
        let deadline = Instant::now() + self.config.startup_timeout;
        loop {
            if self.transport.is_connected() || self.transport.try_open() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(self.config.reconnect_interval.min(deadline - now));
        }
    }

    fn spawn_worker(
        &self,
        name: &str,
        worker: Worker,
        body: fn(Worker),
    ) -> Result<JoinHandle<()>> {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
        let guard = WorkerGuard(Arc::clone(&self.active_workers));
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _guard = guard;
                body(worker);
            })
            .map_err(BridgeError::Thread)
    }

    fn abort(&self, signals: &LifecycleSignals, handles: Vec<JoinHandle<()>>) {
        self.may_continue.store(false, Ordering::SeqCst);
        signals.exit_requested.set();
        for handle in handles {
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }
    }

    /// Tell the device we are leaving, stop the workers, and drop every channel.
    ///
    /// Always ends in [`LifecycleState::Stopped`]; reports
    /// [`BridgeError::ShutdownTimeout`] if a worker had to be abandoned.
    pub fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                LifecycleState::Stopped => return Ok(()),
                LifecycleState::Running => *state = LifecycleState::Stopping,
                other => return Err(BridgeError::InvalidState(other)),
            }
        }

        if let Err(err) = self.transport.send(&Frame::empty(EXIT)) {
            warn!(%err, "could not notify device of exit");
        }
        self.may_continue.store(false, Ordering::SeqCst);

        let mut clean = true;
        let session = self.session.lock().take();
        if let Some(session) = session {
            session.signals.exit_requested.set();
            let deadline = Instant::now() + self.config.shutdown_timeout;
            let receiver_done = session
                .signals
                .receiver_closed
                .wait_timeout(deadline.saturating_duration_since(Instant::now()));
            let heartbeat_done = session
                .signals
                .heartbeat_closed
                .wait_timeout(deadline.saturating_duration_since(Instant::now()));
            clean = receiver_done && heartbeat_done;

            for (name, handle, done) in [
                ("receiver", session.receiver, receiver_done),
                ("heartbeat", session.heartbeat, heartbeat_done),
            ] {
                if !done {
                    error!(worker = name, "worker did not exit in time; detaching");
                } else if handle.join().is_err() {
                    error!(worker = name, "worker thread panicked");
                }
            }
        }

        self.registry.clear();
        self.transport.disconnect();
        self.health.set_connected(false);
        *self.state.lock() = LifecycleState::Stopped;

        if clean {
            info!("bridge stopped");
            Ok(())
        } else {
            Err(BridgeError::ShutdownTimeout(self.config.shutdown_timeout))
        }
    }
}

impl Drop for CommServer {
    fn drop(&mut self) {
        if self.state() == LifecycleState::Running {
            if let Err(err) = self.stop() {
                debug!(%err, "stop during drop failed");
            }
        }
    }
}

/// Counts a worker as active until its thread body returns or unwinds.
struct WorkerGuard(Arc<AtomicUsize>);

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Worker {
    fn may_continue(&self) -> bool {
        self.may_continue.load(Ordering::SeqCst)
    }

    /// Block until startup succeeds (`true`) or is abandoned (`false`).
    fn await_init(&self) -> bool {
        loop {
            if self.signals.init_requested.wait_timeout(INIT_WAIT_SLICE) {
                return self.may_continue();
            }
            if self.signals.exit_requested.is_set() || !self.may_continue() {
                return false;
            }
        }
    }

    fn run_receiver(self) {
        debug!("receiver started");
        if self.await_init() {
            while self.may_continue() && self.transport.is_connected() {
                match self.transport.poll() {
                    Ok(Some(frame)) => self.dispatch(&frame),
                    Ok(None) => {}
                    Err(err) if self.transport.is_connected() => {
                        debug!(%err, "dropping unreadable frame");
                    }
                    Err(err) => warn!(%err, "receiver lost the device link"),
                }
            }
            if !self.transport.is_connected() {
                self.health.set_connected(false);
            }
        }
        debug!("receiver exiting");
        self.signals.receiver_closed.set();
    }

    fn dispatch(&self, frame: &Frame) {
        match frame.cmd_id() {
            PING => match PingReply::from_frame(frame) {
                Ok(reply) if reply.is_ok() => self.health.record_ping(&reply),
                Ok(reply) => warn!(status = reply.status, "device reported failure"),
                Err(err) => debug!(%err, "malformed heartbeat reply"),
            },
            CHANNEL_DATA => {
                if let RouteOutcome::Delivered(_) = self.registry.route_inbound(frame) {
                    self.signals.data_ready.set();
                }
            }
            LOG => match log_text(frame) {
                Ok(text) => info!(target: "ptbridge::device", "{text}"),
                Err(err) => debug!(%err, "unreadable device log"),
            },
            other => trace!(cmd = other, "ignoring frame"),
        }
    }

    fn run_heartbeat(self) {
        debug!("heartbeat started");
        if self.await_init() {
            while self.may_continue() && self.transport.is_connected() {
                if !self.ping() {
                    break;
                }
                if self
                    .signals
                    .exit_requested
                    .wait_timeout(self.config.heartbeat_interval)
                {
                    break;
                }
            }
        }
        debug!("heartbeat exiting");
        self.signals.heartbeat_closed.set();
    }

    /// One heartbeat exchange. Returns `false` when the session must end.
    fn ping(&self) -> bool {
        let request = Frame::empty(PING);
        match self
            .transport
            .send_and_await(&request, self.config.heartbeat_timeout)
        {
            Ok(reply) => {
                match PingReply::from_frame(&reply) {
                    Ok(reply) if reply.is_ok() => self.health.record_ping(&reply),
                    Ok(reply) => warn!(status = reply.status, "device reported failure"),
                    Err(err) => debug!(%err, "malformed heartbeat reply"),
                }
                true
            }
            Err(BridgeError::Timeout(_)) => {
                debug!("heartbeat reply not received in time");
                true
            }
            Err(err) => {
                let fatal = matches!(
                    err,
                    BridgeError::SendFailure(_) | BridgeError::DeviceNotConnected
                ) || !self.transport.is_connected();
                if !fatal {
                    debug!(%err, "heartbeat exchange failed");
                    return true;
                }
                error!(%err, "heartbeat failed; ending session");
                self.may_continue.store(false, Ordering::SeqCst);
                self.signals.exit_requested.set();
                self.transport.disconnect();
                self.health.set_connected(false);
                false
            }
        }
    }
}
