//! The owning client value and its event loop.
//!
//! One [`MeshClient`] per MUD process. `spawn` starts a dedicated tokio
//! task that owns every piece of mesh state; the host talks to it through
//! a bounded command queue and hears back exclusively through its own
//! [`HostAdapter`](crate::host::HostAdapter). Exactly one connection
//! attempt is ever in flight: connects run inline on the task, and
//! everything else waits its turn.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, timeout};
use tracing::{debug, info, warn};

use mvm_protocol::{Envelope, builders};

use crate::channels::ChannelRegistry;
use crate::commands::Command;
use crate::config::MeshConfig;
use crate::correlate::CorrelationMap;
use crate::directory::Directory;
use crate::error::MeshError;
use crate::history::HistoryLog;
use crate::host::HostAdapter;
use crate::rate::RateLimiter;
use crate::session::{Session, SessionError, WireEvent, spawn_reader};
use crate::state::{Heartbeat, LinkState, reconnect_delay};
use crate::ws::handshake;

type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Host-side commands waiting for the core; callers are rejected with a
/// capacity error rather than blocked when this fills.
const COMMAND_QUEUE_DEPTH: usize = 128;

// ---------------------------------------------------------------------------
// Core
// ---------------------------------------------------------------------------

/// All mesh state, owned by the client task.
///
/// Public so integration tests can drive `on_tick`/`dispatch` directly with
/// synthetic transports and instants; embedders use [`MeshClient`].
pub struct Core {
    pub(crate) cfg: MeshConfig,
    pub(crate) host: Arc<dyn HostAdapter>,
    /// Zero point for monotonic-seconds bookkeeping.
    epoch: Instant,
    state: LinkState,
    state_tx: watch::Sender<LinkState>,
    pub(crate) session: Option<Session<BoxWriter>>,
    wire_rx: Option<mpsc::Receiver<WireEvent>>,
    reader: Option<tokio::task::JoinHandle<()>>,
    pub(crate) heartbeat: Option<Heartbeat>,
    /// When the current connect/auth attempt began.
    connect_started: Option<Instant>,
    /// When the link last reached authenticated.
    pub(crate) connected_at: Option<Instant>,
    /// Consecutive failed attempts since the last authenticated session.
    pub(crate) failures: u32,
    next_attempt_at: Option<Instant>,
    pub(crate) channels: ChannelRegistry,
    pub(crate) history: HistoryLog,
    pub(crate) limiter: RateLimiter,
    pub(crate) directory: Directory,
    pub(crate) correlations: CorrelationMap,
}

/// Directory entries go stale after an hour.
const DIRECTORY_TTL_SECS: u64 = 3600;

impl Core {
    pub fn new(cfg: MeshConfig, host: Arc<dyn HostAdapter>) -> (Self, watch::Receiver<LinkState>) {
        let (state_tx, state_rx) = watch::channel(LinkState::Disconnected);
        let mut channels = ChannelRegistry::new();
        for name in &cfg.auto_join {
            // Validated at config load; a failure here is a programming error.
            let _ = channels.ensure(name);
        }
        let core = Self {
            epoch: Instant::now(),
            state: LinkState::Disconnected,
            state_tx,
            session: None,
            wire_rx: None,
            reader: None,
            heartbeat: None,
            connect_started: None,
            connected_at: None,
            failures: 0,
            next_attempt_at: None,
            channels,
            history: HistoryLog::new(cfg.limits.history_size, cfg.limits.channel_history),
            limiter: RateLimiter::new(cfg.limits.rate),
            directory: Directory::new(DIRECTORY_TTL_SECS),
            correlations: CorrelationMap::new(),
            cfg,
            host,
        };
        (core, state_rx)
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Consecutive failed attempts since the last authenticated session.
    pub fn failed_attempts(&self) -> u32 {
        self.failures
    }

    pub(crate) fn set_state(&mut self, state: LinkState) {
        if self.state != state {
            debug!(from = self.state.label(), to = state.label(), "link state change");
            self.state = state;
            let _ = self.state_tx.send(state);
        }
    }

    /// Monotonic seconds since the core was created.
    pub(crate) fn mono_secs(&self, now: Instant) -> u64 {
        now.duration_since(self.epoch).as_secs()
    }

    // -----------------------------------------------------------------------
    // Transport lifecycle
    // -----------------------------------------------------------------------

    /// Wire an upgraded byte stream in as the active transport.
    pub fn attach_transport<S>(&mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (wire_rx, reader) = spawn_reader(read_half, self.cfg.limits.buffer_size);
        self.session = Some(Session::new(
            Box::new(write_half) as BoxWriter,
            self.cfg.limits.buffer_size,
        ));
        self.wire_rx = Some(wire_rx);
        self.reader = Some(reader);
    }

    /// Send the auth envelope and move to `Authenticating`.
    pub async fn start_auth(&mut self, now: Instant) {
        self.connect_started = Some(now);
        self.set_state(LinkState::Authenticating);
        let auth = builders::auth(&self.cfg.mud_name, &self.cfg.token).build();
        self.send_record(&auth, now).await;
    }

    /// One full connection attempt: TCP connect, WebSocket upgrade, auth.
    pub async fn attempt_connect(&mut self, now: Instant) {
        let host = self.cfg.gateway.host.clone();
        let port = self.cfg.gateway.port;
        let path = self.cfg.gateway.path.clone();
        let connect_timeout = self.cfg.timing.connect_timeout;

        info!(gateway = %host, port, attempt = self.failures + 1, "connecting to mesh gateway");
        self.set_state(LinkState::Connecting);

        let mut stream =
            match timeout(connect_timeout, TcpStream::connect((host.as_str(), port))).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    warn!(error = %e, "gateway connect failed");
                    return self.record_failed_attempt(now);
                }
                Err(_) => {
                    warn!("gateway connect timed out");
                    return self.record_failed_attempt(now);
                }
            };

        self.set_state(LinkState::Handshaking);
        match timeout(
            connect_timeout,
            handshake::client_handshake(&mut stream, &host, port, &path),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "websocket handshake failed");
                return self.record_failed_attempt(now);
            }
            Err(_) => {
                warn!("websocket handshake timed out");
                return self.record_failed_attempt(now);
            }
        }

        self.attach_transport(stream);
        self.start_auth(now).await;
    }

    fn record_failed_attempt(&mut self, now: Instant) {
        self.teardown("connection attempt failed", true, now);
    }

    /// Drop the transport and schedule the next attempt.
    ///
    /// `failed_attempt` marks attempts that never reached authenticated;
    /// those count against `max_reconnects` and stretch the backoff.
    pub fn teardown(&mut self, reason: &str, failed_attempt: bool, now: Instant) {
        if self.state == LinkState::Fatal {
            return;
        }
        self.session = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.wire_rx = None;
        self.heartbeat = None;
        self.connect_started = None;
        self.connected_at = None;
        // In-flight request correlations die with the connection.
        self.correlations.clear();
        if failed_attempt {
            self.failures = self.failures.saturating_add(1);
        }
        let delay = reconnect_delay(
            self.cfg.timing.reconnect_delay,
            self.cfg.timing.retry_backoff,
            self.cfg.timing.max_retry_delay,
            self.failures,
        );
        self.next_attempt_at = Some(now + delay);
        info!(
            reason,
            failures = self.failures,
            retry_in_secs = delay.as_secs(),
            "mesh connection down"
        );
        self.set_state(LinkState::Disconnected);
    }

    /// Promote to authenticated; called by the router on auth success.
    pub(crate) fn on_authenticated(&mut self, now: Instant) {
        info!(mud = %self.cfg.mud_name, "authenticated with mesh gateway");
        self.failures = 0;
        self.next_attempt_at = None;
        self.connect_started = None;
        self.connected_at = Some(now);
        self.heartbeat = Some(Heartbeat::new(now));
        self.set_state(LinkState::Authenticated);
    }

    /// Operator-forced reconnect: drop the link and retry immediately.
    pub(crate) fn force_reconnect(&mut self, now: Instant) {
        self.teardown("operator reconnect", false, now);
        self.failures = 0;
        self.next_attempt_at = None;
    }

    /// Host-requested shutdown; terminal.
    pub async fn shutdown(&mut self) {
        info!("mesh client shutting down");
        if let Some(session) = self.session.as_mut() {
            session.send_close().await;
        }
        self.session = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.wire_rx = None;
        self.heartbeat = None;
        self.correlations.clear();
        self.set_state(LinkState::Fatal);
    }

    // -----------------------------------------------------------------------
    // Periodic work
    // -----------------------------------------------------------------------

    /// Once-per-second housekeeping: reconnect scheduling, auth timeout,
    /// heartbeat, liveness, cache expiry.
    pub async fn on_tick(&mut self, now: Instant) {
        match self.state {
            LinkState::Disconnected => {
                if self.failures >= self.cfg.timing.max_reconnects {
                    // Operator intervention (reconnect command) required.
                    return;
                }
                if self.next_attempt_at.is_none_or(|at| now >= at) {
                    self.attempt_connect(now).await;
                }
            }
            LinkState::Authenticating => {
                if self
                    .connect_started
                    .is_some_and(|started| now.duration_since(started) >= self.cfg.timing.connect_timeout)
                {
                    warn!("authentication timed out");
                    self.teardown("auth timeout", true, now);
                }
            }
            LinkState::Authenticated => {
                let interval = self.cfg.timing.ping_interval;
                if self.heartbeat.is_some_and(|hb| hb.expired(now, interval)) {
                    warn!("no pong from gateway, assuming the link is dead");
                    self.teardown("liveness failure", false, now);
                    return;
                }
                if self.heartbeat.is_some_and(|hb| hb.ping_due(now, interval)) {
                    let ping =
                        builders::ping(&self.cfg.mud_name, chrono::Utc::now().timestamp()).build();
                    self.send_record(&ping, now).await;
                    if let Some(hb) = self.heartbeat.as_mut() {
                        hb.record_ping(now);
                    }
                }
                let secs = self.mono_secs(now);
                self.correlations.purge(secs);
                self.directory.purge(secs);
            }
            _ => {}
        }
    }

    // -----------------------------------------------------------------------
    // Wire traffic
    // -----------------------------------------------------------------------

    /// Handle one event from the frame reader.
    pub async fn on_wire_event(&mut self, event: Option<WireEvent>, now: Instant) {
        match event {
            None => {
                // Reader task gone without a terminal event.
                self.wire_rx = None;
                if self.session.is_some() {
                    let failed = self.state != LinkState::Authenticated;
                    self.teardown("reader stopped", failed, now);
                }
            }
            Some(WireEvent::Record(text)) => match Envelope::parse(&text) {
                Ok(env) => {
                    let outbound = self.dispatch(&env, now);
                    for record in outbound {
                        self.send_record(&record, now).await;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "dropping malformed envelope");
                }
            },
            Some(WireEvent::Ping(payload)) => {
                if let Some(session) = self.session.as_mut() {
                    if let Err(e) = session.send_pong(&payload).await {
                        warn!(error = %e, "pong write failed");
                        let failed = self.state != LinkState::Authenticated;
                        self.teardown("write failure", failed, now);
                    }
                }
            }
            Some(WireEvent::Pong) => {
                if let Some(hb) = self.heartbeat.as_mut() {
                    hb.record_pong(now);
                }
            }
            Some(WireEvent::Closed) => {
                info!("gateway closed the connection");
                let failed = self.state != LinkState::Authenticated;
                self.teardown("peer close", failed, now);
            }
            Some(WireEvent::Failed(e)) => {
                warn!(error = %e, "transport failure");
                let failed = self.state != LinkState::Authenticated;
                self.teardown("transport failure", failed, now);
            }
        }
    }

    /// Send one outbound record, tearing the link down on write failure.
    /// Envelopes are never queued across reconnects; with no session they
    /// are dropped.
    pub async fn send_record(&mut self, text: &str, now: Instant) {
        let Some(session) = self.session.as_mut() else {
            debug!("no session, dropping outbound record");
            return;
        };
        match session.send_record(text).await {
            Ok(()) => {}
            Err(SessionError::Oversize { len, cap }) => {
                warn!(len, cap, "dropping oversized outbound record");
            }
            Err(e) => {
                warn!(error = %e, "write failed");
                let failed = self.state != LinkState::Authenticated;
                self.teardown("write failure", failed, now);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

enum LoopEvent {
    Tick,
    Cmd(Option<Command>),
    Wire(Option<WireEvent>),
}

async fn recv_wire(rx: &mut Option<mpsc::Receiver<WireEvent>>) -> Option<WireEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Drive the core until shutdown.
pub async fn run(mut core: Core, mut cmd_rx: mpsc::Receiver<Command>) {
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let event = tokio::select! {
            _ = tick.tick() => LoopEvent::Tick,
            cmd = cmd_rx.recv() => LoopEvent::Cmd(cmd),
            wire = recv_wire(&mut core.wire_rx) => LoopEvent::Wire(wire),
        };
        let now = Instant::now();
        match event {
            LoopEvent::Tick => core.on_tick(now).await,
            LoopEvent::Cmd(None) | LoopEvent::Cmd(Some(Command::Shutdown)) => {
                core.shutdown().await;
                break;
            }
            LoopEvent::Cmd(Some(cmd)) => {
                let outbound = core.handle_command(cmd, now);
                for record in outbound {
                    core.send_record(&record, now).await;
                }
            }
            LoopEvent::Wire(event) => core.on_wire_event(event, now).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle the host keeps. Command methods enqueue and return immediately;
/// all player-visible feedback arrives through the host adapter.
pub struct MeshClient {
    cmd_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<LinkState>,
    task: tokio::task::JoinHandle<()>,
}

impl MeshClient {
    /// Construct the core and start its task. Connection begins on the
    /// first tick.
    pub fn spawn(cfg: MeshConfig, host: Arc<dyn HostAdapter>) -> Self {
        let (core, state_rx) = Core::new(cfg, host);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let task = tokio::spawn(run(core, cmd_rx));
        Self {
            cmd_tx,
            state_rx,
            task,
        }
    }

    pub fn state(&self) -> LinkState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Authenticated
    }

    /// Wait until the link reaches `target`, up to `wait`.
    pub async fn wait_for_state(&self, target: LinkState, wait: Duration) -> bool {
        let mut rx = self.state_rx.clone();
        timeout(wait, async {
            while *rx.borrow_and_update() != target {
                if rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await
        .is_ok()
            && self.state() == target
    }

    fn enqueue(&self, cmd: Command) -> Result<(), MeshError> {
        self.cmd_tx.try_send(cmd).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                MeshError::Capacity("mesh command queue is full".to_owned())
            }
            mpsc::error::TrySendError::Closed(_) => {
                MeshError::Internal("mesh client task has stopped".to_owned())
            }
        })
    }

    // -- player command surface --

    pub fn tell(&self, from: &str, target: &str, message: &str) -> Result<(), MeshError> {
        self.enqueue(Command::Tell {
            from: from.to_owned(),
            target: target.to_owned(),
            message: message.to_owned(),
        })
    }

    pub fn emote(&self, from: &str, mud: &str, action: &str) -> Result<(), MeshError> {
        self.enqueue(Command::Emote {
            from: from.to_owned(),
            mud: mud.to_owned(),
            action: action.to_owned(),
        })
    }

    pub fn emote_to(&self, from: &str, target: &str, action: &str) -> Result<(), MeshError> {
        self.enqueue(Command::EmoteTo {
            from: from.to_owned(),
            target: target.to_owned(),
            action: action.to_owned(),
        })
    }

    pub fn channel_message(&self, from: &str, channel: &str, message: &str) -> Result<(), MeshError> {
        self.enqueue(Command::ChannelMsg {
            from: from.to_owned(),
            channel: channel.to_owned(),
            message: message.to_owned(),
        })
    }

    pub fn join(&self, from: &str, channel: &str) -> Result<(), MeshError> {
        self.enqueue(Command::Join {
            from: from.to_owned(),
            channel: channel.to_owned(),
        })
    }

    pub fn leave(&self, from: &str, channel: &str) -> Result<(), MeshError> {
        self.enqueue(Command::Leave {
            from: from.to_owned(),
            channel: channel.to_owned(),
        })
    }

    pub fn who(&self, from: &str, mud: &str) -> Result<(), MeshError> {
        self.enqueue(Command::Who {
            from: from.to_owned(),
            mud: mud.to_owned(),
        })
    }

    pub fn finger(&self, from: &str, target: &str) -> Result<(), MeshError> {
        self.enqueue(Command::Finger {
            from: from.to_owned(),
            target: target.to_owned(),
        })
    }

    pub fn locate(&self, from: &str, user: &str) -> Result<(), MeshError> {
        self.enqueue(Command::Locate {
            from: from.to_owned(),
            user: user.to_owned(),
        })
    }

    pub fn list_muds(&self, from: &str) -> Result<(), MeshError> {
        self.enqueue(Command::ListMuds {
            from: from.to_owned(),
        })
    }

    pub fn list_channels(&self, from: &str) -> Result<(), MeshError> {
        self.enqueue(Command::ListChannels {
            from: from.to_owned(),
        })
    }

    pub fn stats(&self, from: &str) -> Result<(), MeshError> {
        self.enqueue(Command::Stats {
            from: from.to_owned(),
        })
    }

    pub fn history(&self, from: &str, kind: &str, count: Option<usize>) -> Result<(), MeshError> {
        self.enqueue(Command::History {
            from: from.to_owned(),
            kind: kind.to_owned(),
            count,
        })
    }

    pub fn help(&self, from: &str) -> Result<(), MeshError> {
        self.enqueue(Command::Help {
            from: from.to_owned(),
        })
    }

    /// Privileged: the host is expected to gate this on its own admin
    /// levels before calling.
    pub fn reconnect(&self, from: &str) -> Result<(), MeshError> {
        self.enqueue(Command::Reconnect {
            from: from.to_owned(),
        })
    }

    pub fn notify_login(&self, user: &str) -> Result<(), MeshError> {
        self.enqueue(Command::NotifyLogin {
            user: user.to_owned(),
        })
    }

    pub fn notify_logout(&self, user: &str) -> Result<(), MeshError> {
        self.enqueue(Command::NotifyLogout {
            user: user.to_owned(),
        })
    }

    /// Stop the client task and close the gateway link.
    pub async fn shutdown(self) {
        let _ = self.cmd_tx.send(Command::Shutdown).await;
        let _ = self.task.await;
    }
}
