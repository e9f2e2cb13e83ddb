//! Client-side connection lifecycle.
//!
//! One [`ClientSession`] owns one outbound TCP connection and the
//! loop that services it:
//!
//! ```text
//!  Disconnected ──► Discovering ──► Connecting ──► Connected
//!                        ▲               │              │
//!                        └───────────────┴──────────────┘
//!                         (connect failure / socket death)
//! ```
//!
//! While Connected, each iteration drains the outbound queue onto the
//! socket and performs one non-blocking read through the frame scanner
//! into the inbound queue, paced at `1 / send_rate`. Discovery waiting
//! blocks on a signal set by the probe callback or by [`stop`]
//! (shutdown never hangs on discovery).
//!
//! [`stop`]: ClientSession::stop

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::discovery::Probe;
use crate::dispatch::MessageEmitter;
use crate::message::Message;

/// Wait after a failed connect before retrying discovery.
const CONNECT_BACKOFF: Duration = Duration::from_millis(500);

/// Give up on an unresponsive connect attempt after this long.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const LOCK: &str = "session queue lock poisoned";

// ── SessionState ─────────────────────────────────────────────────

/// The lifecycle phase of a [`ClientSession`].
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Not started, or stopped. Initial / terminal state.
    #[default]
    Disconnected = 0,
    /// Probing the LAN for a server advertisement.
    Discovering = 1,
    /// TCP connect in flight to a discovered address.
    Connecting = 2,
    /// Live connection; queues are being serviced.
    Connected = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Discovering,
            2 => Self::Connecting,
            3 => Self::Connected,
            _ => Self::Disconnected,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Discovering => write!(f, "Discovering"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

// ── Queue policy ─────────────────────────────────────────────────

/// Append to a bounded queue, dropping the oldest entry on overflow.
/// Send calls never block; stale messages lose to fresh ones.
pub(crate) fn push_drop_oldest(
    queue: &Mutex<VecDeque<Message>>,
    capacity: usize,
    message: Message,
) {
    let mut queue = queue.lock().expect(LOCK);
    queue.push_back(message);
    while queue.len() > capacity.max(1) {
        queue.pop_front();
        debug!("outbound queue full; dropped oldest message");
    }
}

// ── ClientSession ────────────────────────────────────────────────

/// Client endpoint: discovers a server, keeps one TCP connection
/// alive, and exchanges framed messages through its queues.
pub struct ClientSession {
    config: LinkConfig,
    shared: Arc<SessionShared>,
    handle: Option<JoinHandle<()>>,
}

struct SessionShared {
    running: AtomicBool,
    state: AtomicU8,
    inbound: Mutex<VecDeque<Message>>,
    outbound: Mutex<VecDeque<Message>>,
    server_addr: Mutex<Option<std::net::SocketAddr>>,
    discovery_wake: Notify,
}

impl SessionShared {
    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

impl ClientSession {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            shared: Arc::new(SessionShared {
                running: AtomicBool::new(false),
                state: AtomicU8::new(SessionState::Disconnected as u8),
                inbound: Mutex::new(VecDeque::new()),
                outbound: Mutex::new(VecDeque::new()),
                server_addr: Mutex::new(None),
                discovery_wake: Notify::new(),
            }),
            handle: None,
        }
    }

    /// Spawn the session loop. Must be called on the Tokio runtime.
    /// Calling start on a running session is a no-op.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        self.shared.running.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        self.handle = Some(tokio::spawn(async move {
            run(shared, config).await;
        }));
    }

    /// Stop the session and wait for its loop to exit. Idempotent;
    /// after this returns the state is Disconnected and no further
    /// queue activity occurs.
    pub async fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.discovery_wake.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    /// Queue a message for delivery to the server.
    ///
    /// Never blocks; when the bounded queue is full the oldest queued
    /// message is dropped to admit this one.
    pub fn send(&self, message: Message) {
        push_drop_oldest(
            &self.shared.outbound,
            self.config.outbound_capacity,
            message,
        );
    }

    /// Current lifecycle state, readable from any thread.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }
}

impl MessageEmitter for ClientSession {
    fn has_queued_messages(&self) -> bool {
        !self.shared.inbound.lock().expect(LOCK).is_empty()
    }

    fn pop_message(&self) -> Option<Message> {
        self.shared.inbound.lock().expect(LOCK).pop_front()
    }
}

// ── Session loop ─────────────────────────────────────────────────

async fn run(shared: Arc<SessionShared>, config: LinkConfig) {
    let interval = config.send_interval();
    let mut probe = start_probe(&shared, &config).await;
    let mut stream: Option<TcpStream> = None;
    let mut rx_buf: Vec<u8> = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    while shared.running.load(Ordering::SeqCst) {
        match stream.take() {
            None => {
                stream = establish(&shared, &config, &mut probe).await;
                continue;
            }
            Some(mut sock) => {
                let dead = service_connection(&mut sock, &shared, &mut rx_buf, &mut chunk).await;
                if dead {
                    // Close before any new connect attempt opens a socket.
                    drop(sock);
                    rx_buf.clear();
                    *shared.server_addr.lock().expect(LOCK) = None;
                    shared.set_state(SessionState::Discovering);
                    if probe.is_none() {
                        probe = start_probe(&shared, &config).await;
                    }
                    continue;
                }
                stream = Some(sock);
            }
        }
        tokio::time::sleep(interval).await;
    }

    if let Some(mut probe) = probe.take() {
        probe.stop().await;
    }
    drop(stream);
    shared.set_state(SessionState::Disconnected);
    info!("client session stopped");
}

/// Start a probe whose updates publish the first (lowest-ordered)
/// advertised address and wake the session loop.
async fn start_probe(shared: &Arc<SessionShared>, config: &LinkConfig) -> Option<Probe> {
    let mut probe = Probe::new(
        &config.service_identity,
        config.discovery_port,
        config.broadcast_addr,
    );
    let subscriber = Arc::clone(shared);
    probe.subscribe(move |advertisements| {
        if let Some(advertisement) = advertisements.first() {
            *subscriber.server_addr.lock().expect(LOCK) = Some(advertisement.address);
            subscriber.discovery_wake.notify_one();
        }
    });
    match probe.start().await {
        Ok(()) => Some(probe),
        Err(e) => {
            warn!("failed to start discovery probe: {e}");
            None
        }
    }
}

/// Discovering / Connecting phase. Returns the connected socket, or
/// `None` when the loop should come around again (still waiting, or
/// the connect failed and discovery was restarted).
async fn establish(
    shared: &Arc<SessionShared>,
    config: &LinkConfig,
    probe: &mut Option<Probe>,
) -> Option<TcpStream> {
    let addr = shared.server_addr.lock().expect(LOCK).take();
    let Some(addr) = addr else {
        shared.set_state(SessionState::Discovering);
        debug!("waiting for server discovery");
        shared.discovery_wake.notified().await;
        return None;
    };

    // Free the discovery socket before going TCP.
    if let Some(mut probe) = probe.take() {
        probe.stop().await;
    }

    shared.set_state(SessionState::Connecting);
    info!(%addr, "connecting");
    let attempt = match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
        Ok(Ok(sock)) => Some(sock),
        Ok(Err(e)) => {
            warn!(%addr, "connect failed: {e}");
            None
        }
        Err(_) => {
            warn!(%addr, "connect timed out");
            None
        }
    };

    match attempt {
        Some(sock) => {
            // Interactive control traffic; no send coalescing delay.
            if let Err(e) = sock.set_nodelay(true) {
                warn!("set_nodelay failed: {e}");
            }
            shared.set_state(SessionState::Connected);
            info!(%addr, "connected");
            Some(sock)
        }
        None => {
            shared.set_state(SessionState::Discovering);
            *probe = start_probe(shared, config).await;
            tokio::time::sleep(CONNECT_BACKOFF).await;
            None
        }
    }
}

/// One Connected-state iteration: drain outbound, then one
/// non-blocking read pass. Returns `true` when the socket died.
async fn service_connection(
    sock: &mut TcpStream,
    shared: &SessionShared,
    rx_buf: &mut Vec<u8>,
    chunk: &mut [u8],
) -> bool {
    // Drain the outbound queue, one write per queued message.
    loop {
        let next = shared.outbound.lock().expect(LOCK).pop_front();
        let Some(message) = next else { break };
        if let Err(e) = sock.write_all(message.data()).await {
            warn!("write failed: {e}");
            return true;
        }
    }

    // One non-blocking check for inbound bytes.
    match sock.try_read(chunk) {
        Ok(0) => {
            info!("server closed the connection");
            true
        }
        Ok(n) => {
            rx_buf.extend_from_slice(&chunk[..n]);
            let mut consumed = 0;
            {
                let mut inbound = shared.inbound.lock().expect(LOCK);
                Message::from_stream(rx_buf, &mut consumed, rx_buf.len(), &mut inbound, None);
            }
            // Keep any partial trailing frame for the next read.
            rx_buf.drain(..consumed);
            false
        }
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => false,
        Err(e) => {
            warn!("read failed: {e}");
            true
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
