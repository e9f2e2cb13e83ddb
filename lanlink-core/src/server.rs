//! Multi-connection server host.
//!
//! [`ServerHost`] owns the TCP listener, the discovery [`Beacon`], and
//! the bookkeeping for every accepted connection. One loop services
//! everything in fixed-cadence iterations: accept below capacity,
//! evict idle or dead connections, fan inbound bytes through the frame
//! scanner into the shared inbound queue (tagged with the connection
//! id), and drain the outbound queue to one or all connections.
//!
//! The connection list is touched only by the loop task; the
//! application sees connections come and go through [`ServerEvent`]s
//! and `client_count()`.

use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::discovery::Beacon;
use crate::dispatch::MessageEmitter;
use crate::error::LinkError;
use crate::message::{ConnectionId, Message};
use crate::session::push_drop_oldest;

const LOCK: &str = "server queue lock poisoned";

/// Connection lifecycle notifications, delivered through the channel
/// returned by [`ServerHost::take_events`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerEvent {
    ClientConnected(ConnectionId, SocketAddr),
    ClientDisconnected(ConnectionId, SocketAddr),
}

/// Bookkeeping for one accepted connection. Owned by the loop task.
struct ConnectionRecord {
    id: ConnectionId,
    addr: SocketAddr,
    stream: TcpStream,
    last_activity: Instant,
    rx_buf: Vec<u8>,
    dead: bool,
}

/// Server endpoint: advertises itself on the LAN and exchanges framed
/// messages with up to `max_clients` concurrent connections.
pub struct ServerHost {
    config: LinkConfig,
    shared: Arc<HostShared>,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<ServerEvent>>,
    bound_port: u16,
    handle: Option<JoinHandle<()>>,
}

struct HostShared {
    running: AtomicBool,
    inbound: Mutex<VecDeque<Message>>,
    outbound: Mutex<VecDeque<Message>>,
    client_count: AtomicUsize,
}

impl ServerHost {
    pub fn new(config: LinkConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            shared: Arc::new(HostShared {
                running: AtomicBool::new(false),
                inbound: Mutex::new(VecDeque::new()),
                outbound: Mutex::new(VecDeque::new()),
                client_count: AtomicUsize::new(0),
            }),
            events_tx,
            events_rx: Some(events_rx),
            bound_port: 0,
            handle: None,
        }
    }

    /// Bind the TCP listener, start the discovery beacon advertising
    /// the bound port, and spawn the connection loop.
    ///
    /// Errors only on resource allocation (bind) failure. Calling
    /// start on a running host is a no-op.
    pub async fn start(&mut self) -> Result<(), LinkError> {
        if self.handle.is_some() {
            return Ok(());
        }
        let listener =
            TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.config.tcp_port)))
                .await?;
        self.bound_port = listener.local_addr()?.port();

        let mut beacon = Beacon::new(
            &self.config.service_identity,
            self.bound_port,
            self.config.discovery_port,
        );
        beacon.set_payload(&self.config.beacon_payload);
        beacon.start().await?;

        info!(port = self.bound_port, "server started");
        self.shared.running.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        let events = self.events_tx.clone();
        self.handle = Some(tokio::spawn(async move {
            run(listener, beacon, shared, config, events).await;
        }));
        Ok(())
    }

    /// Stop the host: close every connection, drop the listener, stop
    /// the beacon, and wait for the loop to exit. Idempotent.
    pub async fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    /// Queue a message for delivery. With a target id it goes to that
    /// connection only; without, it is broadcast to every connection.
    /// Bounded drop-oldest, never blocks.
    pub fn send(&self, message: Message, target: Option<ConnectionId>) {
        push_drop_oldest(
            &self.shared.outbound,
            self.config.outbound_capacity,
            message.with_origin(target),
        );
    }

    /// Number of live connections, updated by the loop task.
    pub fn client_count(&self) -> usize {
        self.shared.client_count.load(Ordering::SeqCst)
    }

    /// The port the listener actually bound (useful with `tcp_port = 0`).
    pub fn local_port(&self) -> u16 {
        self.bound_port
    }

    /// Take the connection event channel. Yields `Some` once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ServerEvent>> {
        self.events_rx.take()
    }
}

impl MessageEmitter for ServerHost {
    fn has_queued_messages(&self) -> bool {
        !self.shared.inbound.lock().expect(LOCK).is_empty()
    }

    fn pop_message(&self) -> Option<Message> {
        self.shared.inbound.lock().expect(LOCK).pop_front()
    }
}

// ── Connection loop ──────────────────────────────────────────────

async fn run(
    listener: TcpListener,
    mut beacon: Beacon,
    shared: Arc<HostShared>,
    config: LinkConfig,
    events: mpsc::UnboundedSender<ServerEvent>,
) {
    let interval = config.send_interval();
    let timeout = config.client_timeout();
    let tcp_port = listener.local_addr().map(|a| a.port()).unwrap_or(config.tcp_port);
    let mut listener = Some(listener);
    let mut connections: Vec<ConnectionRecord> = Vec::new();
    let mut next_id: u64 = 1;
    let mut chunk = [0u8; 4096];

    while shared.running.load(Ordering::SeqCst) {
        accept_phase(
            &mut listener,
            &mut connections,
            &config,
            tcp_port,
            &events,
            &mut next_id,
        )
        .await;

        sweep_idle(&mut connections, timeout, &events);
        shared
            .client_count
            .store(connections.len(), Ordering::SeqCst);

        read_phase(&mut connections, &shared, &mut chunk);
        drain_outbound(&mut connections, &shared).await;

        tokio::time::sleep(interval).await;
    }

    // Shutdown: sockets close on drop.
    if !connections.is_empty() {
        info!(count = connections.len(), "closing client connections");
    }
    connections.clear();
    shared.client_count.store(0, Ordering::SeqCst);
    drop(listener);
    beacon.stop().await;
    info!("server stopped");
}

/// Accept pending connections while below capacity. At capacity the
/// listener is dropped so new attempts wait in the OS backlog; once a
/// slot frees it is re-bound. The stop/re-bind window is a documented
/// best-effort race, not a hard guarantee.
async fn accept_phase(
    listener: &mut Option<TcpListener>,
    connections: &mut Vec<ConnectionRecord>,
    config: &LinkConfig,
    tcp_port: u16,
    events: &mpsc::UnboundedSender<ServerEvent>,
    next_id: &mut u64,
) {
    let max = config.max_clients.max(1);

    if connections.len() < max && listener.is_none() {
        match TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, tcp_port))).await {
            Ok(bound) => {
                info!("capacity available; accepting connections again");
                *listener = Some(bound);
            }
            Err(e) => warn!("failed to re-bind listener: {e}"),
        }
    }

    if let Some(bound) = listener.as_ref() {
        while connections.len() < max {
            // Zero timeout: take a connection if one is already pending.
            match tokio::time::timeout(Duration::ZERO, bound.accept()).await {
                Ok(Ok((stream, addr))) => {
                    let id = ConnectionId(*next_id);
                    *next_id += 1;
                    info!(%id, %addr, "client connected");
                    connections.push(ConnectionRecord {
                        id,
                        addr,
                        stream,
                        last_activity: Instant::now(),
                        rx_buf: Vec::new(),
                        dead: false,
                    });
                    let _ = events.send(ServerEvent::ClientConnected(id, addr));
                }
                Ok(Err(e)) => {
                    warn!("accept failed: {e}");
                    break;
                }
                Err(_) => break,
            }
        }
    }

    if connections.len() >= max && listener.take().is_some() {
        info!(max_clients = max, "at capacity; not accepting new connections");
    }
}

/// Evict connections that have been idle past the timeout or were
/// flagged dead by an I/O failure.
fn sweep_idle(
    connections: &mut Vec<ConnectionRecord>,
    timeout: Duration,
    events: &mpsc::UnboundedSender<ServerEvent>,
) {
    let now = Instant::now();
    connections.retain(|record| {
        let idle = now.duration_since(record.last_activity);
        let evict = record.dead || idle > timeout;
        if evict {
            info!(
                id = %record.id,
                addr = %record.addr,
                idle_secs = idle.as_secs_f64(),
                dead = record.dead,
                "client disconnected"
            );
            let _ = events.send(ServerEvent::ClientDisconnected(record.id, record.addr));
        }
        !evict
    });
}

/// Drain available bytes from every connection through the frame
/// scanner into the shared inbound queue. A decoded frame refreshes
/// the connection's activity timestamp.
fn read_phase(connections: &mut [ConnectionRecord], shared: &HostShared, chunk: &mut [u8]) {
    for record in connections.iter_mut() {
        loop {
            match record.stream.try_read(chunk) {
                Ok(0) => {
                    debug!(id = %record.id, "peer closed the connection");
                    record.dead = true;
                    break;
                }
                Ok(n) => {
                    record.rx_buf.extend_from_slice(&chunk[..n]);
                    let mut consumed = 0;
                    let decoded = {
                        let mut inbound = shared.inbound.lock().expect(LOCK);
                        Message::from_stream(
                            &record.rx_buf,
                            &mut consumed,
                            record.rx_buf.len(),
                            &mut inbound,
                            Some(record.id),
                        )
                    };
                    record.rx_buf.drain(..consumed);
                    if decoded > 0 {
                        record.last_activity = Instant::now();
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(id = %record.id, "read failed: {e}");
                    record.dead = true;
                    break;
                }
            }
        }
    }
}

/// Deliver every queued outbound message: to its target connection if
/// tagged, otherwise to all. A failed write flags that connection dead
/// without aborting delivery to the others.
async fn drain_outbound(connections: &mut [ConnectionRecord], shared: &HostShared) {
    loop {
        let next = shared.outbound.lock().expect(LOCK).pop_front();
        let Some(message) = next else { break };
        let target = message.origin();
        for record in connections.iter_mut() {
            if record.dead || target.is_some_and(|t| t != record.id) {
                continue;
            }
            if let Err(e) = record.stream.write_all(message.data()).await {
                warn!(id = %record.id, "write failed: {e}");
                record.dead = true;
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_tags_the_target_as_origin() {
        let host = ServerHost::new(LinkConfig::default());
        host.send(Message::build("A", &[]), Some(ConnectionId(3)));
        host.send(Message::build("B", &[]), None);
        let queue = host.shared.outbound.lock().unwrap();
        assert_eq!(queue[0].origin(), Some(ConnectionId(3)));
        assert_eq!(queue[1].origin(), None);
    }

    #[test]
    fn events_channel_is_taken_once() {
        let mut host = ServerHost::new(LinkConfig::default());
        assert!(host.take_events().is_some());
        assert!(host.take_events().is_none());
    }

    #[test]
    fn fresh_host_has_no_clients_or_messages() {
        let host = ServerHost::new(LinkConfig::default());
        assert_eq!(host.client_count(), 0);
        assert!(!host.has_queued_messages());
        assert!(host.pop_message().is_none());
    }
}
