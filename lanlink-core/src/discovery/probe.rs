//! Client-side discovery requester.
//!
//! The subscriber callbacks fire on the probe's own task, never on the
//! caller's; consumers must hand the result across a queue or atomic
//! field rather than touching their own state directly.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::discovery::{Advertisement, MAX_DATAGRAM, PROBE_INTERVAL, wire};
use crate::error::LinkError;

/// Callback invoked with the current sorted advertisement list.
pub type DiscoveryCallback = Box<dyn Fn(&[Advertisement]) + Send + 'static>;

/// Broadcasts discovery requests and collects server advertisements.
///
/// Every [`PROBE_INTERVAL`] the probe broadcasts its identity to the
/// discovery port; responses with the identity prefix are upserted into
/// a list keyed by (payload, address), pruned of entries older than
/// [`ADVERTISEMENT_TIMEOUT`](crate::discovery::ADVERTISEMENT_TIMEOUT),
/// and published to subscribers sorted by payload then address.
pub struct Probe {
    identity: String,
    discovery_port: u16,
    broadcast_addr: Ipv4Addr,
    shared: Arc<ProbeShared>,
    handle: Option<JoinHandle<()>>,
}

struct ProbeShared {
    running: AtomicBool,
    wake: Notify,
    subscribers: Mutex<Vec<DiscoveryCallback>>,
}

impl Probe {
    /// A probe for `identity`, broadcasting to
    /// `broadcast_addr:discovery_port`. Not started yet.
    pub fn new(identity: impl Into<String>, discovery_port: u16, broadcast_addr: Ipv4Addr) -> Self {
        Self {
            identity: identity.into(),
            discovery_port,
            broadcast_addr,
            shared: Arc::new(ProbeShared {
                running: AtomicBool::new(false),
                wake: Notify::new(),
                subscribers: Mutex::new(Vec::new()),
            }),
            handle: None,
        }
    }

    /// Register a callback for advertisement list updates.
    ///
    /// Fires on the probe's background task.
    pub fn subscribe(&self, callback: impl Fn(&[Advertisement]) + Send + 'static) {
        self.shared
            .subscribers
            .lock()
            .expect("subscriber list lock poisoned")
            .push(Box::new(callback));
    }

    /// Bind an ephemeral broadcast socket and spawn the probe loop.
    ///
    /// Calling start on a running probe is a no-op.
    pub async fn start(&mut self) -> Result<(), LinkError> {
        if self.handle.is_some() {
            return Ok(());
        }
        let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).await?;
        socket.set_broadcast(true)?;
        let target = SocketAddr::from((self.broadcast_addr, self.discovery_port));
        info!(identity = %self.identity, %target, "probe started");

        self.shared.running.store(true, Ordering::SeqCst);
        let identity = self.identity.clone();
        let shared = Arc::clone(&self.shared);
        self.handle = Some(tokio::spawn(async move {
            run(socket, identity, target, shared).await;
        }));
        Ok(())
    }

    /// Stop probing and wait for the loop to exit. Idempotent; after
    /// this returns no further callbacks fire.
    pub async fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.wake.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }
}

async fn run(socket: UdpSocket, identity: String, target: SocketAddr, shared: Arc<ProbeShared>) {
    let request = wire::encode_request(&identity);
    let mut advertisements: Vec<Advertisement> = Vec::new();
    let mut buf = [0u8; MAX_DATAGRAM];
    let mut cycle = tokio::time::interval(PROBE_INTERVAL);
    cycle.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while shared.running.load(Ordering::SeqCst) {
        tokio::select! {
            _ = cycle.tick() => {
                if let Err(e) = socket.send_to(&request, target).await {
                    warn!(%target, "probe broadcast failed: {e}");
                }
                if prune(&mut advertisements) {
                    publish(&shared, &advertisements);
                }
            }
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, src)) => match wire::decode_response(&identity, &buf[..len]) {
                    Ok((port, payload)) => {
                        let address = SocketAddr::new(src.ip(), port);
                        debug!(%address, payload = %payload, "advertisement received");
                        upsert(&mut advertisements, Advertisement::new(address, payload));
                        publish(&shared, &advertisements);
                    }
                    Err(reason) => trace!(%src, %reason, "ignoring datagram"),
                },
                Err(e) => warn!("probe receive failed: {e}"),
            },
            _ = shared.wake.notified() => {}
        }
    }
    debug!(identity, "probe loop exited");
}

/// Insert or refresh an advertisement, keeping the list sorted by
/// payload then address.
fn upsert(list: &mut Vec<Advertisement>, advertisement: Advertisement) {
    list.retain(|existing| existing != &advertisement);
    list.push(advertisement);
    list.sort();
}

/// Drop entries older than the staleness window. Returns whether the
/// list changed.
fn prune(list: &mut Vec<Advertisement>) -> bool {
    let before = list.len();
    list.retain(|a| !a.is_stale());
    list.len() != before
}

fn publish(shared: &ProbeShared, advertisements: &[Advertisement]) {
    let subscribers = shared
        .subscribers
        .lock()
        .expect("subscriber list lock poisoned");
    for callback in subscribers.iter() {
        callback(advertisements);
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn ad(host: &str, payload: &str) -> Advertisement {
        Advertisement::new(format!("{host}:7713").parse().unwrap(), payload.into())
    }

    fn aged(mut a: Advertisement, secs: u64) -> Advertisement {
        a.last_seen = Instant::now() - Duration::from_secs(secs);
        a
    }

    #[test]
    fn upsert_refreshes_matching_entry() {
        let mut list = Vec::new();
        upsert(&mut list, aged(ad("10.0.0.1", "srv"), 4));
        upsert(&mut list, ad("10.0.0.1", "srv"));
        assert_eq!(list.len(), 1);
        assert!(list[0].last_seen.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn upsert_keeps_list_sorted() {
        let mut list = Vec::new();
        upsert(&mut list, ad("10.0.0.2", "beta"));
        upsert(&mut list, ad("10.0.0.1", "alpha"));
        upsert(&mut list, ad("10.0.0.3", "alpha"));
        let payloads: Vec<_> = list.iter().map(|a| a.payload.as_str()).collect();
        assert_eq!(payloads, ["alpha", "alpha", "beta"]);
        assert!(list[0].address < list[1].address);
    }

    #[test]
    fn prune_drops_stale_entries() {
        let mut list = vec![aged(ad("10.0.0.1", "old"), 6), ad("10.0.0.2", "fresh")];
        assert!(prune(&mut list));
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].payload, "fresh");
    }

    #[test]
    fn prune_is_idempotent() {
        let mut list = vec![aged(ad("10.0.0.1", "old"), 6), ad("10.0.0.2", "fresh")];
        prune(&mut list);
        let snapshot = list.clone();
        assert!(!prune(&mut list));
        assert_eq!(list, snapshot);
    }
}
