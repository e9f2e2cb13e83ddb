//! Server-side discovery responder.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::discovery::{MAX_DATAGRAM, wire};
use crate::error::LinkError;

/// Answers discovery requests for one service identity.
///
/// Binds the well-known discovery UDP port and replies to every
/// matching request with the advertised TCP port and a descriptive
/// payload. Runs until [`stop`](Beacon::stop).
pub struct Beacon {
    identity: String,
    advertised_port: u16,
    discovery_port: u16,
    payload: String,
    shared: Arc<BeaconShared>,
    handle: Option<JoinHandle<()>>,
}

struct BeaconShared {
    running: AtomicBool,
    wake: Notify,
}

impl Beacon {
    /// A beacon for `identity` advertising `advertised_port`, listening
    /// on `discovery_port`. Not started yet.
    pub fn new(identity: impl Into<String>, advertised_port: u16, discovery_port: u16) -> Self {
        Self {
            identity: identity.into(),
            advertised_port,
            discovery_port,
            payload: String::new(),
            shared: Arc::new(BeaconShared {
                running: AtomicBool::new(false),
                wake: Notify::new(),
            }),
            handle: None,
        }
    }

    /// Set the free-form descriptive payload carried in responses.
    pub fn set_payload(&mut self, payload: impl Into<String>) {
        self.payload = payload.into();
    }

    /// Bind the discovery port and spawn the responder loop.
    ///
    /// Calling start on a running beacon is a no-op.
    pub async fn start(&mut self) -> Result<(), LinkError> {
        if self.handle.is_some() {
            return Ok(());
        }
        let socket =
            UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.discovery_port))).await?;
        info!(
            identity = %self.identity,
            discovery_port = self.discovery_port,
            advertised_port = self.advertised_port,
            "beacon listening"
        );

        self.shared.running.store(true, Ordering::SeqCst);
        let identity = self.identity.clone();
        let response = wire::encode_response(&self.identity, self.advertised_port, &self.payload);
        let shared = Arc::clone(&self.shared);
        self.handle = Some(tokio::spawn(async move {
            run(socket, identity, response, shared).await;
        }));
        Ok(())
    }

    /// Stop the responder and wait for its loop to exit. Idempotent.
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

async fn run(socket: UdpSocket, identity: String, response: Vec<u8>, shared: Arc<BeaconShared>) {
    let prefix = identity.as_bytes();
    let mut buf = [0u8; MAX_DATAGRAM];

    while shared.running.load(Ordering::SeqCst) {
        tokio::select! {
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, src)) => {
                    if wire::has_prefix(&buf[..len], prefix) {
                        debug!(%src, "discovery request; replying");
                        if let Err(e) = socket.send_to(&response, src).await {
                            warn!(%src, "discovery reply failed: {e}");
                        }
                    } else {
                        trace!(%src, len, "ignoring datagram without identity prefix");
                    }
                }
                Err(e) => {
                    warn!("discovery receive failed: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
            _ = shared.wake.notified() => {}
        }
    }
    debug!(identity, "beacon loop exited");
}
