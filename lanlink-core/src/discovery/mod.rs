//! UDP broadcast service discovery.
//!
//! A [`Beacon`] runs inside the server process and answers discovery
//! requests carrying the deployment's service identity with its TCP
//! port and a descriptive payload. A [`Probe`] runs inside the client
//! process, broadcasts requests on a fixed interval, and maintains an
//! aged, deduplicated, sorted list of [`Advertisement`]s published to
//! subscribers.
//!
//! The identity string is a configuration value agreed out of band;
//! datagrams without the identity prefix are ignored on both sides.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

pub mod beacon;
pub mod probe;
pub mod wire;

pub use beacon::Beacon;
pub use probe::{DiscoveryCallback, Probe};

/// Well-known UDP port discovery requests are broadcast to.
pub const DEFAULT_DISCOVERY_PORT: u16 = 35891;

/// Interval between probe broadcasts.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(2);

/// Advertisements not refreshed within this window are pruned.
pub const ADVERTISEMENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest discovery datagram either side will process.
pub const MAX_DATAGRAM: usize = 1024;

// ── Advertisement ────────────────────────────────────────────────

/// A discovered server: where to connect, what it said about itself,
/// and when it was last heard from.
#[derive(Debug, Clone)]
pub struct Advertisement {
    /// Responder's IP with the TCP port it advertised.
    pub address: SocketAddr,
    /// Free-form descriptive payload from the beacon.
    pub payload: String,
    /// When the most recent response arrived.
    pub last_seen: Instant,
}

impl Advertisement {
    pub fn new(address: SocketAddr, payload: String) -> Self {
        Self {
            address,
            payload,
            last_seen: Instant::now(),
        }
    }

    /// Whether this entry has outlived [`ADVERTISEMENT_TIMEOUT`].
    pub fn is_stale(&self) -> bool {
        self.last_seen.elapsed() >= ADVERTISEMENT_TIMEOUT
    }
}

// Identity is (payload, address); `last_seen` only ages the entry, so
// a refreshed advertisement compares equal to the one it replaces.
impl PartialEq for Advertisement {
    fn eq(&self, other: &Self) -> bool {
        self.payload == other.payload && self.address == other.address
    }
}

impl Eq for Advertisement {}

impl PartialOrd for Advertisement {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Advertisement {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.payload
            .cmp(&other.payload)
            .then_with(|| self.address.cmp(&other.address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("192.168.1.10:{port}").parse().unwrap()
    }

    #[test]
    fn equality_ignores_last_seen() {
        let mut a = Advertisement::new(addr(7713), "srv".into());
        let b = Advertisement::new(addr(7713), "srv".into());
        a.last_seen = Instant::now() - Duration::from_secs(3);
        assert_eq!(a, b);
    }

    #[test]
    fn ordering_is_payload_then_address() {
        let mut ads = vec![
            Advertisement::new(addr(2), "beta".into()),
            Advertisement::new(addr(2), "alpha".into()),
            Advertisement::new(addr(1), "alpha".into()),
        ];
        ads.sort();
        assert_eq!(ads[0].payload, "alpha");
        assert_eq!(ads[0].address, addr(1));
        assert_eq!(ads[1].address, addr(2));
        assert_eq!(ads[2].payload, "beta");
    }
}
