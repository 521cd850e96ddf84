//! Liveness tracking for datagram peers
//!
//! Datagram peers never announce themselves or say goodbye. Any packet from
//! an address refreshes its last-seen time, and a periodic sweep evicts
//! addresses that stayed silent longer than the expiry threshold.

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

pub const DEFAULT_PEER_EXPIRY: Duration = Duration::from_secs(30);
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Last-seen bookkeeping for every routable datagram address
#[derive(Debug)]
pub struct PeerTracker {
    peers: HashMap<SocketAddr, Instant>,
    expiry: Duration,
}

impl PeerTracker {
    pub fn new(expiry: Duration) -> Self {
        Self {
            peers: HashMap::new(),
            expiry,
        }
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    /// How often the sweep should run: twice the expiry threshold
    ///
    /// Never zero, since a timer cannot tick with a zero period.
    pub fn sweep_interval(&self) -> Duration {
        (self.expiry * 2).max(MIN_SWEEP_INTERVAL)
    }

    /// Marks `addr` as seen now, inserting it if unknown
    pub fn touch(&mut self, addr: SocketAddr) {
        self.touch_at(addr, Instant::now());
    }

    /// Marks `addr` as seen at `now`
    pub fn touch_at(&mut self, addr: SocketAddr, now: Instant) {
        if self.peers.insert(addr, now).is_none() {
            info!("[UDP] New peer {}", addr);
        }
    }

    /// Evicts every peer silent for longer than the threshold
    ///
    /// Returns the evicted addresses. Nobody is notified; evicted peers just
    /// stop receiving relayed traffic.
    pub fn sweep(&mut self) -> Vec<SocketAddr> {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&mut self, now: Instant) -> Vec<SocketAddr> {
        let expiry = self.expiry;
        let stale: Vec<SocketAddr> = self
            .peers
            .iter()
            .filter(|(_, last_seen)| now.saturating_duration_since(**last_seen) > expiry)
            .map(|(addr, _)| *addr)
            .collect();

        for addr in &stale {
            self.peers.remove(addr);
            info!("[UDP] Evicted silent peer {}", addr);
        }

        stale
    }

    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.peers.contains_key(addr)
    }

    /// Snapshot of tracked addresses for a flood
    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.peers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

impl Default for PeerTracker {
    fn default() -> Self {
        Self::new(DEFAULT_PEER_EXPIRY)
    }
}
