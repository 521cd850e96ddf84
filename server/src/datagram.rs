//! Datagram transport routing
//!
//! Datagram peers are a separate address set from stream players. The
//! tracker learns them from traffic alone, and every flood goes to whatever
//! it currently holds.

use crate::liveness::PeerTracker;
use log::{debug, warn};
use shared::{encode, same_endpoint, Frame, Opcode};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::RwLock;

/// Where a datagram goes after classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatagramRoute {
    /// Answer the sender only
    Reply(String),
    /// Every tracked peer, sender included
    Flood,
    /// Every tracked peer except the sender's exact address and port
    FloodOthers,
}

pub fn route_for(frame: &Frame) -> DatagramRoute {
    match frame.opcode() {
        Opcode::Ping => DatagramRoute::Reply(encode("PONG", "")),
        Opcode::VehicleUpdate(_) => DatagramRoute::FloodOthers,
        _ => DatagramRoute::Flood,
    }
}

/// Resolves a flood against the tracked peers
pub fn recipients(
    peers: &[SocketAddr],
    sender: &SocketAddr,
    route: &DatagramRoute,
) -> Vec<SocketAddr> {
    match route {
        DatagramRoute::Reply(_) => vec![*sender],
        DatagramRoute::Flood => peers.to_vec(),
        DatagramRoute::FloodOthers => peers
            .iter()
            .filter(|peer| !same_endpoint(sender, peer))
            .copied()
            .collect(),
    }
}

pub struct DatagramRouter {
    socket: Arc<UdpSocket>,
    peers: Arc<RwLock<PeerTracker>>,
}

impl DatagramRouter {
    pub fn new(socket: Arc<UdpSocket>, peers: Arc<RwLock<PeerTracker>>) -> Self {
        Self { socket, peers }
    }

    /// Refreshes the sender and relays one datagram
    ///
    /// Returns how many sends succeeded. A failed send is logged and the
    /// remaining recipients are still served.
    pub async fn handle(&self, datagram: &[u8], from: SocketAddr) -> usize {
        let peers = {
            let mut tracker = self.peers.write().await;
            tracker.touch(from);
            tracker.addrs()
        };

        let text = String::from_utf8_lossy(datagram);
        let text = text.trim_end();
        if text.is_empty() {
            return 0;
        }

        let frame = Frame::decode(text);
        let route = route_for(&frame);
        if frame.opcode() != Opcode::Ping {
            debug!("[UDP] {} from {} ({} bytes)", frame.code(), from, datagram.len());
        }

        let payload = match &route {
            DatagramRoute::Reply(reply) => reply.clone(),
            _ => frame.encode(),
        };

        let mut sent = 0;
        for peer in recipients(&peers, &from, &route) {
            match self.socket.send_to(payload.as_bytes(), peer).await {
                Ok(_) => sent += 1,
                Err(e) => warn!("[UDP] Failed to send {} to {}: {}", frame.code(), peer, e),
            }
        }
        sent
    }

    /// Receives datagrams until the socket fails for good
    pub async fn run(self) {
        let mut buffer = [0u8; 2048];

        loop {
            match self.socket.recv_from(&mut buffer).await {
                Ok((len, addr)) => {
                    self.handle(&buffer[..len], addr).await;
                }
                Err(e) => {
                    warn!("[UDP] Error receiving packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}
