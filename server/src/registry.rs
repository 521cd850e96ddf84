//! Session registry for stream connections and their players
//!
//! This module owns the authoritative roster of the relay:
//! - Admission of accepted stream connections and player creation
//! - Nickname and vehicle bookkeeping keyed by remote address and port
//! - Idempotent removal on quit, close or transport error
//! - Fan-out of frames to every live connection
//!
//! A connection and its player are stored as one session entry, so neither
//! can outlive the other. Entries keep join order, which is the order the
//! roster is serialized in.

use log::{error, info, warn};
use shared::{player_list_frame, same_endpoint, Player};
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

/// Queue of encoded frames drained by a connection's writer task
pub type Outbox = mpsc::Sender<String>;

/// Frames a connection may have queued before new ones are dropped
pub const OUTBOX_CAPACITY: usize = 256;

/// An accepted stream socket, addressed through its outbound queue
#[derive(Debug, Clone)]
pub struct Connection {
    /// Remote address and port, the join key to the player
    pub addr: SocketAddr,
    outbox: Outbox,
}

impl Connection {
    pub fn new(addr: SocketAddr, outbox: Outbox) -> Self {
        Self { addr, outbox }
    }

    /// Queues one encoded frame for this connection
    ///
    /// Never waits. Returns false when the queue is full or the writer side
    /// is already gone; the frame is dropped for this connection only. The
    /// failure is logged here so callers iterating many connections can
    /// simply move on.
    pub fn send(&self, frame: &str) -> bool {
        match self.outbox.try_send(frame.to_string()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Outbox of {} is full, dropping frame", self.addr);
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Failed to queue frame for {}: writer closed", self.addr);
                false
            }
        }
    }
}

#[derive(Debug)]
struct Session {
    connection: Connection,
    player: Player,
}

/// Owns every live connection and its player
///
/// All mutation goes through `&mut self`, so sharing the registry behind a
/// single lock serializes admissions, removals and broadcasts.
#[derive(Debug)]
pub struct SessionRegistry {
    /// Live sessions in join order
    sessions: Vec<Session>,
    /// Maximum number of concurrent players allowed
    max_players: usize,
}

impl SessionRegistry {
    pub fn new(max_players: usize) -> Self {
        Self {
            sessions: Vec::new(),
            max_players,
        }
    }

    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.max_players
    }

    /// Admits a connection and creates its player
    ///
    /// The new player gets a fresh identifier, the placeholder nickname and
    /// no vehicle. The updated roster is broadcast to every connection,
    /// including the new one. Returns None when the server is full.
    pub fn admit(&mut self, connection: Connection) -> Option<Player> {
        if self.is_full() {
            return None;
        }

        // A stale entry for the same endpoint would break the one player
        // per connection rule
        if self.remove(&connection.addr) {
            info!("Replaced stale session for {}", connection.addr);
        }

        let player = Player::new(Uuid::new_v4().to_string(), connection.addr);
        info!("Player {} connected from {}", player.id, connection.addr);

        self.sessions.push(Session {
            connection,
            player: player.clone(),
        });
        self.broadcast_roster();

        Some(player)
    }

    /// Sets the nickname of the player at `addr`
    ///
    /// Returns false when no such player exists, which is expected when a
    /// message races the connection's teardown.
    pub fn set_nickname(&mut self, addr: &SocketAddr, nickname: &str) -> bool {
        match self.player_mut(addr) {
            Some(player) => {
                info!(
                    "Player found ({}), setting nickname ({})",
                    player.id, nickname
                );
                player.nickname = nickname.to_string();
                true
            }
            None => false,
        }
    }

    /// Records the vehicle the player at `addr` is driving
    ///
    /// Only writes when the value differs. Returns true if the stored value
    /// changed. Never broadcasts.
    pub fn set_vehicle(&mut self, addr: &SocketAddr, vehicle_id: &str) -> bool {
        match self.player_mut(addr) {
            Some(player) if player.current_veh_id != vehicle_id => {
                info!(
                    "Player found ({}), updating current vehicle ({})",
                    player.id, vehicle_id
                );
                player.current_veh_id = vehicle_id.to_string();
                true
            }
            _ => false,
        }
    }

    /// Removes the connection and player at `addr`
    ///
    /// Removing an absent key is a no-op. Returns true if a session was
    /// actually removed.
    pub fn remove(&mut self, addr: &SocketAddr) -> bool {
        let before = self.sessions.len();
        self.sessions
            .retain(|session| !same_endpoint(&session.connection.addr, addr));

        let removed = self.sessions.len() != before;
        if removed {
            info!("Closed: {}", addr);
        }
        removed
    }

    /// Current roster in join order
    pub fn snapshot(&self) -> Vec<Player> {
        self.sessions
            .iter()
            .map(|session| session.player.clone())
            .collect()
    }

    /// Player whose stream comes from `addr`, if still connected
    pub fn player(&self, addr: &SocketAddr) -> Option<&Player> {
        self.sessions
            .iter()
            .find(|session| session.player.is_at(addr))
            .map(|session| &session.player)
    }

    fn player_mut(&mut self, addr: &SocketAddr) -> Option<&mut Player> {
        self.sessions
            .iter_mut()
            .find(|session| session.player.is_at(addr))
            .map(|session| &mut session.player)
    }

    /// Writes `frame` to every live connection except `exclude`
    ///
    /// Exclusion uses the address-and-port test from `same_endpoint`. A
    /// failed write is logged and skipped; the rest still receive the frame.
    /// Returns the number of connections the frame was queued for.
    pub fn broadcast(&self, frame: &str, exclude: Option<&SocketAddr>) -> usize {
        let mut delivered = 0;

        for session in &self.sessions {
            if let Some(sender) = exclude {
                if same_endpoint(sender, &session.connection.addr) {
                    continue;
                }
            }

            if session.connection.send(frame) {
                delivered += 1;
            }
        }

        delivered
    }

    /// Writes `frame` to the single connection at `addr`
    pub fn send_to(&self, addr: &SocketAddr, frame: &str) -> bool {
        self.sessions
            .iter()
            .find(|session| same_endpoint(&session.connection.addr, addr))
            .map(|session| session.connection.send(frame))
            .unwrap_or(false)
    }

    /// Broadcasts `PLST<json>` with the current roster to everyone
    pub fn broadcast_roster(&self) -> usize {
        let players = self.snapshot();
        match player_list_frame(&players) {
            Ok(frame) => self.broadcast(&frame, None),
            Err(e) => {
                error!("Failed to serialize player list: {}", e);
                0
            }
        }
    }

    /// Returns the number of live connections
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
