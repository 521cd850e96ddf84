//! # Relay Server Library
//!
//! This library implements a real-time relay for a multiplayer driving
//! session. Clients never talk to each other directly: every message passes
//! through the server, which tracks who is connected and forwards each
//! update to the right subset of participants.
//!
//! ## Transports
//!
//! ### Stream (TCP)
//! Each accepted connection becomes one player. Frames are newline
//! terminated text with a four character opcode prefix. The stream side
//! owns the roster, the shared map and per-player vehicle bookkeeping.
//!
//! ### Datagram (UDP)
//! High-rate vehicle updates. Datagram peers are only addresses: they are
//! learned from traffic and forgotten after a period of silence, since the
//! transport has no close signal.
//!
//! ### Mirror (WebSocket)
//! A flood broadcaster for browser clients, fully separate from the roster.
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! Live connections and their players, in join order:
//! - Admission with generated player ids and capacity limit
//! - Nickname and vehicle updates keyed by address and port
//! - Idempotent removal and isolated per-connection fan-out
//!
//! ### Stream Module (`stream`)
//! Per-connection state machine and the opcode dispatch table.
//!
//! ### Liveness and Datagram Modules (`liveness`, `datagram`)
//! Last-seen tracking with periodic eviction, and datagram routing over the
//! tracked address set.
//!
//! ### Network Module (`network`)
//! Binds the listeners, spawns the receive and sweep tasks and surfaces
//! fatal transport faults.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!
//!     // Runs until a connection hits an unrecoverable transport error
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Identity
//!
//! A player is identified only by the remote address and port of its
//! stream. There is no authentication, and a datagram peer is never linked
//! to a stream player even when both belong to the same client.

pub mod config;
pub mod console;
pub mod datagram;
pub mod error;
pub mod heartbeat;
pub mod liveness;
pub mod mirror;
pub mod network;
pub mod registry;
pub mod stream;
pub mod world;
