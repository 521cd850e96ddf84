//! Stream transport: per-connection dispatch and lifecycle
//!
//! Every accepted stream runs one reader loop that decodes newline-terminated
//! frames and routes them through [`StreamRouter::dispatch`], plus one writer
//! task that drains the connection's outbound queue. Broadcasts only enqueue,
//! so a slow peer never holds up delivery to the others.

use crate::error::{is_peer_reset, RelayError, Result};
use crate::registry::{Connection, SessionRegistry, OUTBOX_CAPACITY};
use crate::world::World;
use log::{debug, error, info, warn};
use shared::{encode, Frame, Opcode, JOIN_SUFFIX, MAX_FRAME_LEN, PROTOCOL_VERSION};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;

pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle of a single stream connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Admitted and greeted, nothing dispatched yet
    Connected,
    /// At least one frame has been dispatched
    Active,
    /// Terminal: quit, close or transport error
    Closed,
}

/// Reader-side state for one admitted connection
#[derive(Debug)]
pub struct StreamSession {
    pub addr: SocketAddr,
    pub player_id: String,
    state: ConnectionState,
}

impl StreamSession {
    pub fn new(addr: SocketAddr, player_id: String) -> Self {
        Self {
            addr,
            player_id,
            state: ConnectionState::Connected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }
}

/// Applies the stream routing rules against the shared registry and world
#[derive(Clone)]
pub struct StreamRouter {
    registry: Arc<RwLock<SessionRegistry>>,
    world: Arc<RwLock<World>>,
    write_timeout: Duration,
}

impl StreamRouter {
    pub fn new(registry: Arc<RwLock<SessionRegistry>>, world: Arc<RwLock<World>>) -> Self {
        Self {
            registry,
            world,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// Drop connections whose socket accepts no data for `write_timeout`
    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub fn registry(&self) -> &Arc<RwLock<SessionRegistry>> {
        &self.registry
    }

    pub fn world(&self) -> &Arc<RwLock<World>> {
        &self.world
    }

    /// Admits `connection` and sends the greeting sequence
    ///
    /// After the roster broadcast the new connection receives `HOLA<id>`,
    /// then `MAPS` when no map is known yet or `MAPC<map>` otherwise, then
    /// `VCHK<version>`, and `ENVT<env>` when an environment is set.
    pub async fn admit(&self, connection: Connection) -> Option<StreamSession> {
        // World stays read-locked until the greeting is queued; lock order is
        // world, then registry
        let world = self.world.read().await;
        let mut registry = self.registry.write().await;
        let player = registry.admit(connection.clone())?;

        connection.send(&encode("HOLA", &player.id));
        match world.map() {
            Some(map) => connection.send(&encode("MAPC", map)),
            None => connection.send(&encode("MAPS", "")),
        };
        connection.send(&encode("VCHK", PROTOCOL_VERSION));
        if let Some(environment) = world.environment() {
            connection.send(&encode("ENVT", environment));
        }

        Some(StreamSession::new(connection.addr, player.id))
    }

    /// Routes one inbound line from `session`
    pub async fn dispatch(&self, session: &mut StreamSession, line: &str) {
        if session.is_closed() {
            return;
        }

        let line = line.trim_end();
        if line.is_empty() {
            return;
        }

        let frame = Frame::decode(line);
        let addr = session.addr;
        let opcode = frame.opcode();
        if opcode != Opcode::Ping {
            debug!("[TCP] {} from {}", frame.code(), addr);
        }

        match opcode {
            Opcode::Ping => {
                self.registry.read().await.send_to(&addr, &encode("PONG", ""));
            }
            Opcode::Chat | Opcode::VehicleChange => {
                self.registry.read().await.broadcast(&frame.encode(), None);
            }
            Opcode::MapRequest => {
                let map = frame.payload();
                if map.is_empty() {
                    warn!("[TCP] Ignoring empty map from {}", addr);
                } else {
                    self.world.write().await.set_map(map);
                    self.registry
                        .read()
                        .await
                        .send_to(&addr, &encode("MAPC", map));
                }
            }
            Opcode::User => {
                let nickname = frame.payload().trim();
                let mut registry = self.registry.write().await;
                if registry.set_nickname(&addr, nickname) {
                    registry.broadcast_roster();
                    let announcement = format!("{}{}", nickname, JOIN_SUFFIX);
                    registry.broadcast(&encode("SMSG", &announcement), None);
                }
            }
            Opcode::Quit | Opcode::QuitCode => {
                self.disconnect(&addr).await;
                session.close();
                return;
            }
            Opcode::VehicleUpdate(_) => {
                self.registry
                    .read()
                    .await
                    .broadcast(&frame.encode(), Some(&addr));
            }
            Opcode::NewVehicle => {
                // Vehicle ids are not issued yet
                info!("[TCP] New vehicle from {}: {}", addr, frame.payload());
            }
            Opcode::VehicleSelect => {
                self.registry
                    .write()
                    .await
                    .set_vehicle(&addr, frame.payload());
            }
            Opcode::SetEnvironment => {
                let environment = frame.payload();
                self.world.write().await.set_environment(environment);
                self.registry
                    .read()
                    .await
                    .broadcast(&encode("ENVT", environment), Some(&addr));
            }
            _ => {
                warn!("[TCP] Unknown / unhandled data from {}: {}", addr, frame);
                self.registry.read().await.broadcast(&frame.encode(), None);
            }
        }

        if session.state == ConnectionState::Connected {
            session.state = ConnectionState::Active;
        }
    }

    /// Removes the session at `addr` and tells the survivors
    ///
    /// Returns false, without broadcasting, when nothing was removed.
    pub async fn disconnect(&self, addr: &SocketAddr) -> bool {
        let mut registry = self.registry.write().await;
        if registry.remove(addr) {
            registry.broadcast_roster();
            true
        } else {
            false
        }
    }

    /// Broadcasts a server message (`SMSG<text>`) to every connection
    pub async fn say(&self, text: &str) -> usize {
        self.registry
            .read()
            .await
            .broadcast(&encode("SMSG", text), None)
    }

    /// Serves one accepted stream until it closes
    ///
    /// Peer resets end the connection like a normal close, and so do an
    /// oversized frame and a stalled writer. Any other read error also cleans
    /// up the session but is returned as [`RelayError::Fatal`] for the server
    /// to act on.
    pub async fn serve<R, W>(&self, reader: R, writer: W, addr: SocketAddr) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        info!("[TCP] Connected: {}", addr);
        let (outbox, frames) = mpsc::channel(OUTBOX_CAPACITY);
        let mut writer = tokio::spawn(write_frames(writer, frames, addr, self.write_timeout));

        let Some(mut session) = self.admit(Connection::new(addr, outbox)).await else {
            warn!("[TCP] Denied {}: server full", addr);
            return Ok(());
        };

        let mut reader = BufReader::new(reader);
        let mut buffer = Vec::new();

        let outcome = loop {
            let read = tokio::select! {
                read = read_frame(&mut reader, &mut buffer) => Some(read),
                _ = &mut writer => None,
            };
            let Some(read) = read else {
                warn!("[TCP] Writer for {} stopped, dropping connection", addr);
                break Ok(());
            };

            match read {
                Ok(0) => break Ok(()),
                Ok(len) if len == MAX_FRAME_LEN && buffer.last() != Some(&b'\n') => {
                    warn!("[TCP] Frame from {} exceeds {} bytes, closing", addr, MAX_FRAME_LEN);
                    break Ok(());
                }
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buffer);
                    self.dispatch(&mut session, &line).await;
                    if session.is_closed() {
                        break Ok(());
                    }
                }
                Err(e) if is_peer_reset(&e) => {
                    let nickname = self
                        .registry
                        .read()
                        .await
                        .player(&addr)
                        .map(|player| player.nickname.clone())
                        .unwrap_or_default();
                    error!(
                        "[TCP] Connection reset for player {} ({})",
                        nickname, session.player_id
                    );
                    break Ok(());
                }
                Err(e) => break Err(RelayError::Fatal { addr, source: e }),
            }
        };

        session.close();
        self.disconnect(&addr).await;
        info!("[TCP] Closed: {}", addr);
        outcome
    }
}

/// Reads one newline-terminated frame of at most [`MAX_FRAME_LEN`] bytes
async fn read_frame<R>(reader: &mut R, buffer: &mut Vec<u8>) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    buffer.clear();
    reader
        .take(MAX_FRAME_LEN as u64)
        .read_until(b'\n', buffer)
        .await
}

/// Drains a connection's outbound queue into its socket
///
/// Ends when the registry drops the connection, a write fails or a write
/// makes no progress for `write_timeout`. A failed write only affects this
/// connection.
async fn write_frames<W>(
    mut writer: W,
    mut frames: mpsc::Receiver<String>,
    addr: SocketAddr,
    write_timeout: Duration,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        match timeout(write_timeout, writer.write_all(frame.as_bytes())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("[TCP] Failed to write to {}: {}", addr, e);
                return;
            }
            Err(_) => {
                warn!("[TCP] Write to {} stalled for {:?}", addr, write_timeout);
                return;
            }
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!("[TCP] Shutdown of {} failed: {}", addr, e);
    }
}
