//! Server network layer: listeners, receive loops and the fault channel

use crate::config::ServerConfig;
use crate::datagram::DatagramRouter;
use crate::error::{RelayError, Result};
use crate::heartbeat::HeartbeatInfo;
use crate::liveness::PeerTracker;
use crate::mirror::{self, MirrorHub};
use crate::registry::SessionRegistry;
use crate::stream::StreamRouter;
use crate::world::World;
use log::{error, info, warn};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};

/// Cloneable handle used by the console and heartbeat collaborators
#[derive(Clone)]
pub struct Relay {
    router: StreamRouter,
    peers: Arc<RwLock<PeerTracker>>,
    config: Arc<RwLock<ServerConfig>>,
    config_path: Option<PathBuf>,
}

impl Relay {
    pub fn router(&self) -> &StreamRouter {
        &self.router
    }

    /// Broadcasts `SMSG<text>` to every stream connection
    pub async fn say(&self, text: &str) -> usize {
        info!("Server says: {}", text);
        self.router.say(text).await
    }

    /// Renames the server and persists the change when a config file is in use
    pub async fn set_server_name(&self, name: &str) -> Result<()> {
        let mut config = self.config.write().await;
        config.server_name = name.to_string();
        info!("Server name set to {}", name);

        if let Some(path) = &self.config_path {
            config.save(path)?;
        }
        Ok(())
    }

    pub async fn heartbeat_info(&self) -> HeartbeatInfo {
        let player_count = self.router.registry().read().await.len();
        let map = self
            .router
            .world()
            .read()
            .await
            .map()
            .unwrap_or_default()
            .to_string();
        let config = self.config.read().await;

        HeartbeatInfo {
            player_count,
            port: config.tcp_port,
            map,
            server_name: config.server_name.clone(),
        }
    }

    pub async fn player_count(&self) -> usize {
        self.router.registry().read().await.len()
    }

    pub async fn datagram_peer_count(&self) -> usize {
        self.peers.read().await.len()
    }
}

/// Owns the three listeners and the shared state behind them
pub struct Server {
    relay: Relay,
    mirror: Arc<RwLock<MirrorHub>>,
    tcp: TcpListener,
    udp: Arc<UdpSocket>,
    ws: TcpListener,
    sweep_interval: Duration,

    // Unclassified stream errors end up here and stop the server
    fault_tx: mpsc::UnboundedSender<RelayError>,
    fault_rx: mpsc::UnboundedReceiver<RelayError>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let tcp = TcpListener::bind(config.tcp_addr()).await?;
        info!("[TCP] Server listening on {}", tcp.local_addr()?);
        let udp = Arc::new(UdpSocket::bind(config.udp_addr()).await?);
        info!("[UDP] Server listening on {}", udp.local_addr()?);
        let ws = TcpListener::bind(config.ws_addr()).await?;
        info!("[WS] Server listening on {}", ws.local_addr()?);

        let registry = Arc::new(RwLock::new(SessionRegistry::new(config.max_players)));
        let world = Arc::new(RwLock::new(World::new(
            config.map.clone(),
            config.environment.clone(),
        )));
        let peers = Arc::new(RwLock::new(PeerTracker::new(config.peer_expiry())));
        let sweep_interval = peers.read().await.sweep_interval();

        let (fault_tx, fault_rx) = mpsc::unbounded_channel();

        Ok(Server {
            relay: Relay {
                router: StreamRouter::new(registry, world)
                    .with_write_timeout(config.write_timeout()),
                peers,
                config: Arc::new(RwLock::new(config)),
                config_path: None,
            },
            mirror: Arc::new(RwLock::new(MirrorHub::new())),
            tcp,
            udp,
            ws,
            sweep_interval,
            fault_tx,
            fault_rx,
        })
    }

    /// Persist console changes to `path`
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.relay.config_path = Some(path.into());
        self
    }

    pub fn relay(&self) -> Relay {
        self.relay.clone()
    }

    pub fn tcp_addr(&self) -> Result<SocketAddr> {
        Ok(self.tcp.local_addr()?)
    }

    pub fn udp_addr(&self) -> Result<SocketAddr> {
        Ok(self.udp.local_addr()?)
    }

    pub fn ws_addr(&self) -> Result<SocketAddr> {
        Ok(self.ws.local_addr()?)
    }

    /// Spawns task that accepts stream connections, one task per connection
    fn spawn_stream_acceptor(
        listener: TcpListener,
        router: StreamRouter,
        fault_tx: mpsc::UnboundedSender<RelayError>,
    ) {
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let (reader, writer) = stream.into_split();
                        tokio::spawn(serve_connection(
                            router.clone(),
                            reader,
                            writer,
                            addr,
                            fault_tx.clone(),
                        ));
                    }
                    Err(e) => {
                        error!("[TCP] Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that evicts silent datagram peers
    fn spawn_liveness_sweeper(peers: Arc<RwLock<PeerTracker>>, period: Duration) {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            // Skip the first tick since it fires immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let evicted = peers.write().await.sweep();
                if !evicted.is_empty() {
                    info!("[UDP] Sweep evicted {} peer(s)", evicted.len());
                }
            }
        });
    }

    /// Spawns task that accepts browser connections for the mirror
    fn spawn_mirror_acceptor(listener: TcpListener, hub: Arc<RwLock<MirrorHub>>) {
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let hub = Arc::clone(&hub);
                        tokio::spawn(async move {
                            if let Err(e) = mirror::serve(hub, stream, addr).await {
                                warn!("[WS] Connection from {} failed: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("[WS] Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Starts every transport and waits for a fatal fault
    ///
    /// Only returns when a stream connection hit an unclassified transport
    /// error; the caller is expected to exit.
    pub async fn run(self) -> Result<()> {
        let Server {
            relay,
            mirror,
            tcp,
            udp,
            ws,
            sweep_interval,
            fault_tx,
            mut fault_rx,
        } = self;

        Self::spawn_stream_acceptor(tcp, relay.router.clone(), fault_tx);
        tokio::spawn(DatagramRouter::new(udp, Arc::clone(&relay.peers)).run());
        Self::spawn_liveness_sweeper(Arc::clone(&relay.peers), sweep_interval);
        Self::spawn_mirror_acceptor(ws, mirror);

        info!("Server started successfully");

        match fault_rx.recv().await {
            Some(fault) => {
                error!("Fatal fault, stopping server: {}", fault);
                Err(fault)
            }
            None => Ok(()),
        }
    }
}

/// Serves one stream and reports an unclassified failure as a fault
async fn serve_connection<R, W>(
    router: StreamRouter,
    reader: R,
    writer: W,
    addr: SocketAddr,
    fault_tx: mpsc::UnboundedSender<RelayError>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    if let Err(e) = router.serve(reader, writer, addr).await {
        error!("[TCP] Socket error: {}", e);
        let _ = fault_tx.send(e);
    }
}
