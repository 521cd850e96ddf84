//! Server configuration stored as JSON on disk

use crate::error::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use shared::DEFAULT_TCP_PORT;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "cfg/server.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind all listeners to
    pub ip: String,
    pub tcp_port: u16,
    pub udp_port: u16,
    /// Port for the WebSocket mirror
    pub ws_port: u16,
    pub server_name: String,
    /// Initial map; empty means the first client is asked for one
    pub map: String,
    pub environment: String,
    pub max_players: usize,
    /// Datagram peers silent for longer than this are evicted
    pub peer_expiry_secs: u64,
    pub heartbeat_interval_secs: u64,
    /// A stream write stuck longer than this drops the connection
    pub write_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ip: "0.0.0.0".to_string(),
            tcp_port: DEFAULT_TCP_PORT,
            udp_port: DEFAULT_TCP_PORT + 1,
            ws_port: DEFAULT_TCP_PORT + 2,
            server_name: "BeamMP Relay".to_string(),
            map: String::new(),
            environment: String::new(),
            max_players: 8,
            peer_expiry_secs: 30,
            heartbeat_interval_secs: 30,
            write_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    /// Loads the config at `path`, writing defaults there if it does not exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }

        warn!(
            "No config found at {}, writing defaults",
            path.display()
        );
        let config = Self::default();
        config.save(path)?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: ServerConfig = serde_json::from_str(&text)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Moves every listener to `port`, `port + 1` and `port + 2`
    pub fn with_base_port(mut self, port: u16) -> Self {
        self.tcp_port = port;
        self.udp_port = port.wrapping_add(1);
        self.ws_port = port.wrapping_add(2);
        self
    }

    pub fn tcp_addr(&self) -> String {
        format!("{}:{}", self.ip, self.tcp_port)
    }

    pub fn udp_addr(&self) -> String {
        format!("{}:{}", self.ip, self.udp_port)
    }

    pub fn ws_addr(&self) -> String {
        format!("{}:{}", self.ip, self.ws_port)
    }

    /// Expiry threshold for datagram peers, never below one second
    pub fn peer_expiry(&self) -> Duration {
        Duration::from_secs(self.peer_expiry_secs.max(1))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs.max(1))
    }
}
