//! Periodic status reports for a server directory

use crate::network::Relay;
use log::info;
use serde::Serialize;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

/// What the directory heartbeat needs to know about this server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeartbeatInfo {
    pub player_count: usize,
    pub port: u16,
    pub map: String,
    pub server_name: String,
}

/// Delivers heartbeats to a directory service
pub trait HeartbeatReporter: Send {
    /// Returns the identifier the directory assigned, once it has one
    fn report(&mut self, info: &HeartbeatInfo) -> Option<String>;
}

/// Reporter that only writes the heartbeat to the log
#[derive(Debug, Default)]
pub struct LogReporter;

impl HeartbeatReporter for LogReporter {
    fn report(&mut self, info: &HeartbeatInfo) -> Option<String> {
        info!(
            "Heartbeat: {} player(s) on port {}, map '{}', name '{}'",
            info.player_count, info.port, info.map, info.server_name
        );
        None
    }
}

/// Tracks the identifier handed out by the directory
#[derive(Debug, Default)]
pub struct Heartbeat<R> {
    reporter: R,
    assigned_id: Option<String>,
}

impl<R: HeartbeatReporter> Heartbeat<R> {
    pub fn new(reporter: R) -> Self {
        Self {
            reporter,
            assigned_id: None,
        }
    }

    pub fn assigned_id(&self) -> Option<&str> {
        self.assigned_id.as_deref()
    }

    /// Sends one heartbeat and records a newly assigned identifier
    pub fn beat(&mut self, info: &HeartbeatInfo) {
        if let Some(id) = self.reporter.report(info) {
            if self.assigned_id.as_deref() != Some(id.as_str()) {
                info!("Directory assigned id {}", id);
                self.assigned_id = Some(id);
            }
        }
    }

    pub async fn run(mut self, relay: Relay, period: Duration) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let info = relay.heartbeat_info().await;
            self.beat(&info);
        }
    }
}
