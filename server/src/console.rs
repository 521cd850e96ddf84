//! Line-oriented administration console

use crate::network::Relay;
use log::{error, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// `say <text>`: server message to every player
    Say(String),
    /// `set_svname <text>`: rename the server
    SetServerName(String),
    Unknown(String),
}

/// Parses one console line, `None` for blank input
pub fn parse_command(line: &str) -> Option<ConsoleCommand> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (name, rest) = match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (line, ""),
    };

    let command = match name {
        "say" if !rest.is_empty() => ConsoleCommand::Say(rest.to_string()),
        "set_svname" if !rest.is_empty() => ConsoleCommand::SetServerName(rest.to_string()),
        _ => ConsoleCommand::Unknown(line.to_string()),
    };
    Some(command)
}

pub async fn apply(relay: &Relay, command: ConsoleCommand) {
    match command {
        ConsoleCommand::Say(text) => {
            relay.say(&text).await;
        }
        ConsoleCommand::SetServerName(name) => {
            if let Err(e) = relay.set_server_name(&name).await {
                error!("Failed to save server name: {}", e);
            }
        }
        ConsoleCommand::Unknown(line) => {
            warn!("Unknown command: {} (try 'say <text>' or 'set_svname <name>')", line);
        }
    }
}

/// Reads commands from stdin until it closes
pub async fn run(relay: Relay) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(command) = parse_command(&line) {
                    apply(&relay, command).await;
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!("Console input failed: {}", e);
                break;
            }
        }
    }
}
