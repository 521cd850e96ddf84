use clap::Parser;
use log::{error, info};
use server::config::{ServerConfig, DEFAULT_CONFIG_PATH};
use server::console;
use server::heartbeat::{Heartbeat, LogReporter};
use server::network::Server;
use std::path::PathBuf;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the JSON config file, created with defaults if missing
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// IP address to bind to, overrides the config file
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Stream port; datagram and WebSocket use the next two ports
    #[arg(short, long)]
    port: Option<u16>,

    /// Do not read admin commands from stdin
    #[arg(long)]
    no_console: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = ServerConfig::load_or_create(&args.config)?;
    if let Some(host) = args.host {
        config.ip = host;
    }
    if let Some(port) = args.port {
        config = config.with_base_port(port);
    }

    info!("Starting relay '{}'", config.server_name);
    let heartbeat_interval = config.heartbeat_interval();

    let server = Server::bind(config).await?.with_config_path(&args.config);
    let relay = server.relay();

    tokio::spawn(Heartbeat::new(LogReporter).run(relay.clone(), heartbeat_interval));
    if !args.no_console {
        tokio::spawn(console::run(relay));
    }

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    Ok(())
}
