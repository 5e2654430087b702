use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use mpn_netd::lobby::LobbyServer;
use mpn_netd::registry::Registry;
use mpn_netd::{broadcast, stats};

/// MPN Netplay Server
#[derive(Parser, Debug)]
#[command(name = "mpn-netd")]
#[command(about = "Netplay lobby and realtime relay server", long_about = None)]
struct Args {
    /// Server name announced to clients and LAN broadcasts
    #[arg(long, default_value = "Localhost")]
    name: String,

    /// Lobby WebSocket port; rooms use the ports directly above it
    #[arg(long, default_value_t = 45000)]
    baseport: u16,

    /// Do not answer LAN discovery broadcasts
    #[arg(long)]
    disable_broadcast: bool,

    /// Also write logs to this file
    #[arg(long)]
    log_path: Option<PathBuf>,

    /// MOTD message to display to clients
    #[arg(long, default_value = "MPN Beta")]
    motd: String,

    /// Maximum number of concurrent games
    #[arg(long, default_value_t = 10)]
    max_games: u16,

    /// Enable client authentication
    #[arg(long)]
    enable_auth: bool,
}

fn init_tracing(log_path: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .compact()
                .with_writer(std::io::stderr.and(std::sync::Mutex::new(file)))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .compact()
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_path.as_deref())?;

    if args.name.is_empty() {
        error!("server name not set");
        std::process::exit(1);
    }

    let registry = Arc::new(Registry::new(args.baseport, args.max_games));

    if !args.disable_broadcast {
        let name = args.name.clone();
        let base_port = args.baseport;
        tokio::spawn(async move {
            if let Err(e) =
                broadcast::run_broadcast_responder(name, base_port, broadcast::BROADCAST_PORT).await
            {
                error!(error = %e, "could not listen for broadcasts");
            }
        });
    }

    tokio::spawn(stats::log_server_stats(Arc::clone(&registry)));
    tokio::spawn(Arc::clone(&registry).purge_inactive_rooms());

    let listener = TcpListener::bind(("0.0.0.0", args.baseport)).await?;
    info!(
        port = args.baseport,
        version = mpn_netd::version(),
        max_games = args.max_games,
        enable_auth = args.enable_auth,
        "server running"
    );

    let lobby = Arc::new(LobbyServer {
        name: args.name,
        motd: args.motd,
        base_port: args.baseport,
        enable_auth: args.enable_auth,
        registry,
    });
    lobby.run(listener).await
}
