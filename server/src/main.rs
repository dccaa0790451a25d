use clap::Parser;
use log::info;
use server::matchmaker::MatchmakerSettings;
use server::network::{Server, ServerConfig};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Relay ticks per second
    #[arg(short, long, default_value = "30")]
    tick_rate: u32,

    /// Maximum number of connected clients
    #[arg(long, default_value = "64")]
    max_clients: usize,

    /// Seconds of silence before a client is dropped
    #[arg(long, default_value = "5")]
    timeout_secs: u64,

    /// Largest room capacity a client may request
    #[arg(long, default_value = "16")]
    max_room_size: u8,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let tick_rate = args.tick_rate.max(1);
    let address = format!("{}:{}", args.host, args.port);

    let config = ServerConfig {
        tick_duration: Duration::from_millis(1000 / tick_rate as u64),
        max_clients: args.max_clients,
        client_timeout: Duration::from_secs(args.timeout_secs),
        matchmaker: MatchmakerSettings {
            max_room_size: args.max_room_size,
            ..MatchmakerSettings::default()
        },
    };

    info!("Starting server on {} at {}Hz", address, tick_rate);

    let mut server = Server::new(&address, config).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
