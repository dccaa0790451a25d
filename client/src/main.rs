use clap::Parser;
use client::console::Command;
use client::context::SessionConfig;
use client::network::Client;
use client::prefs::FilePrefs;
use log::info;
use shared::EntityKind;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Display name; overrides the stored one
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// Capacity of rooms this client creates
    #[arg(short = 'm', long, default_value = "4")]
    max_players: u8,

    /// State replication ticks per second
    #[arg(short = 't', long, default_value = "30")]
    tick_rate: u32,

    /// File the player name is remembered in
    #[arg(long, default_value = ".room-sync-prefs")]
    prefs_file: String,

    /// Prefab spawned for the local player
    #[arg(long, default_value = "player")]
    prefab: String,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let player_prefab = match args.prefab.parse::<EntityKind>() {
        Ok(kind) => Some(kind),
        Err(e) => {
            eprintln!("{}", e);
            None
        }
    };
    let config = SessionConfig {
        max_participants: args.max_players,
        tick_rate: args.tick_rate,
        player_prefab,
    };

    info!("Starting client...");
    info!("Server: {}", args.server);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }
    println!("{}", Command::HELP);

    let prefs = FilePrefs::open(&args.prefs_file)?;
    let mut client = Client::new(&args.server, args.fake_ping, config, prefs, args.name).await?;

    client.run().await?;

    Ok(())
}
