use clap::Parser;
use client::network::{Client, ClientOptions};
use log::info;
use shared::{MatchConfig, DEFAULT_MATCH_SECONDS};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Display name shown in the roster
    #[arg(short = 'n', long, default_value = "player")]
    name: String,

    /// Match ticks per second
    #[arg(short = 't', long, default_value = "30")]
    tick_rate: u32,

    /// Round length in seconds
    #[arg(short = 'm', long, default_value_t = DEFAULT_MATCH_SECONDS)]
    match_seconds: f32,

    /// Start rounds automatically while holding authority
    #[arg(short = 'a', long)]
    auto_start: bool,

    /// Seed for spawn selection, for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

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

    info!("Starting replica {}...", args.name);
    info!("Connecting to: {}", args.server);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }

    let options = ClientOptions {
        server_addr: args.server,
        name: args.name,
        tick_rate: args.tick_rate,
        fake_ping_ms: args.fake_ping,
        auto_start: args.auto_start,
        seed: args.seed,
        match_config: MatchConfig::default().with_duration(args.match_seconds),
    };

    let mut client = Client::new(options).await?;
    client.run().await?;

    Ok(())
}
