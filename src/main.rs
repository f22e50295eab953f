use clap::Parser;
use tracing_subscriber::EnvFilter;

use cica_zenoh_runtime::config;
use cica_zenoh_runtime::runtime::{self, BoardAddresses};

/// Drive the Cica mecanum platform over its two bCore BLE boards.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Hardware address of the front motor board
    #[arg(long, default_value = config::FRONT_BOARD_ADDRESS)]
    front_address: String,

    /// Hardware address of the rear motor board
    #[arg(long, default_value = config::REAR_BOARD_ADDRESS)]
    rear_address: String,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let args = Args::parse();
    let addresses = BoardAddresses {
        front: args.front_address,
        rear: args.rear_address,
    };

    if let Err(e) = runtime::run(addresses).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
