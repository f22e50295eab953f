// Board probe: READ-ONLY connectivity check for the two bCore boards
//
// Connects to each board in turn, resolves the vendor service, and reads the
// battery voltage once. Motors are never touched.
//
// Usage: cargo run --example board_probe -- [front_address] [rear_address]

use cica_zenoh_runtime::bcore::gatt::BcoreCentral;
use cica_zenoh_runtime::bcore::transport::BcoreTransport;
use cica_zenoh_runtime::bcore::Board;
use cica_zenoh_runtime::config;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("debug".parse().unwrap()),
        )
        .init();

    let front = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config::FRONT_BOARD_ADDRESS.to_string());
    let rear = std::env::args()
        .nth(2)
        .unwrap_or_else(|| config::REAR_BOARD_ADDRESS.to_string());

    println!("bCore board probe (read-only, motors untouched)");
    println!();

    // The watcher wants somewhere to send connection chatter; the probe
    // drives the transports directly and does not need it.
    let (event_tx, _events) = mpsc::unbounded_channel();
    let central = BcoreCentral::new(event_tx).await?;

    let mut all_ok = true;
    for (board, address) in [(Board::Front, &front), (Board::Rear, &rear)] {
        println!("{} board at {}:", board, address);
        let transport = central.transport(board, address)?;

        print!("  connecting... ");
        if let Err(e) = transport.connect().await {
            println!("FAILED: {}", e);
            all_ok = false;
            continue;
        }
        println!("ok");

        print!("  resolving bcore service... ");
        let characteristics = match transport.discover().await {
            Ok(characteristics) => {
                println!("ok");
                characteristics
            }
            Err(e) => {
                println!("FAILED: {}", e);
                all_ok = false;
                let _ = transport.disconnect().await;
                continue;
            }
        };

        print!("  reading battery... ");
        match transport.read(&characteristics.battery).await {
            Ok(payload) if payload.len() >= 2 => {
                let voltage = u16::from_le_bytes([payload[0], payload[1]]);
                println!("ok, raw voltage {}", voltage);
            }
            Ok(payload) => {
                println!("FAILED: short payload ({} bytes)", payload.len());
                all_ok = false;
            }
            Err(e) => {
                println!("FAILED: {}", e);
                all_ok = false;
            }
        }

        transport.disconnect().await?;
        println!();
    }

    if all_ok {
        println!("Both boards look healthy. You can now run the full runtime with: cargo run");
    } else {
        println!("At least one board failed the probe; check power and addresses.");
    }

    Ok(())
}
