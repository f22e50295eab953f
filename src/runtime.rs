// Runtime shell: zenoh on one side, the two bCore links on the other.
//
// A ~100ms control tick drains pending drive commands (latest wins) and
// re-asserts the current intent to the coordinator, so the platform keeps
// tracking the last command even when the teleop peer is quiet. A watchdog
// replaces a stale intent with neutral so a dead peer stops the robot.

use tokio::sync::mpsc;
use tokio::time::{Instant, interval};
use tracing::{debug, info, warn};

use crate::bcore::gatt::BcoreCentral;
use crate::bcore::link::Link;
use crate::bcore::transport::drive_transport;
use crate::bcore::Board;
use crate::config;
use crate::coordinator::{Coordinator, CoordinatorCommand};
use crate::messages::{BatteryReading, DriveCommand, PlatformEvent, PlatformStatus};

/// Hardware addresses the runtime binds to; defaults live in `config`.
pub struct BoardAddresses {
    pub front: String,
    pub rear: String,
}

impl Default for BoardAddresses {
    fn default() -> Self {
        Self {
            front: config::FRONT_BOARD_ADDRESS.to_string(),
            rear: config::REAR_BOARD_ADDRESS.to_string(),
        }
    }
}

struct Runtime {
    latest_cmd: Option<DriveCommand>,
    cmd_received_at: Instant,
    stale: bool,
}

impl Runtime {
    fn new() -> Self {
        Self {
            latest_cmd: None,
            cmd_received_at: Instant::now(),
            stale: true, // Start stale until first cmd
        }
    }

    fn on_command(&mut self, command: DriveCommand) {
        debug!("Received drive command: {:?}", command);
        self.latest_cmd = Some(command.clamped());
        self.cmd_received_at = Instant::now();
    }

    /// The intent to re-assert this tick, with watchdog applied.
    fn desired_intent(&mut self) -> DriveCommand {
        let age = self.cmd_received_at.elapsed();
        match self.latest_cmd {
            Some(command) if age <= config::CMD_TIMEOUT => {
                self.stale = false;
                command
            }
            Some(_) => {
                if !self.stale {
                    warn!("Drive commands stale ({:?} old), stopping platform", age);
                }
                self.stale = true;
                DriveCommand::stop()
            }
            None => {
                self.stale = true;
                DriveCommand::stop()
            }
        }
    }
}

pub async fn run(addresses: BoardAddresses) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(config::TOPIC_CMD_DRIVE).await?;
    let pub_status = session.declare_publisher(config::TOPIC_STATUS).await?;
    let pub_battery = session.declare_publisher(config::TOPIC_BATTERY).await?;

    info!("Binding bluetooth adapter...");
    let (link_event_tx, link_event_rx) = mpsc::unbounded_channel();
    let central = BcoreCentral::new(link_event_tx.clone()).await?;

    let (front_io_tx, front_io_rx) = mpsc::unbounded_channel();
    let front_transport = central.transport(Board::Front, &addresses.front)?;
    tokio::spawn(drive_transport(
        Board::Front,
        front_transport,
        front_io_rx,
        link_event_tx.clone(),
    ));

    let (rear_io_tx, rear_io_rx) = mpsc::unbounded_channel();
    let rear_transport = central.transport(Board::Rear, &addresses.rear)?;
    tokio::spawn(drive_transport(
        Board::Rear,
        rear_transport,
        rear_io_rx,
        link_event_tx,
    ));

    let (platform_tx, mut platform_rx) = mpsc::unbounded_channel();
    let coordinator = Coordinator::new(
        Link::new(Board::Front, front_io_tx),
        Link::new(Board::Rear, rear_io_tx),
        platform_tx,
    );
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    tokio::spawn(coordinator.run(command_rx, link_event_rx));

    command_tx
        .send(CoordinatorCommand::Connect)
        .map_err(|_| "coordinator task stopped")?;

    let mut runtime = Runtime::new();
    let mut tick = interval(config::CONTROL_TICK);

    info!(
        "Runtime started: {:?} control tick, {:?} command timeout",
        config::CONTROL_TICK,
        config::CMD_TIMEOUT
    );
    info!("Subscribed to: {}", config::TOPIC_CMD_DRIVE);
    info!(
        "Publishing to: {}, {}",
        config::TOPIC_STATUS,
        config::TOPIC_BATTERY
    );

    loop {
        tokio::select! {
            _ = tick.tick() => {
                // Drain all pending commands (non-blocking), keep latest
                while let Ok(Some(sample)) = subscriber.try_recv() {
                    let payload = sample.payload().to_bytes();
                    match serde_json::from_slice::<DriveCommand>(&payload) {
                        Ok(command) => runtime.on_command(command),
                        Err(e) => warn!("Failed to parse drive command: {}", e),
                    }
                }

                // Re-assert the current intent; the coordinator's gate and
                // change suppression keep an unchanged intent free.
                let intent = runtime.desired_intent();
                command_tx
                    .send(CoordinatorCommand::Drive { command: intent, force: false })
                    .map_err(|_| "coordinator task stopped")?;
            }
            event = platform_rx.recv() => match event {
                Some(PlatformEvent::ConnectionChanged(connected)) => {
                    info!(
                        "Platform {}",
                        if connected { "connected" } else { "disconnected" }
                    );
                    let status = serde_json::to_string(&PlatformStatus { connected })?;
                    pub_status.put(status).await?;
                }
                Some(PlatformEvent::BatteryVoltage { board, voltage }) => {
                    debug!("{} battery voltage: {}", board, voltage);
                    let reading = serde_json::to_string(&BatteryReading { board, voltage })?;
                    pub_battery.put(reading).await?;
                }
                None => return Err("coordinator task stopped".into()),
            }
        }
    }
}
