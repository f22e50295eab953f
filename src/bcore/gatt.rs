// btleplug-backed bCore transport
//
// The central owns the host adapter and one watcher task that translates the
// adapter's connection chatter into link events for the two known boards.
// Each board gets its own transport bound to a fixed hardware address; the
// peripheral handle is found by scanning once and reused across reconnects.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::{Stream, StreamExt};
use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{Duration, Instant, sleep};
use tracing::{debug, info};

use super::transport::{BcoreCharacteristics, BcoreTransport, LinkEvent, TransportError};
use super::{BATTERY_VOLTAGE, BCORE_SERVICE, Board, MOTOR_PWM};

/// How long a scan may run before a connect attempt is declared failed.
const SCAN_TIMEOUT: Duration = Duration::from_secs(10);
const SCAN_POLL: Duration = Duration::from_millis(200);

type BoardRegistry = Arc<Mutex<HashMap<PeripheralId, Board>>>;
type CentralEvents = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;

/// Host-adapter handle; hands out one transport per board.
pub struct BcoreCentral {
    adapter: Adapter,
    registry: BoardRegistry,
}

impl BcoreCentral {
    pub async fn new(
        events: UnboundedSender<(Board, LinkEvent<Characteristic>)>,
    ) -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(TransportError::NoAdapter)?;
        let registry: BoardRegistry = Arc::default();

        let stream = adapter.events().await?;
        tokio::spawn(watch_central(stream, registry.clone(), events));

        Ok(Self { adapter, registry })
    }

    /// The transport for one board at the given hardware address.
    pub fn transport(
        &self,
        board: Board,
        address: &str,
    ) -> Result<GattBoardTransport, TransportError> {
        let address = address
            .parse::<BDAddr>()
            .map_err(|_| TransportError::InvalidAddress(address.to_string()))?;
        Ok(GattBoardTransport {
            adapter: self.adapter.clone(),
            board,
            address,
            peripheral: Mutex::new(None),
            registry: self.registry.clone(),
        })
    }
}

/// Forward connect/disconnect chatter for the registered boards. This is
/// the single source of connection state; transports never report it.
async fn watch_central(
    mut stream: CentralEvents,
    registry: BoardRegistry,
    events: UnboundedSender<(Board, LinkEvent<Characteristic>)>,
) {
    while let Some(event) = stream.next().await {
        let (id, link_event) = match event {
            CentralEvent::DeviceConnected(id) => (id, LinkEvent::Connected),
            CentralEvent::DeviceDisconnected(id) => (id, LinkEvent::Disconnected),
            _ => continue,
        };
        let board = registry.lock().await.get(&id).copied();
        if let Some(board) = board {
            debug!("{} board transport {:?}", board, link_event);
            if events.send((board, link_event)).is_err() {
                break;
            }
        }
    }
}

pub struct GattBoardTransport {
    adapter: Adapter,
    board: Board,
    address: BDAddr,
    peripheral: Mutex<Option<Peripheral>>,
    registry: BoardRegistry,
}

impl GattBoardTransport {
    /// The board's peripheral, scanning for it on first use. The handle is
    /// kept across reconnects; only the very first connect pays for a scan.
    async fn peripheral(&self) -> Result<Peripheral, TransportError> {
        let mut slot = self.peripheral.lock().await;
        if let Some(peripheral) = slot.as_ref() {
            return Ok(peripheral.clone());
        }
        let peripheral = self.locate().await?;
        self.registry
            .lock()
            .await
            .insert(peripheral.id(), self.board);
        *slot = Some(peripheral.clone());
        Ok(peripheral)
    }

    /// The already-bound peripheral; reads and writes never trigger a scan.
    async fn bound_peripheral(&self) -> Result<Peripheral, TransportError> {
        self.peripheral
            .lock()
            .await
            .clone()
            .ok_or(TransportError::NotConnected(self.board))
    }

    async fn locate(&self) -> Result<Peripheral, TransportError> {
        info!("{} board: scanning for {}", self.board, self.address);
        self.adapter.start_scan(ScanFilter::default()).await?;
        let deadline = Instant::now() + SCAN_TIMEOUT;
        let mut found = None;
        while found.is_none() && Instant::now() < deadline {
            for peripheral in self.adapter.peripherals().await? {
                if peripheral.address() == self.address {
                    found = Some(peripheral);
                    break;
                }
            }
            if found.is_none() {
                sleep(SCAN_POLL).await;
            }
        }
        let _ = self.adapter.stop_scan().await;
        found.ok_or(TransportError::BoardNotFound(self.board))
    }
}

#[async_trait]
impl BcoreTransport for GattBoardTransport {
    type Char = Characteristic;

    async fn connect(&self) -> Result<(), TransportError> {
        let peripheral = self.peripheral().await?;
        peripheral.connect().await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(peripheral) = self.peripheral.lock().await.clone() {
            peripheral.disconnect().await?;
        }
        Ok(())
    }

    async fn discover(&self) -> Result<BcoreCharacteristics<Characteristic>, TransportError> {
        let peripheral = self.bound_peripheral().await?;
        peripheral.discover_services().await?;
        let service = peripheral
            .services()
            .into_iter()
            .find(|service| service.uuid == BCORE_SERVICE)
            .ok_or(TransportError::ServiceMissing)?;
        let battery = service
            .characteristics
            .iter()
            .find(|c| c.uuid == BATTERY_VOLTAGE)
            .cloned()
            .ok_or(TransportError::CharacteristicMissing("battery voltage"))?;
        let motor = service
            .characteristics
            .iter()
            .find(|c| c.uuid == MOTOR_PWM)
            .cloned()
            .ok_or(TransportError::CharacteristicMissing("motor pwm"))?;
        debug!("{} board: bcore service resolved", self.board);
        Ok(BcoreCharacteristics { battery, motor })
    }

    async fn read(&self, characteristic: &Characteristic) -> Result<Vec<u8>, TransportError> {
        let peripheral = self.bound_peripheral().await?;
        Ok(peripheral.read(characteristic).await?)
    }

    async fn write(
        &self,
        characteristic: &Characteristic,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let peripheral = self.bound_peripheral().await?;
        peripheral
            .write(characteristic, payload, WriteType::WithoutResponse)
            .await?;
        Ok(())
    }
}
