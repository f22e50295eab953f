// Abstract GATT capability consumed by the link layer
//
// The platform BLE stack is driven from one task per board: the link state
// machine pushes `IoCommand`s, the task executes them serially against the
// transport and reports completions as tagged `LinkEvent`s. Unsolicited
// connection state changes (from the central's event stream) arrive on the
// same event channel, so the coordinator sees a single ordered feed per
// board.

use async_trait::async_trait;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::warn;

use super::Board;

/// Error type for the BLE boundary.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("bluetooth stack error: {0}")]
    Stack(#[from] btleplug::Error),

    #[error("no bluetooth adapter available")]
    NoAdapter,

    #[error("invalid board address `{0}`")]
    InvalidAddress(String),

    #[error("{0} board not found during scan")]
    BoardNotFound(Board),

    #[error("{0} board has no transport handle yet")]
    NotConnected(Board),

    #[error("bcore service missing after discovery")]
    ServiceMissing,

    #[error("{0} characteristic missing after discovery")]
    CharacteristicMissing(&'static str),
}

/// The two characteristic handles a connected board resolves to.
#[derive(Debug, Clone, PartialEq)]
pub struct BcoreCharacteristics<C> {
    pub battery: C,
    pub motor: C,
}

/// One board's view of the BLE capability. The implementation owns the
/// underlying peripheral handle, creates it lazily on the first connect and
/// reuses it across reconnects.
#[async_trait]
pub trait BcoreTransport: Send + Sync + 'static {
    /// Opaque characteristic handle passed back into `read`/`write`.
    type Char: Clone + Send + Sync + 'static;

    /// Initiate a connection attempt. Success is reported out of band as a
    /// `LinkEvent::Connected` from the central watcher.
    async fn connect(&self) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Run service discovery and resolve the two bCore characteristics.
    async fn discover(&self) -> Result<BcoreCharacteristics<Self::Char>, TransportError>;

    async fn read(&self, characteristic: &Self::Char) -> Result<Vec<u8>, TransportError>;

    async fn write(
        &self,
        characteristic: &Self::Char,
        payload: &[u8],
    ) -> Result<(), TransportError>;
}

/// Operations the link state machine asks its transport task to perform.
#[derive(Debug, PartialEq)]
pub enum IoCommand<C> {
    Connect,
    Disconnect,
    Discover,
    Read(C),
    Write(C, [u8; 2]),
}

/// Everything a board's link can learn asynchronously, in one tagged feed.
#[derive(Debug)]
pub enum LinkEvent<C> {
    Connected,
    ConnectFailed(TransportError),
    Disconnected,
    Discovered(Result<BcoreCharacteristics<C>, TransportError>),
    BatteryRead(Result<Vec<u8>, TransportError>),
}

/// Per-board transport task: executes commands serially, emits completions.
///
/// A successful connect emits nothing here — the canonical `Connected` comes
/// from the central's event stream, keeping a single source for connection
/// state. Writes are fire-and-forget; a failed write is logged and dropped
/// (the next changed update re-sends the slot anyway).
pub async fn drive_transport<T: BcoreTransport>(
    board: Board,
    transport: T,
    mut commands: UnboundedReceiver<IoCommand<T::Char>>,
    events: UnboundedSender<(Board, LinkEvent<T::Char>)>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            IoCommand::Connect => {
                if let Err(e) = transport.connect().await {
                    let _ = events.send((board, LinkEvent::ConnectFailed(e)));
                }
            }
            IoCommand::Disconnect => {
                if let Err(e) = transport.disconnect().await {
                    warn!("{} board disconnect failed: {}", board, e);
                }
            }
            IoCommand::Discover => {
                let result = transport.discover().await;
                let _ = events.send((board, LinkEvent::Discovered(result)));
            }
            IoCommand::Read(characteristic) => {
                let result = transport.read(&characteristic).await;
                let _ = events.send((board, LinkEvent::BatteryRead(result)));
            }
            IoCommand::Write(characteristic, payload) => {
                if let Err(e) = transport.write(&characteristic, &payload).await {
                    warn!("{} board motor write failed: {}", board, e);
                }
            }
        }
    }
}
