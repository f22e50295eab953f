// Per-board link lifecycle
//
// One `Link` per physical board. The struct is pure state plus an outbox of
// `IoCommand`s; all I/O happens in the board's transport task, so nothing
// here blocks. Events come back through the coordinator, which calls
// `handle_event` and acts on the returned signal.

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::config;

use super::transport::{BcoreCharacteristics, IoCommand, LinkEvent};
use super::Board;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// What a handled event means to the coordinator.
#[derive(Debug)]
pub enum LinkSignal {
    /// Discovery finished; the board is usable.
    Up,
    /// The transport link dropped (or was explicitly closed).
    Down,
    /// A connect attempt failed; re-invoke `connect` after this pause.
    RetryAfter(std::time::Duration),
    /// A battery read completed with this raw voltage.
    Battery(u16),
}

pub struct Link<C> {
    board: Board,
    status: LinkStatus,
    /// Set by an operator-initiated `disconnect`; suppresses auto-reconnect
    /// so a deliberate shutdown stays shut down.
    explicit_disconnect: bool,
    characteristics: Option<BcoreCharacteristics<C>>,
    io: UnboundedSender<IoCommand<C>>,
}

impl<C: Clone> Link<C> {
    pub fn new(board: Board, io: UnboundedSender<IoCommand<C>>) -> Self {
        Self {
            board,
            status: LinkStatus::Disconnected,
            explicit_disconnect: false,
            characteristics: None,
            io,
        }
    }

    pub fn board(&self) -> Board {
        self.board
    }

    pub fn status(&self) -> LinkStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == LinkStatus::Connected
    }

    /// Start (or restart) the connection. No-op while an attempt is already
    /// in flight or the link is up; the transport reuses its handle across
    /// reconnects.
    pub fn connect(&mut self) {
        if self.status != LinkStatus::Disconnected {
            return;
        }
        debug!("{} link connecting", self.board);
        self.explicit_disconnect = false;
        self.status = LinkStatus::Connecting;
        let _ = self.io.send(IoCommand::Connect);
    }

    /// Operator-initiated teardown; does not auto-retry.
    pub fn disconnect(&mut self) {
        debug!("{} link closing", self.board);
        self.explicit_disconnect = true;
        self.status = LinkStatus::Disconnected;
        self.characteristics = None;
        let _ = self.io.send(IoCommand::Disconnect);
    }

    /// Issue a battery read; silent no-op unless the link is up.
    pub fn read_battery(&self) {
        if let (LinkStatus::Connected, Some(chars)) = (self.status, &self.characteristics) {
            let _ = self.io.send(IoCommand::Read(chars.battery.clone()));
        }
    }

    /// Issue a motor write; silent no-op unless the link is up. Races with
    /// teardown are normal and not errors.
    pub fn write_motor(&self, index: u8, power: u8) {
        if let (LinkStatus::Connected, Some(chars)) = (self.status, &self.characteristics) {
            let _ = self
                .io
                .send(IoCommand::Write(chars.motor.clone(), [index, power]));
        }
    }

    pub fn handle_event(&mut self, event: LinkEvent<C>) -> Option<LinkSignal> {
        match event {
            LinkEvent::Connected => {
                if self.explicit_disconnect || self.status == LinkStatus::Connected {
                    return None;
                }
                // Transport is up; the board is not usable until discovery
                // resolves the characteristics.
                self.status = LinkStatus::Connecting;
                let _ = self.io.send(IoCommand::Discover);
                None
            }
            LinkEvent::ConnectFailed(e) => {
                if self.explicit_disconnect {
                    return None;
                }
                warn!("{} board connect failed: {}", self.board, e);
                self.status = LinkStatus::Disconnected;
                Some(LinkSignal::RetryAfter(config::CONNECT_RETRY_PAUSE))
            }
            LinkEvent::Discovered(Ok(characteristics)) => {
                if self.explicit_disconnect || self.status != LinkStatus::Connecting {
                    return None;
                }
                info!("{} link up", self.board);
                self.characteristics = Some(characteristics);
                self.status = LinkStatus::Connected;
                Some(LinkSignal::Up)
            }
            LinkEvent::Discovered(Err(e)) => {
                if self.explicit_disconnect {
                    return None;
                }
                // Wrong or half-initialized firmware. Drop the link; the
                // resulting disconnected event re-enters the reconnect path
                // instead of wedging in Connecting.
                warn!("{} board discovery failed: {}; dropping link", self.board, e);
                let _ = self.io.send(IoCommand::Disconnect);
                None
            }
            LinkEvent::Disconnected => {
                self.characteristics = None;
                self.status = LinkStatus::Disconnected;
                if self.explicit_disconnect {
                    info!("{} link closed", self.board);
                } else {
                    info!("{} link lost, reconnecting", self.board);
                    self.connect();
                }
                Some(LinkSignal::Down)
            }
            LinkEvent::BatteryRead(Ok(payload)) => {
                if self.status != LinkStatus::Connected {
                    // Late completion from a torn-down link; stale, drop it.
                    return None;
                }
                if payload.len() < 2 {
                    warn!(
                        "{} board battery payload too short: {} bytes",
                        self.board,
                        payload.len()
                    );
                    return None;
                }
                Some(LinkSignal::Battery(u16::from_le_bytes([
                    payload[0], payload[1],
                ])))
            }
            LinkEvent::BatteryRead(Err(e)) => {
                // The poll cycle stalls here until the next ready edge.
                warn!("{} board battery read failed: {}", self.board, e);
                None
            }
        }
    }
}
