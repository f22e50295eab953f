// bCore board model and BLE plumbing
//
// Provides:
// - Board and motor-slot identities with the peripheral-local index mapping
// - The abstract GATT transport capability and its per-board task
// - The per-board link state machine
// - The btleplug-backed production transport

pub mod gatt;
pub mod link;
pub mod transport;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::{Uuid, uuid};

pub use link::{Link, LinkSignal, LinkStatus};
pub use transport::{BcoreCharacteristics, BcoreTransport, LinkEvent, TransportError};

/// Vendor GATT service exposed by every bCore board.
pub const BCORE_SERVICE: Uuid = uuid!("389caaf0-843f-4d3b-959d-c954cce14655");
/// Battery voltage characteristic: read-only, 2 bytes little-endian.
pub const BATTERY_VOLTAGE: Uuid = uuid!("389caaf1-843f-4d3b-959d-c954cce14655");
/// Motor PWM characteristic: write, 2 bytes `[motor index, power]`.
pub const MOTOR_PWM: Uuid = uuid!("389caaf2-843f-4d3b-959d-c954cce14655");

/// One of the two physical motor controller boards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Board {
    Front,
    Rear,
}

impl Board {
    pub fn opposite(self) -> Board {
        match self {
            Board::Front => Board::Rear,
            Board::Rear => Board::Front,
        }
    }

    /// The two motor slots this board drives, in peripheral index order.
    pub fn slots(self) -> [MotorSlot; 2] {
        match self {
            Board::Front => [MotorSlot::LeftFront, MotorSlot::RightFront],
            Board::Rear => [MotorSlot::RightBack, MotorSlot::LeftBack],
        }
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Board::Front => write!(f, "front"),
            Board::Rear => write!(f, "rear"),
        }
    }
}

/// Logical wheel position. The discriminant doubles as the index into the
/// coordinator's command cache and `WheelPowers::as_array`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorSlot {
    LeftFront = 0,
    RightFront = 1,
    LeftBack = 2,
    RightBack = 3,
}

impl MotorSlot {
    /// Dispatch order for one motor update. Boards are interleaved so
    /// consecutive writes never target the same peripheral back to back.
    pub const WRITE_ORDER: [MotorSlot; 4] = [
        MotorSlot::LeftFront,
        MotorSlot::RightBack,
        MotorSlot::RightFront,
        MotorSlot::LeftBack,
    ];

    /// The board that drives this wheel.
    pub fn board(self) -> Board {
        match self {
            MotorSlot::LeftFront | MotorSlot::RightFront => Board::Front,
            MotorSlot::LeftBack | MotorSlot::RightBack => Board::Rear,
        }
    }

    /// Peripheral-local motor index byte. Indices are per board, not global:
    /// the rear board numbers its motors the other way around.
    pub fn index(self) -> u8 {
        match self {
            MotorSlot::LeftFront => 0,
            MotorSlot::RightFront => 1,
            MotorSlot::LeftBack => 1,
            MotorSlot::RightBack => 0,
        }
    }
}
