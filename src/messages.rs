// Message types crossing the runtime's boundaries

use serde::{Deserialize, Serialize};

use crate::bcore::Board;

/// Drive intent from a teleop peer: three normalized axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriveCommand {
    pub fb: f32,
    pub lr: f32,
    pub rotate: f32,
}

impl DriveCommand {
    pub fn stop() -> Self {
        Self {
            fb: 0.0,
            lr: 0.0,
            rotate: 0.0,
        }
    }

    /// Clamp every axis into [-1, 1]; peers are not trusted to do so.
    pub fn clamped(self) -> Self {
        Self {
            fb: self.fb.clamp(-1.0, 1.0),
            lr: self.lr.clamp(-1.0, 1.0),
            rotate: self.rotate.clamp(-1.0, 1.0),
        }
    }
}

impl Default for DriveCommand {
    fn default() -> Self {
        Self::stop()
    }
}

/// Platform connection status, published on every ready edge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlatformStatus {
    pub connected: bool,
}

/// One battery voltage sample, raw little-endian value as transmitted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BatteryReading {
    pub board: Board,
    pub voltage: u16,
}

/// Events surfaced by the coordinator to the runtime shell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlatformEvent {
    ConnectionChanged(bool),
    BatteryVoltage { board: Board, voltage: u16 },
}
