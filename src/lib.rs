// Runtime for the Cica mecanum platform: bridges zenoh teleop traffic to the
// two bCore BLE motor boards and surfaces their telemetry.

pub mod bcore;
pub mod config;
pub mod coordinator;
pub mod kinematics;
pub mod messages;
pub mod runtime;
