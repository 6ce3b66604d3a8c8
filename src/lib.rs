//! swervelink - Bluetooth control link for a LEGO swerve-drive robot.
//!
//! Talks to hubs running the robot firmware over their BLE control
//! characteristic: starts and stops the user program, streams joystick
//! commands through an ack-gated pipeline and reassembles the JSON
//! messages the hub prints on standard output.
//!
//! Everything here runs on any host without a radio: the platform
//! Bluetooth stack sits behind [`ble::BluetoothBackend`], and
//! [`ble::simulated`] stands in for it in tests.
//!
//! Usage: `cargo test` for the core, `cargo run --features host` for the
//! operator console.

// ═══════════════════════════════════════════════════════════════════════════
// Modules
// ═══════════════════════════════════════════════════════════════════════════

pub mod ble;
pub mod config;
pub mod drive;
pub mod error;
pub mod hub;
pub mod kinematics;
pub mod protocol;

// ═══════════════════════════════════════════════════════════════════════════
// Re-exports
// ═══════════════════════════════════════════════════════════════════════════

pub use ble::{BluetoothBackend, LinkEvents, LinkState, Transport, TransportEvent};
pub use drive::{AxisUpdate, ChassisVelocity, VelocityStream};
pub use error::{BackendError, ConnectStep, Error, Result};
pub use hub::{
    subscribe, DeliveryMode, Hub, HubEvent, HubEventBus, MessageWaiter, SendOptions, SendOutcome,
    StdoutMode,
};
pub use kinematics::{SwerveModuleState, Vector2, Vector3};
pub use protocol::{JsonStream, Message};
