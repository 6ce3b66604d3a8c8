//! Application-wide constants and compile-time configuration.
//!
//! Wire identifiers, channel capacities and timing parameters live here
//! so they can be tuned in one place. The wire identifiers must match the
//! hub firmware exactly.

use uuid::Uuid;

// BLE

/// Primary GATT service exposed by the hub firmware.
pub const HUB_SERVICE_UUID: Uuid = Uuid::from_u128(0xc5f50001_8280_46da_89f4_6d8051e4aeef);

/// Control characteristic: commands are written to it, events arrive as
/// notifications on it.
pub const HUB_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0xc5f50002_8280_46da_89f4_6d8051e4aeef);

/// Device Information service (0x180A), requested as an optional service.
pub const DEVICE_INFORMATION_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000180a_0000_1000_8000_00805f9b34fb);

/// Duration of a BLE scan window (seconds).
pub const BLE_SCAN_DURATION_SECS: u64 = 5;

/// Maximum number of BLE peripherals offered for selection in one scan.
pub const BLE_MAX_DISCOVERED: usize = 8;

/// Capacity of a device name (bytes). Longer names are truncated.
pub const DEVICE_NAME_LEN: usize = 32;

// Hub protocol

/// Command: stop the user program.
pub const STOP_USER_PROGRAM_COMMAND: u8 = 0x00;

/// Command: start the user program.
pub const START_USER_PROGRAM_COMMAND: u8 = 0x01;

/// Command: write to the user program's standard input.
pub const WRITE_STDIN_COMMAND: u8 = 0x06;

/// Event: status report (1-byte bitmask follows).
pub const STATUS_REPORT_EVENT: u8 = 0x00;

/// Event: the user program wrote to standard output.
pub const WRITE_STDOUT_EVENT: u8 = 0x01;

/// Status bit set while a user program is running.
pub const USER_PROGRAM_RUNNING_STATUS_FLAG: u8 = 1 << 6;

/// Standard-output payload the firmware writes after each processed stdin line.
pub const ACK_TOKEN: &[u8] = b"ack";

// Channels

/// Transport event channel depth (notifications + link drops).
pub const EVENT_CHANNEL_SIZE: usize = 32;

/// Hub event bus depth before slow subscribers start lagging.
pub const EVENT_BUS_CAPACITY: usize = 16;

/// Maximum simultaneous hub event subscribers.
pub const EVENT_BUS_SUBSCRIBERS: usize = 4;

/// Hub event bus publishers. The hub is the only one.
pub const EVENT_BUS_PUBLISHERS: usize = 1;

/// Entries kept in the in-memory message log.
pub const MESSAGE_LOG_CAPACITY: usize = 64;

// Control

/// Gamepad streaming rate in Hz.
pub const CONTROL_LOOP_HZ: u64 = 60;
pub const CONTROL_LOOP_PERIOD_MS: u64 = 1000 / CONTROL_LOOP_HZ;

/// Full-scale joystick deflection on one axis.
pub const MAX_AXIS_VALUE: f64 = 100.0;

/// Swerve module offsets from the chassis centre, in order:
/// left front, right front, left rear, right rear.
pub const SWERVE_MODULE_POSITIONS: [(f64, f64); 4] = [(-1.0, 1.0), (1.0, 1.0), (-1.0, -1.0), (1.0, -1.0)];
