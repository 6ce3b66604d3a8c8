//! Unified error type for swervelink.
//!
//! Two layers: [`BackendError`] is what a platform Bluetooth backend
//! reports, [`Error`] is what the transport and hub surface to callers.

use core::fmt;

use thiserror::Error;

/// Top-level error type used across the crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The host offers no Bluetooth capability. Fatal to any connect attempt.
    #[error("bluetooth is not available on this host")]
    TransportUnavailable,

    /// A step of the connect sequence was rejected. State has been rolled
    /// back; the caller may retry.
    #[error("connect failed while {step}: {reason}")]
    ConnectFailed {
        step: ConnectStep,
        reason: BackendError,
    },

    /// Write attempted with no active characteristic.
    #[error("no active hub connection")]
    NotConnected,

    /// A connection is already active or being established.
    #[error("a hub connection is already active or in progress")]
    AlreadyConnected,

    /// The characteristic write was rejected by the link.
    #[error("write failed: {0}")]
    WriteFailed(BackendError),

    /// A message envelope could not be parsed or serialised.
    #[error("malformed message: {0}")]
    Message(#[from] serde_json::Error),

    /// The hub event bus has no free subscriber slots.
    #[error("hub event bus has no free subscriber slots")]
    SubscriberLimit,
}

/// Failures reported by a platform Bluetooth backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// No adapter, or the platform refuses Bluetooth access.
    #[error("bluetooth unavailable")]
    Unavailable,

    /// Device selection was cancelled or nothing matched the filter.
    #[error("no device selected")]
    NoDeviceSelected,

    /// The requested service or characteristic does not exist.
    #[error("not found")]
    NotFound,

    /// The link is gone.
    #[error("link lost")]
    Disconnected,

    /// Anything else the platform stack reported.
    #[error("{0}")]
    Platform(String),
}

/// Steps of the connect sequence, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStep {
    RequestDevice,
    ConnectGatt,
    PrimaryService,
    Characteristic,
    StartNotifications,
}

impl fmt::Display for ConnectStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectStep::RequestDevice => "selecting a device",
            ConnectStep::ConnectGatt => "opening the GATT connection",
            ConnectStep::PrimaryService => "resolving the primary service",
            ConnectStep::Characteristic => "resolving the characteristic",
            ConnectStep::StartNotifications => "enabling notifications",
        };
        f.write_str(label)
    }
}

pub type Result<T> = core::result::Result<T, Error>;

// Convenience conversions

impl Error {
    /// Map a backend failure during `step` of the connect sequence.
    pub fn connect(step: ConnectStep, reason: BackendError) -> Self {
        match reason {
            BackendError::Unavailable => Error::TransportUnavailable,
            reason => Error::ConnectFailed { step, reason },
        }
    }
}

impl From<BackendError> for Error {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Unavailable => Error::TransportUnavailable,
            BackendError::Disconnected => Error::NotConnected,
            other => Error::WriteFailed(other),
        }
    }
}
