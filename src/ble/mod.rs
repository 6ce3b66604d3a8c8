//! Bluetooth Low Energy link to a hub.
//!
//! The hub is reached as a GATT **Central**:
//!
//! 1. **Backend** - a small capability trait ([`BluetoothBackend`]) over the
//!    platform stack: device selection, GATT connect, service and
//!    characteristic lookup, notifications, writes, link-loss observation.
//! 2. **Transport** - drives a backend through the connect sequence, keeps
//!    the single-connection state machine and rolls back on failure.
//! 3. **Events** - notifications and link drops are pushed by the backend
//!    into a bounded channel, tagged with the id of the link they belong to.
//!
//! `simulated` implements the backend in memory; `scanner` and
//! `gatt_client` implement it on top of `btleplug` (feature `host`).

#[cfg(feature = "host")]
pub mod gatt_client;
#[cfg(feature = "host")]
pub mod scanner;
pub mod simulated;
pub mod transport;

use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use heapless::String;
use uuid::Uuid;

use crate::config::{DEVICE_INFORMATION_SERVICE_UUID, DEVICE_NAME_LEN, EVENT_CHANNEL_SIZE};
use crate::error::BackendError;

pub use transport::{LinkState, Transport};

/// Information about a discovered hub.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Platform address (MAC or OS identifier).
    pub address: std::string::String,
    /// Human-readable name (truncated to `DEVICE_NAME_LEN` bytes).
    pub name: String<DEVICE_NAME_LEN>,
    /// Received Signal Strength Indicator (dBm), if known.
    pub rssi: Option<i16>,
}

impl DiscoveredDevice {
    pub fn new(address: impl Into<std::string::String>, name: &str, rssi: Option<i16>) -> Self {
        Self {
            address: address.into(),
            name: truncated_name(name),
            rssi,
        }
    }
}

/// Copy `name` into a fixed-capacity string, dropping whatever does not fit.
pub fn truncated_name(name: &str) -> String<DEVICE_NAME_LEN> {
    let mut n = String::new();
    for c in name.chars() {
        if n.push(c).is_err() {
            break;
        }
    }
    n
}

/// Device selection request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestDeviceOptions {
    /// Only devices advertising one of these services are offered.
    pub services: Vec<Uuid>,
    /// Services the connection may additionally access.
    pub optional_services: Vec<Uuid>,
}

impl RequestDeviceOptions {
    /// Filter on the primary service; offer the characteristic and the
    /// Device Information service as optional.
    pub fn for_service(primary_service: Uuid, characteristic: Uuid) -> Self {
        Self {
            services: vec![primary_service],
            optional_services: vec![primary_service, characteristic, DEVICE_INFORMATION_SERVICE_UUID],
        }
    }
}

/// Platform Bluetooth capability used by [`Transport`].
///
/// Each method is one step of the connect sequence or one link operation.
/// Implementations push notifications and link drops through the
/// [`EventSink`] they are handed; they never buffer beyond that channel.
#[allow(async_fn_in_trait)]
pub trait BluetoothBackend {
    type Device: Clone;
    type Service;
    type Characteristic: Clone;

    /// Pick a device matching `options`.
    async fn request_device(
        &mut self,
        options: &RequestDeviceOptions,
    ) -> Result<Self::Device, BackendError>;

    /// Report an unsolicited link drop of `device` through `sink`.
    async fn watch_disconnect(&mut self, device: &Self::Device, sink: EventSink);

    async fn connect_gatt(&mut self, device: &Self::Device) -> Result<(), BackendError>;

    async fn primary_service(
        &mut self,
        device: &Self::Device,
        uuid: Uuid,
    ) -> Result<Self::Service, BackendError>;

    async fn characteristic(
        &mut self,
        service: &Self::Service,
        uuid: Uuid,
    ) -> Result<Self::Characteristic, BackendError>;

    /// Enable notifications and forward every value through `sink`.
    async fn start_notifications(
        &mut self,
        device: &Self::Device,
        characteristic: &Self::Characteristic,
        sink: EventSink,
    ) -> Result<(), BackendError>;

    /// Write with response.
    async fn write_with_response(
        &mut self,
        device: &Self::Device,
        characteristic: &Self::Characteristic,
        data: &[u8],
    ) -> Result<(), BackendError>;

    async fn disconnect(&mut self, device: &Self::Device) -> Result<(), BackendError>;

    /// The peer already dropped `device`. Release whatever the backend
    /// still holds for it (watchers, notification forwarders).
    fn release(&mut self, _device: &Self::Device) {}
}

// ═══════════════════════════════════════════════════════════════════════════
// Transport events
// ═══════════════════════════════════════════════════════════════════════════

/// Something that happened on a link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEventKind {
    /// A characteristic value notification.
    Notification(Vec<u8>),
    /// The link dropped without a local `disconnect()`.
    Disconnected,
}

/// An event tagged with the id of the link that produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportEvent {
    pub link: u32,
    pub kind: TransportEventKind,
}

pub type EventChannel = Channel<CriticalSectionRawMutex, TransportEvent, EVENT_CHANNEL_SIZE>;

/// Producer side of the event channel, bound to one link.
#[derive(Clone)]
pub struct EventSink {
    channel: Arc<EventChannel>,
    link: u32,
}

impl EventSink {
    pub fn new(channel: Arc<EventChannel>, link: u32) -> Self {
        Self { channel, link }
    }

    pub fn link(&self) -> u32 {
        self.link
    }

    /// Forward a notification, waiting for room in the channel.
    pub async fn notify(&self, data: Vec<u8>) {
        self.channel.send(self.event(TransportEventKind::Notification(data))).await;
    }

    /// Forward a notification without waiting. Returns `false` if the
    /// channel is full.
    pub fn try_notify(&self, data: Vec<u8>) -> bool {
        self.channel
            .try_send(self.event(TransportEventKind::Notification(data)))
            .is_ok()
    }

    pub async fn disconnected(&self) {
        self.channel.send(self.event(TransportEventKind::Disconnected)).await;
    }

    pub fn try_disconnected(&self) -> bool {
        self.channel
            .try_send(self.event(TransportEventKind::Disconnected))
            .is_ok()
    }

    fn event(&self, kind: TransportEventKind) -> TransportEvent {
        TransportEvent {
            link: self.link,
            kind,
        }
    }
}

/// Consumer side of the event channel. Events arrive in order.
#[derive(Clone)]
pub struct LinkEvents {
    channel: Arc<EventChannel>,
}

impl LinkEvents {
    pub(crate) fn new(channel: Arc<EventChannel>) -> Self {
        Self { channel }
    }

    pub async fn next(&self) -> TransportEvent {
        self.channel.receive().await
    }

    pub fn try_next(&self) -> Option<TransportEvent> {
        self.channel.try_receive().ok()
    }
}
