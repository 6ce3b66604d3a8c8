//! In-memory Bluetooth backend.
//!
//! [`SimulatedBackend`] plays the platform stack; the paired
//! [`SimulatedPeer`] plays the hub: it records every write, pushes
//! notifications, drops the link and injects failures into any connect
//! step. Used by the test suites and for dry runs without a radio.

use core::cell::RefCell;
use std::sync::Arc;

use embassy_sync::blocking_mutex::CriticalSectionMutex;
use tracing::trace;
use uuid::Uuid;

use super::{BluetoothBackend, DiscoveredDevice, EventSink, RequestDeviceOptions};
use crate::config::{
    HUB_CHARACTERISTIC_UUID, HUB_SERVICE_UUID, STATUS_REPORT_EVENT, WRITE_STDOUT_EVENT,
};
use crate::error::{BackendError, ConnectStep};

struct SimState {
    device: DiscoveredDevice,
    service: Uuid,
    characteristic: Uuid,
    unavailable: bool,
    cancel_selection: bool,
    fail_step: Option<ConnectStep>,
    fail_writes: bool,
    gatt_connected: bool,
    notifying: bool,
    writes: Vec<Vec<u8>>,
    releases: usize,
    disconnect_sink: Option<EventSink>,
    notify_sink: Option<EventSink>,
}

impl SimState {
    fn new(device: DiscoveredDevice) -> Self {
        Self {
            device,
            service: HUB_SERVICE_UUID,
            characteristic: HUB_CHARACTERISTIC_UUID,
            unavailable: false,
            cancel_selection: false,
            fail_step: None,
            fail_writes: false,
            gatt_connected: false,
            notifying: false,
            writes: Vec::new(),
            releases: 0,
            disconnect_sink: None,
            notify_sink: None,
        }
    }

    fn fails_at(&self, step: ConnectStep) -> bool {
        self.fail_step == Some(step)
    }

    fn close(&mut self) {
        self.gatt_connected = false;
        self.notifying = false;
        self.notify_sink = None;
    }
}

type Shared = Arc<CriticalSectionMutex<RefCell<SimState>>>;

fn with_state<R>(shared: &Shared, f: impl FnOnce(&mut SimState) -> R) -> R {
    shared.lock(|cell| f(&mut cell.borrow_mut()))
}

/// Backend half: hand this to a `Transport` or `Hub`.
pub struct SimulatedBackend {
    shared: Shared,
}

/// Hub half: drives and inspects the simulated peer.
#[derive(Clone)]
pub struct SimulatedPeer {
    shared: Shared,
}

impl SimulatedBackend {
    /// A backend with one hub in range, advertising the hub service.
    pub fn new() -> (SimulatedBackend, SimulatedPeer) {
        Self::with_device(DiscoveredDevice::new("00:00:00:00:00:01", "Pybricks Hub", Some(-50)))
    }

    pub fn with_device(device: DiscoveredDevice) -> (SimulatedBackend, SimulatedPeer) {
        let shared: Shared = Arc::new(CriticalSectionMutex::new(RefCell::new(SimState::new(device))));
        (
            SimulatedBackend {
                shared: Arc::clone(&shared),
            },
            SimulatedPeer { shared },
        )
    }
}

impl BluetoothBackend for SimulatedBackend {
    type Device = DiscoveredDevice;
    type Service = Uuid;
    type Characteristic = Uuid;

    async fn request_device(
        &mut self,
        options: &RequestDeviceOptions,
    ) -> Result<DiscoveredDevice, BackendError> {
        with_state(&self.shared, |s| {
            if s.unavailable {
                return Err(BackendError::Unavailable);
            }
            if s.cancel_selection || !options.services.contains(&s.service) {
                return Err(BackendError::NoDeviceSelected);
            }
            Ok(s.device.clone())
        })
    }

    async fn watch_disconnect(&mut self, _device: &DiscoveredDevice, sink: EventSink) {
        with_state(&self.shared, |s| s.disconnect_sink = Some(sink));
    }

    async fn connect_gatt(&mut self, _device: &DiscoveredDevice) -> Result<(), BackendError> {
        with_state(&self.shared, |s| {
            if s.fails_at(ConnectStep::ConnectGatt) {
                return Err(BackendError::Platform("connection refused".into()));
            }
            s.gatt_connected = true;
            Ok(())
        })
    }

    async fn primary_service(
        &mut self,
        _device: &DiscoveredDevice,
        uuid: Uuid,
    ) -> Result<Uuid, BackendError> {
        with_state(&self.shared, |s| {
            if s.fails_at(ConnectStep::PrimaryService) || uuid != s.service {
                return Err(BackendError::NotFound);
            }
            Ok(uuid)
        })
    }

    async fn characteristic(&mut self, _service: &Uuid, uuid: Uuid) -> Result<Uuid, BackendError> {
        with_state(&self.shared, |s| {
            if s.fails_at(ConnectStep::Characteristic) || uuid != s.characteristic {
                return Err(BackendError::NotFound);
            }
            Ok(uuid)
        })
    }

    async fn start_notifications(
        &mut self,
        _device: &DiscoveredDevice,
        _characteristic: &Uuid,
        sink: EventSink,
    ) -> Result<(), BackendError> {
        with_state(&self.shared, |s| {
            if s.fails_at(ConnectStep::StartNotifications) {
                return Err(BackendError::Platform("CCCD write rejected".into()));
            }
            s.notifying = true;
            s.notify_sink = Some(sink);
            Ok(())
        })
    }

    async fn write_with_response(
        &mut self,
        _device: &DiscoveredDevice,
        _characteristic: &Uuid,
        data: &[u8],
    ) -> Result<(), BackendError> {
        with_state(&self.shared, |s| {
            if !s.gatt_connected {
                return Err(BackendError::Disconnected);
            }
            if s.fail_writes {
                return Err(BackendError::Platform("write rejected".into()));
            }
            trace!("Simulated write: {:02x?}", data);
            s.writes.push(data.to_vec());
            Ok(())
        })
    }

    async fn disconnect(&mut self, _device: &DiscoveredDevice) -> Result<(), BackendError> {
        // The platform reports its own disconnects through the watcher too.
        let sink = with_state(&self.shared, |s| {
            let was_connected = s.gatt_connected;
            s.close();
            if was_connected {
                s.disconnect_sink.take()
            } else {
                None
            }
        });
        if let Some(sink) = sink {
            sink.try_disconnected();
        }
        Ok(())
    }

    fn release(&mut self, _device: &DiscoveredDevice) {
        with_state(&self.shared, |s| {
            s.close();
            s.disconnect_sink = None;
            s.releases += 1;
        });
    }
}

impl SimulatedPeer {
    pub fn set_unavailable(&self, unavailable: bool) {
        with_state(&self.shared, |s| s.unavailable = unavailable);
    }

    /// Make device selection end without a choice.
    pub fn cancel_selection(&self, cancel: bool) {
        with_state(&self.shared, |s| s.cancel_selection = cancel);
    }

    /// Make the given connect step fail.
    pub fn fail_at(&self, step: Option<ConnectStep>) {
        with_state(&self.shared, |s| s.fail_step = step);
    }

    pub fn fail_writes(&self, fail: bool) {
        with_state(&self.shared, |s| s.fail_writes = fail);
    }

    pub fn is_connected(&self) -> bool {
        with_state(&self.shared, |s| s.gatt_connected)
    }

    /// Whether a link-loss watcher is installed.
    pub fn is_watched(&self) -> bool {
        with_state(&self.shared, |s| s.disconnect_sink.is_some())
    }

    /// How many times the backend released a link the peer dropped.
    pub fn releases(&self) -> usize {
        with_state(&self.shared, |s| s.releases)
    }

    /// Every frame written so far, oldest first.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        with_state(&self.shared, |s| s.writes.clone())
    }

    pub fn take_writes(&self) -> Vec<Vec<u8>> {
        with_state(&self.shared, |s| core::mem::take(&mut s.writes))
    }

    /// Push a characteristic notification. Returns `false` when
    /// notifications are off or the event channel is full.
    pub fn notify(&self, data: &[u8]) -> bool {
        let sink = with_state(&self.shared, |s| {
            if s.gatt_connected && s.notifying {
                s.notify_sink.clone()
            } else {
                None
            }
        });
        sink.is_some_and(|sink| sink.try_notify(data.to_vec()))
    }

    /// Send a standard-output notification.
    pub fn stdout(&self, text: &str) -> bool {
        let mut data = vec![WRITE_STDOUT_EVENT];
        data.extend_from_slice(text.as_bytes());
        self.notify(&data)
    }

    /// Send a status report.
    pub fn status(&self, flags: u8) -> bool {
        self.notify(&[STATUS_REPORT_EVENT, flags])
    }

    /// Drop the link from the hub side.
    pub fn drop_link(&self) -> bool {
        let sink = with_state(&self.shared, |s| {
            if !s.gatt_connected {
                return None;
            }
            s.close();
            s.disconnect_sink.take()
        });
        sink.is_some_and(|sink| sink.try_disconnected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::{EventChannel, LinkEvents, TransportEventKind};

    fn sink() -> (EventSink, LinkEvents) {
        let channel = Arc::new(EventChannel::new());
        (EventSink::new(Arc::clone(&channel), 1), LinkEvents::new(channel))
    }

    #[tokio::test]
    async fn selection_requires_matching_service() {
        let (mut backend, _peer) = SimulatedBackend::new();
        let other = RequestDeviceOptions::for_service(Uuid::from_u128(9), HUB_CHARACTERISTIC_UUID);
        assert_eq!(backend.request_device(&other).await, Err(BackendError::NoDeviceSelected));

        let hub = RequestDeviceOptions::for_service(HUB_SERVICE_UUID, HUB_CHARACTERISTIC_UUID);
        let device = backend.request_device(&hub).await.unwrap();
        assert_eq!(device.name.as_str(), "Pybricks Hub");
    }

    #[tokio::test]
    async fn notifications_only_while_subscribed() {
        let (mut backend, peer) = SimulatedBackend::new();
        let (sink, events) = sink();
        let device = DiscoveredDevice::new("a", "b", None);

        assert!(!peer.status(0x40));

        backend.connect_gatt(&device).await.unwrap();
        backend
            .start_notifications(&device, &HUB_CHARACTERISTIC_UUID, sink)
            .await
            .unwrap();
        assert!(peer.status(0x40));
        assert_eq!(
            events.try_next().map(|e| e.kind),
            Some(TransportEventKind::Notification(vec![STATUS_REPORT_EVENT, 0x40]))
        );

        backend.disconnect(&device).await.unwrap();
        assert!(!peer.stdout("late"));
    }

    #[tokio::test]
    async fn drop_link_reports_once() {
        let (mut backend, peer) = SimulatedBackend::new();
        let (sink, events) = sink();
        let device = DiscoveredDevice::new("a", "b", None);

        backend.watch_disconnect(&device, sink).await;
        backend.connect_gatt(&device).await.unwrap();

        assert!(peer.drop_link());
        assert!(!peer.drop_link());
        assert_eq!(events.try_next().map(|e| e.kind), Some(TransportEventKind::Disconnected));
        assert!(events.try_next().is_none());
    }

    #[tokio::test]
    async fn take_writes_drains() {
        let (mut backend, peer) = SimulatedBackend::new();
        let device = DiscoveredDevice::new("a", "b", None);
        backend.connect_gatt(&device).await.unwrap();
        backend
            .write_with_response(&device, &HUB_CHARACTERISTIC_UUID, &[0x01])
            .await
            .unwrap();

        assert_eq!(peer.take_writes(), vec![vec![0x01]]);
        assert!(peer.writes().is_empty());
    }
}
