//! Host GATT client on top of `btleplug`.
//!
//! After device selection this backend:
//! 1. Connects to the peripheral and discovers its services.
//! 2. Resolves the hub service and its control characteristic.
//! 3. Subscribes to notifications and forwards every value into the
//!    transport's event channel from a background task.
//! 4. Watches adapter events and reports an unsolicited disconnect of the
//!    peripheral the same way.

use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, Service, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{scanner, BluetoothBackend, DiscoveredDevice, EventSink, RequestDeviceOptions};
use crate::config::BLE_SCAN_DURATION_SECS;
use crate::error::BackendError;

/// Picks one of the discovered devices, or `None` to cancel.
pub type DeviceChooser = Box<dyn FnMut(&[DiscoveredDevice]) -> Option<usize> + Send>;

pub struct GattBackend {
    adapter: Adapter,
    chooser: DeviceChooser,
    scan_window: Duration,
    tasks: Vec<JoinHandle<()>>,
}

/// Map a `btleplug` failure onto the backend error vocabulary.
pub fn backend_error(e: btleplug::Error) -> BackendError {
    match e {
        btleplug::Error::PermissionDenied | btleplug::Error::NotSupported(_) => {
            BackendError::Unavailable
        }
        btleplug::Error::DeviceNotFound => BackendError::NotFound,
        btleplug::Error::NotConnected => BackendError::Disconnected,
        other => BackendError::Platform(other.to_string()),
    }
}

impl GattBackend {
    /// Use the first Bluetooth adapter on this host.
    pub async fn new(
        chooser: impl FnMut(&[DiscoveredDevice]) -> Option<usize> + Send + 'static,
    ) -> Result<Self, BackendError> {
        let manager = Manager::new().await.map_err(backend_error)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(backend_error)?
            .into_iter()
            .next()
            .ok_or(BackendError::Unavailable)?;
        Ok(Self::with_adapter(adapter, chooser))
    }

    pub fn with_adapter(
        adapter: Adapter,
        chooser: impl FnMut(&[DiscoveredDevice]) -> Option<usize> + Send + 'static,
    ) -> Self {
        Self {
            adapter,
            chooser: Box::new(chooser),
            scan_window: Duration::from_secs(BLE_SCAN_DURATION_SECS),
            tasks: Vec::new(),
        }
    }

    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for GattBackend {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

impl BluetoothBackend for GattBackend {
    type Device = Peripheral;
    type Service = Service;
    type Characteristic = Characteristic;

    async fn request_device(
        &mut self,
        options: &RequestDeviceOptions,
    ) -> Result<Peripheral, BackendError> {
        let mut candidates = scanner::scan(&self.adapter, &options.services, self.scan_window).await?;
        if candidates.is_empty() {
            return Err(BackendError::NoDeviceSelected);
        }

        let devices: Vec<DiscoveredDevice> = candidates.iter().map(|(_, d)| d.clone()).collect();
        let index = (self.chooser)(&devices)
            .filter(|&i| i < candidates.len())
            .ok_or(BackendError::NoDeviceSelected)?;

        let (peripheral, device) = candidates.swap_remove(index);
        info!("Selected {} ({})", device.name.as_str(), device.address);
        Ok(peripheral)
    }

    async fn watch_disconnect(&mut self, device: &Peripheral, sink: EventSink) {
        // First step of every connect: nothing from an earlier link survives.
        self.abort_tasks();
        let mut events = match self.adapter.events().await {
            Ok(events) => events,
            Err(e) => {
                warn!("Cannot watch for link loss: {}", e);
                return;
            }
        };
        let id = device.id();
        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(gone) = event {
                    if gone == id {
                        debug!("Link {}: peripheral disconnected", sink.link());
                        sink.disconnected().await;
                        break;
                    }
                }
            }
        }));
    }

    async fn connect_gatt(&mut self, device: &Peripheral) -> Result<(), BackendError> {
        if !device.is_connected().await.map_err(backend_error)? {
            device.connect().await.map_err(backend_error)?;
        }
        device.discover_services().await.map_err(backend_error)
    }

    async fn primary_service(
        &mut self,
        device: &Peripheral,
        uuid: Uuid,
    ) -> Result<Service, BackendError> {
        device
            .services()
            .into_iter()
            .find(|service| service.uuid == uuid)
            .ok_or(BackendError::NotFound)
    }

    async fn characteristic(
        &mut self,
        service: &Service,
        uuid: Uuid,
    ) -> Result<Characteristic, BackendError> {
        service
            .characteristics
            .iter()
            .find(|c| c.uuid == uuid)
            .cloned()
            .ok_or(BackendError::NotFound)
    }

    async fn start_notifications(
        &mut self,
        device: &Peripheral,
        characteristic: &Characteristic,
        sink: EventSink,
    ) -> Result<(), BackendError> {
        let mut notifications = device.notifications().await.map_err(backend_error)?;
        device.subscribe(characteristic).await.map_err(backend_error)?;

        let uuid = characteristic.uuid;
        self.tasks.push(tokio::spawn(async move {
            while let Some(n) = notifications.next().await {
                if n.uuid == uuid {
                    sink.notify(n.value).await;
                }
            }
            debug!("Link {}: notification stream ended", sink.link());
        }));
        Ok(())
    }

    async fn write_with_response(
        &mut self,
        device: &Peripheral,
        characteristic: &Characteristic,
        data: &[u8],
    ) -> Result<(), BackendError> {
        device
            .write(characteristic, data, WriteType::WithResponse)
            .await
            .map_err(backend_error)
    }

    async fn disconnect(&mut self, device: &Peripheral) -> Result<(), BackendError> {
        self.abort_tasks();
        device.disconnect().await.map_err(backend_error)
    }

    fn release(&mut self, _device: &Peripheral) {
        self.abort_tasks();
    }
}
