//! Single-connection BLE transport.
//!
//! ```text
//!   Idle ──connect()──▶ Connecting ──all steps ok──▶ Connected
//!    ▲                      │                           │
//!    └──── any step fails ──┘        disconnect() / link lost
//!    └──────────────────────────────────────────────────┘
//! ```
//!
//! Every connect attempt gets a fresh link id. Events carry the id of the
//! link that produced them, so a late notification or link drop from an
//! earlier connection is recognised and ignored.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    BluetoothBackend, EventChannel, EventSink, LinkEvents, RequestDeviceOptions, TransportEvent,
};
use crate::error::{ConnectStep, Error, Result};

/// Connection lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LinkState {
    #[default]
    Idle,
    Connecting,
    Connected,
}

pub struct Transport<B: BluetoothBackend> {
    backend: B,
    state: LinkState,
    device: Option<B::Device>,
    characteristic: Option<B::Characteristic>,
    events: Arc<EventChannel>,
    link: u32,
}

impl<B: BluetoothBackend> Transport<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: LinkState::Idle,
            device: None,
            characteristic: None,
            events: Arc::new(EventChannel::new()),
            link: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connecting(&self) -> bool {
        self.state == LinkState::Connecting
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// Id of the current (or most recent) link.
    pub fn link_id(&self) -> u32 {
        self.link
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Receiver for notifications and link drops of every link this
    /// transport opens.
    pub fn link_events(&self) -> LinkEvents {
        LinkEvents::new(Arc::clone(&self.events))
    }

    /// Whether `event` belongs to the live link.
    pub fn is_current(&self, event: &TransportEvent) -> bool {
        self.state != LinkState::Idle && event.link == self.link
    }

    /// Run the connect sequence: select device, watch for link loss, open
    /// GATT, resolve service and characteristic, enable notifications.
    ///
    /// On any failure the partial connection is torn down and the state is
    /// back to `Idle`.
    pub async fn connect(&mut self, service: Uuid, characteristic: Uuid) -> Result<()> {
        if self.state != LinkState::Idle {
            return Err(Error::AlreadyConnected);
        }

        self.link = self.link.wrapping_add(1);
        self.state = LinkState::Connecting;
        let sink = EventSink::new(Arc::clone(&self.events), self.link);
        debug!("Link {}: connecting", self.link);

        match self.establish(service, characteristic, sink).await {
            Ok(ch) => {
                self.characteristic = Some(ch);
                self.state = LinkState::Connected;
                info!("Link {}: connected", self.link);
                Ok(())
            }
            Err(e) => {
                warn!("Link {}: {}", self.link, e);
                self.rollback().await;
                Err(e)
            }
        }
    }

    async fn establish(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        sink: EventSink,
    ) -> Result<B::Characteristic> {
        let options = RequestDeviceOptions::for_service(service, characteristic);
        let device = self
            .backend
            .request_device(&options)
            .await
            .map_err(|e| Error::connect(ConnectStep::RequestDevice, e))?;

        self.backend.watch_disconnect(&device, sink.clone()).await;
        self.device = Some(device.clone());

        self.backend
            .connect_gatt(&device)
            .await
            .map_err(|e| Error::connect(ConnectStep::ConnectGatt, e))?;
        let primary = self
            .backend
            .primary_service(&device, service)
            .await
            .map_err(|e| Error::connect(ConnectStep::PrimaryService, e))?;
        let ch = self
            .backend
            .characteristic(&primary, characteristic)
            .await
            .map_err(|e| Error::connect(ConnectStep::Characteristic, e))?;
        self.backend
            .start_notifications(&device, &ch, sink)
            .await
            .map_err(|e| Error::connect(ConnectStep::StartNotifications, e))?;

        Ok(ch)
    }

    async fn rollback(&mut self) {
        if let Some(device) = self.device.take() {
            if let Err(e) = self.backend.disconnect(&device).await {
                debug!("Link {}: rollback disconnect failed: {}", self.link, e);
            }
        }
        self.characteristic = None;
        self.state = LinkState::Idle;
    }

    /// Close the link. No-op when idle. Backend errors are logged, the
    /// local state is reset regardless.
    pub async fn disconnect(&mut self) {
        if self.state == LinkState::Idle {
            return;
        }
        if let Some(device) = self.device.take() {
            if let Err(e) = self.backend.disconnect(&device).await {
                warn!("Link {}: disconnect failed: {}", self.link, e);
            }
        }
        self.characteristic = None;
        self.state = LinkState::Idle;
        info!("Link {}: disconnected", self.link);
    }

    /// The peer dropped the link. Forget it and let the backend release
    /// its per-link resources; no disconnect is sent.
    pub fn link_lost(&mut self) {
        if let Some(device) = self.device.take() {
            self.backend.release(&device);
        }
        self.characteristic = None;
        self.state = LinkState::Idle;
    }

    /// Write with response to the control characteristic.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        let (Some(device), Some(ch)) = (self.device.as_ref(), self.characteristic.as_ref()) else {
            return Err(Error::NotConnected);
        };
        self.backend
            .write_with_response(device, ch, data)
            .await
            .map_err(Error::from)
    }

    /// Write `text` as UTF-8.
    pub async fn write_text(&mut self, text: &str) -> Result<()> {
        self.write(text.as_bytes()).await
    }
}
