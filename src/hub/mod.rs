//! Hub session: one physical hub, its link and its protocol state.
//!
//! A [`Hub`] owns its [`Transport`], its [`HubEngine`] (flow control,
//! status tracking, stdout reassembly) and its message log, so several
//! hubs can be driven side by side without sharing anything.
//!
//! State changes are published on a per-hub event bus
//! ([`HubEventBus`]); a dashboard or console is just one subscriber.
//!
//! Link events are not consumed by the hub itself. The caller owns the
//! receiver returned by [`Hub::link_events`] and hands every event back
//! through [`Hub::handle_link_event`], which lets it race link traffic
//! against its own inputs:
//!
//! ```text
//!   loop {
//!       select(link.next(), input.next()) {
//!           link event  => hub.handle_link_event(ev).await?,
//!           input       => hub.send_message(..).await?,
//!       }
//!   }
//! ```

pub mod engine;
pub mod log;

use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::pubsub::{PubSubChannel, Subscriber};
use embassy_sync::signal::Signal;
use heapless::String;
use serde_json::{json, Value};
use tracing::{debug, info, trace, warn};

use crate::ble::{
    truncated_name, BluetoothBackend, LinkEvents, LinkState, Transport, TransportEvent,
    TransportEventKind,
};
use crate::config::{
    DEVICE_NAME_LEN, EVENT_BUS_CAPACITY, EVENT_BUS_PUBLISHERS, EVENT_BUS_SUBSCRIBERS,
    HUB_CHARACTERISTIC_UUID, HUB_SERVICE_UUID,
};
use crate::error::{Error, Result};
use crate::protocol::{command_line, stdin_frame, Command, JsonStream, Message};

pub use engine::{DeliveryMode, Dispatch, EngineEvent, HubEngine, StdoutMode};
pub use log::{Direction, LogEntry, MessageLog};

/// Observable hub state changes.
#[derive(Clone, Debug, PartialEq)]
pub enum HubEvent {
    Connected,
    Disconnected,
    ProgramRunningChanged(bool),
    MessageReceived(Message),
    /// Standard output that is not a message envelope.
    Output(std::string::String),
}

pub type HubEventBus = PubSubChannel<
    CriticalSectionRawMutex,
    HubEvent,
    EVENT_BUS_CAPACITY,
    EVENT_BUS_SUBSCRIBERS,
    EVENT_BUS_PUBLISHERS,
>;

pub type HubSubscriber<'a> = Subscriber<
    'a,
    CriticalSectionRawMutex,
    HubEvent,
    EVENT_BUS_CAPACITY,
    EVENT_BUS_SUBSCRIBERS,
    EVENT_BUS_PUBLISHERS,
>;

/// Subscribe to a hub's event bus. Dropping the subscriber unsubscribes.
pub fn subscribe(bus: &HubEventBus) -> Result<HubSubscriber<'_>> {
    bus.subscriber().map_err(|_| Error::SubscriberLimit)
}

/// Per-call send options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SendOptions {
    pub delivery: DeliveryMode,
    /// Record the command in the message log.
    pub log: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self::guaranteed()
    }
}

impl SendOptions {
    /// Queued behind the in-flight frame, logged.
    pub const fn guaranteed() -> Self {
        Self {
            delivery: DeliveryMode::Guaranteed,
            log: true,
        }
    }

    /// Dropped while another frame is in flight, not logged. For joystick
    /// streaming.
    pub const fn best_effort() -> Self {
        Self {
            delivery: DeliveryMode::BestEffort,
            log: false,
        }
    }

    pub const fn with_log(mut self, log: bool) -> Self {
        self.log = log;
        self
    }
}

/// What happened to a submitted command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Queued,
    Dropped,
}

/// Resolves with the first envelope of a given type received after it was
/// created.
#[derive(Clone)]
pub struct MessageWaiter {
    kind: std::string::String,
    signal: Arc<Signal<CriticalSectionRawMutex, Message>>,
}

impl MessageWaiter {
    fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_owned(),
            signal: Arc::new(Signal::new()),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub async fn wait(&self) -> Message {
        self.signal.wait().await
    }

    pub fn try_take(&self) -> Option<Message> {
        self.signal.try_take()
    }
}

pub struct Hub<B: BluetoothBackend> {
    name: String<DEVICE_NAME_LEN>,
    transport: Transport<B>,
    engine: HubEngine,
    bus: Arc<HubEventBus>,
    log: MessageLog,
    waiters: Vec<MessageWaiter>,
}

impl<B: BluetoothBackend> Hub<B> {
    pub fn new(name: &str, backend: B) -> Self {
        Self {
            name: truncated_name(name),
            transport: Transport::new(backend),
            engine: HubEngine::default(),
            bus: Arc::new(HubEventBus::new()),
            log: MessageLog::new(),
            waiters: Vec::new(),
        }
    }

    pub fn with_stdout_mode(mut self, mode: StdoutMode) -> Self {
        self.engine.set_stdout_mode(mode);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ── Observable state ────────────────────────────────────────────────

    pub fn is_connecting(&self) -> bool {
        self.transport.is_connecting()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn is_user_program_running(&self) -> bool {
        self.engine.is_user_program_running()
    }

    /// True when no stdin frame is awaiting acknowledgement.
    pub fn is_ready(&self) -> bool {
        self.engine.is_ready()
    }

    pub fn queued_len(&self) -> usize {
        self.engine.queued_len()
    }

    pub fn link_events(&self) -> LinkEvents {
        self.transport.link_events()
    }

    pub fn event_bus(&self) -> Arc<HubEventBus> {
        Arc::clone(&self.bus)
    }

    pub fn messages(&self) -> &MessageLog {
        &self.log
    }

    /// The stdout reassembler, for registering document callbacks.
    pub fn json_stream_mut(&mut self) -> &mut JsonStream {
        self.engine.json_stream_mut()
    }

    pub fn json_stream(&self) -> &JsonStream {
        self.engine.json_stream()
    }

    // ── Link lifecycle ──────────────────────────────────────────────────

    pub async fn connect(&mut self) -> Result<()> {
        info!("{}: connecting", self.name);
        self.transport
            .connect(HUB_SERVICE_UUID, HUB_CHARACTERISTIC_UUID)
            .await?;
        self.engine.reset();
        info!("{}: connected", self.name);
        self.publish(HubEvent::Connected);
        Ok(())
    }

    /// Close the link. No-op when not connected.
    pub async fn disconnect(&mut self) {
        let was_active = self.transport.state() != LinkState::Idle;
        self.transport.disconnect().await;
        if was_active {
            self.teardown();
        }
    }

    fn teardown(&mut self) {
        if self.engine.reset() {
            self.publish(HubEvent::ProgramRunningChanged(false));
        }
        info!("{}: disconnected", self.name);
        self.publish(HubEvent::Disconnected);
    }

    /// Process one event from [`Hub::link_events`]. Events from an earlier
    /// link are ignored. Fails only if writing the next queued frame fails.
    pub async fn handle_link_event(&mut self, event: TransportEvent) -> Result<()> {
        if !self.transport.is_current(&event) {
            trace!("{}: ignoring event from link {}", self.name, event.link);
            return Ok(());
        }

        let data = match event.kind {
            TransportEventKind::Disconnected => {
                info!("{}: link lost", self.name);
                self.transport.link_lost();
                self.teardown();
                return Ok(());
            }
            TransportEventKind::Notification(data) => data,
        };

        let mut result = Ok(());
        for event in self.engine.on_notification(&data) {
            match event {
                EngineEvent::ProgramRunning(running) => {
                    info!("{}: user program running = {}", self.name, running);
                    self.publish(HubEvent::ProgramRunningChanged(running));
                }
                EngineEvent::Write(frame) => {
                    if let Err(e) = self.transport.write(&frame).await {
                        warn!("{}: queued write failed: {}", self.name, e);
                        result = Err(e);
                    }
                }
                EngineEvent::Document(text) => self.deliver_document(&text),
                EngineEvent::Output(line) => self.publish(HubEvent::Output(line)),
            }
        }
        result
    }

    fn deliver_document(&mut self, text: &str) {
        let message = match Message::parse(text) {
            Ok(message) => message,
            Err(e) => {
                debug!("{}: not an envelope ({}): {}", self.name, e, text);
                self.publish(HubEvent::Output(text.to_owned()));
                return;
            }
        };

        info!("{}: hub -> control panel {}", self.name, message);
        self.log.record(Direction::Incoming, message.clone());

        self.waiters.retain(|waiter| {
            if waiter.kind == message.kind {
                waiter.signal.signal(message.clone());
                false
            } else {
                // Nobody is left to wait on an abandoned waiter.
                Arc::strong_count(&waiter.signal) > 1
            }
        });

        self.publish(HubEvent::MessageReceived(message));
    }

    // ── Sending ─────────────────────────────────────────────────────────

    /// Send a comma-joined command line, e.g. `drive,50,-25,0`.
    pub async fn send_message(
        &mut self,
        command: &str,
        args: &[f64],
        options: SendOptions,
    ) -> Result<SendOutcome> {
        if options.log {
            self.log_outgoing(Message::new(command, json!({ "args": args })));
        }
        let line = command_line(command, args);
        self.dispatch(stdin_frame(&line), options.delivery).await
    }

    /// Send a line of program source.
    pub async fn send_code(&mut self, source: &str, options: SendOptions) -> Result<SendOutcome> {
        if options.log {
            self.log_outgoing(Message::new("sendCode", Value::String(source.to_owned())));
        }
        self.dispatch(stdin_frame(source), options.delivery).await
    }

    /// Send a JSON envelope as one stdin line.
    pub async fn send_envelope(
        &mut self,
        message: &Message,
        options: SendOptions,
    ) -> Result<SendOutcome> {
        let text = message.serialize()?;
        if options.log {
            self.log_outgoing(message.clone());
        }
        self.dispatch(stdin_frame(&text), options.delivery).await
    }

    fn log_outgoing(&mut self, message: Message) {
        info!("{}: hub <- control panel {}", self.name, message);
        self.log.record(Direction::Outgoing, message);
    }

    async fn dispatch(&mut self, frame: Vec<u8>, delivery: DeliveryMode) -> Result<SendOutcome> {
        if !self.transport.is_connected() {
            return Err(Error::NotConnected);
        }
        match self.engine.submit(frame, delivery) {
            Dispatch::Write(frame) => {
                self.transport.write(&frame).await?;
                Ok(SendOutcome::Sent)
            }
            Dispatch::Queued => {
                debug!("{}: queued ({} waiting)", self.name, self.engine.queued_len());
                Ok(SendOutcome::Queued)
            }
            Dispatch::Dropped => {
                trace!("{}: busy, command dropped", self.name);
                Ok(SendOutcome::Dropped)
            }
        }
    }

    /// Start the user program. Discards partial output of the previous run.
    pub async fn start_user_program(&mut self) -> Result<()> {
        self.engine.begin_program();
        self.transport
            .write(&Command::StartUserProgram.frame())
            .await
    }

    pub async fn stop_user_program(&mut self) -> Result<()> {
        self.engine.reset_flow();
        self.transport
            .write(&Command::StopUserProgram.frame())
            .await
    }

    /// Mark the pipeline ready and drop the queue, e.g. after an ack was
    /// lost.
    pub fn reset_flow_control(&mut self) {
        self.engine.reset_flow();
    }

    /// A waiter for the next received envelope of type `kind`.
    pub fn wait_for_message(&mut self, kind: &str) -> MessageWaiter {
        let waiter = MessageWaiter::new(kind);
        self.waiters.push(waiter.clone());
        waiter
    }

    fn publish(&self, event: HubEvent) {
        self.bus.immediate_publisher().publish_immediate(event);
    }
}
