//! Hub protocol engine.
//!
//! Pure state machine, no I/O: the caller feeds it outgoing frames and
//! incoming notifications and performs whatever writes it asks for.
//!
//! ```text
//!   submit(frame) ──ready?──yes──▶ Write(frame), ready = false
//!                      │
//!                      no ──Guaranteed──▶ queue
//!                      └───BestEffort───▶ drop
//!
//!   stdout "ack" ──queue non-empty──▶ Write(next), ready stays false
//!                └──queue empty─────▶ ready = true
//! ```
//!
//! At most one stdin frame is ever in flight. Control commands (start and
//! stop) are not gated; they reset the flow state instead.

use std::collections::VecDeque;

use tracing::trace;

use crate::config::ACK_TOKEN;
use crate::protocol::{HubNotification, JsonStream, StdoutDecoder};

/// What to do with a frame submitted while another is in flight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Drop it. Used for high-rate streams where only the latest value matters.
    BestEffort,
    /// Queue it and send it once the hub acknowledges the previous frame.
    #[default]
    Guaranteed,
}

/// How standard output is surfaced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StdoutMode {
    /// Reassemble JSON documents.
    #[default]
    Json,
    /// Surface decoded text line by line.
    Raw,
}

/// Outcome of [`HubEngine::submit`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Write this frame now.
    Write(Vec<u8>),
    Queued,
    Dropped,
}

/// Something the engine derived from a notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    /// The user-program-running bit changed.
    ProgramRunning(bool),
    /// The previous frame was acknowledged; write this one next.
    Write(Vec<u8>),
    /// A complete JSON document arrived on standard output.
    Document(String),
    /// One line of standard output, without its terminator (`StdoutMode::Raw`).
    Output(String),
}

pub struct HubEngine {
    ready: bool,
    queue: VecDeque<Vec<u8>>,
    running: bool,
    stdout_mode: StdoutMode,
    decoder: StdoutDecoder,
    stream: JsonStream,
    line: String,
}

impl Default for HubEngine {
    fn default() -> Self {
        Self::new(StdoutMode::default())
    }
}

impl HubEngine {
    pub fn new(stdout_mode: StdoutMode) -> Self {
        Self {
            ready: true,
            queue: VecDeque::new(),
            running: false,
            stdout_mode,
            decoder: StdoutDecoder::new(),
            stream: JsonStream::new(),
            line: String::new(),
        }
    }

    /// True when no stdin frame is awaiting its acknowledgement.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_user_program_running(&self) -> bool {
        self.running
    }

    pub fn stdout_mode(&self) -> StdoutMode {
        self.stdout_mode
    }

    pub fn set_stdout_mode(&mut self, mode: StdoutMode) {
        self.stdout_mode = mode;
    }

    pub fn json_stream(&self) -> &JsonStream {
        &self.stream
    }

    pub fn json_stream_mut(&mut self) -> &mut JsonStream {
        &mut self.stream
    }

    /// Gate an outgoing stdin frame.
    pub fn submit(&mut self, frame: Vec<u8>, delivery: DeliveryMode) -> Dispatch {
        if self.ready {
            self.ready = false;
            return Dispatch::Write(frame);
        }
        match delivery {
            DeliveryMode::BestEffort => Dispatch::Dropped,
            DeliveryMode::Guaranteed => {
                self.queue.push_back(frame);
                Dispatch::Queued
            }
        }
    }

    /// The hub acknowledged the in-flight frame. Returns the next frame to
    /// write, if any.
    pub fn acknowledge(&mut self) -> Option<Vec<u8>> {
        match self.queue.pop_front() {
            Some(next) => Some(next),
            None => {
                self.ready = true;
                None
            }
        }
    }

    /// Decode one raw notification.
    pub fn on_notification(&mut self, data: &[u8]) -> Vec<EngineEvent> {
        match HubNotification::from_ble_bytes(data) {
            None => {
                trace!("Ignoring notification {:02x?}", data);
                Vec::new()
            }
            Some(HubNotification::StatusReport(flags)) => {
                let running = flags.user_program_running();
                if running == self.running {
                    return Vec::new();
                }
                self.running = running;
                vec![EngineEvent::ProgramRunning(running)]
            }
            Some(HubNotification::Stdout(payload)) if payload == ACK_TOKEN => {
                self.acknowledge().map(EngineEvent::Write).into_iter().collect()
            }
            Some(HubNotification::Stdout(payload)) => {
                let text = self.decoder.decode(payload);
                match self.stdout_mode {
                    StdoutMode::Json => self
                        .stream
                        .feed(&text)
                        .into_iter()
                        .map(EngineEvent::Document)
                        .collect(),
                    StdoutMode::Raw => self.split_lines(&text),
                }
            }
        }
    }

    fn split_lines(&mut self, text: &str) -> Vec<EngineEvent> {
        self.line.push_str(text);
        let Some(last) = self.line.rfind('\n') else {
            return Vec::new();
        };
        let complete: String = self.line.drain(..=last).collect();
        complete
            .lines()
            .map(|line| EngineEvent::Output(line.to_owned()))
            .collect()
    }

    /// Back to ready with nothing queued.
    pub fn reset_flow(&mut self) {
        self.ready = true;
        self.queue.clear();
    }

    /// A new program run begins: reset flow control and drop any partial
    /// output left by the previous run.
    pub fn begin_program(&mut self) {
        self.reset_flow();
        self.decoder.reset();
        self.stream.clear();
        self.line.clear();
    }

    /// Forget everything about the link. Returns whether a program was
    /// reported running.
    pub fn reset(&mut self) -> bool {
        self.begin_program();
        core::mem::replace(&mut self.running, false)
    }
}
