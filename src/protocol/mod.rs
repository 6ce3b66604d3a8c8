//! Hub protocol layer: wire framing, stdout reassembly, message envelopes.

pub mod codec;
pub mod json_stream;
pub mod message;

pub use codec::{command_line, stdin_frame, Command, HubNotification, StatusFlags, StdoutDecoder};
pub use json_stream::JsonStream;
pub use message::Message;
