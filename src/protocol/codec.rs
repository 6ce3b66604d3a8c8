//! Hub wire framing: one tag byte followed by a payload.
//!
//! ```text
//! → hub  0x00  stop user program     (no payload)
//! → hub  0x01  start user program    (no payload)
//! → hub  0x06  write stdin           text + '\n'
//! ← hub  0x00  status report         1-byte bitmask, bit 6 = program running
//! ← hub  0x01  write stdout          arbitrary text
//! ```

use core::fmt::Write;

use crate::config::{
    START_USER_PROGRAM_COMMAND, STATUS_REPORT_EVENT, STOP_USER_PROGRAM_COMMAND,
    USER_PROGRAM_RUNNING_STATUS_FLAG, WRITE_STDIN_COMMAND, WRITE_STDOUT_EVENT,
};

/// Commands written to the control characteristic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    StopUserProgram = STOP_USER_PROGRAM_COMMAND,
    StartUserProgram = START_USER_PROGRAM_COMMAND,
    WriteStdin = WRITE_STDIN_COMMAND,
}

impl Command {
    pub fn as_byte(&self) -> u8 {
        *self as u8
    }

    /// Frame for a payload-less command.
    pub fn frame(&self) -> Vec<u8> {
        vec![self.as_byte()]
    }
}

/// Frame a line of standard input: tag, text, trailing newline.
pub fn stdin_frame(text: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(text.len() + 2);
    frame.push(Command::WriteStdin.as_byte());
    frame.extend_from_slice(text.as_bytes());
    frame.push(b'\n');
    frame
}

/// Comma-joined command line, e.g. `drive,50,-25,0`. An empty `command`
/// yields only the arguments, which is what the CSV firmware reads.
pub fn command_line(command: &str, args: &[f64]) -> String {
    let mut line = String::from(command);
    for (i, arg) in args.iter().enumerate() {
        if i > 0 || !command.is_empty() {
            line.push(',');
        }
        let _ = write!(line, "{}", arg);
    }
    line
}

/// Status bitmask carried by a status report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatusFlags(pub u8);

impl StatusFlags {
    pub fn user_program_running(&self) -> bool {
        self.0 & USER_PROGRAM_RUNNING_STATUS_FLAG != 0
    }
}

/// A decoded notification from the hub.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HubNotification<'a> {
    StatusReport(StatusFlags),
    Stdout(&'a [u8]),
}

impl<'a> HubNotification<'a> {
    /// Parse a raw characteristic notification. Returns `None` for empty
    /// data, unknown tags and status reports without a bitmask.
    pub fn from_ble_bytes(data: &'a [u8]) -> Option<Self> {
        let (&tag, payload) = data.split_first()?;
        match tag {
            STATUS_REPORT_EVENT => payload
                .first()
                .map(|&bits| HubNotification::StatusReport(StatusFlags(bits))),
            WRITE_STDOUT_EVENT => Some(HubNotification::Stdout(payload)),
            _ => None,
        }
    }
}

/// Incremental UTF-8 decoder for stdout.
///
/// A notification may end in the middle of a multi-byte character; the
/// incomplete tail is carried over to the next call. Invalid sequences are
/// replaced with U+FFFD.
#[derive(Debug, Default)]
pub struct StdoutDecoder {
    carry: Vec<u8>,
}

impl StdoutDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);
        let mut text = String::new();

        loop {
            match core::str::from_utf8(&self.carry) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.carry.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.carry[..valid]));
                    match e.error_len() {
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            self.carry.drain(..valid);
                            break;
                        }
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.carry.drain(..valid + len);
                        }
                    }
                }
            }
        }
        text
    }

    pub fn reset(&mut self) {
        self.carry.clear();
    }
}
