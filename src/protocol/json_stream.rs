//! JSON stream reassembly.
//!
//! The hub's standard output is an unframed text stream: no length
//! prefix, no delimiter. Documents are recovered by growing a candidate
//! from the first undelivered byte and test-parsing it:
//!
//! - objects, arrays, strings and the `true`/`false`/`null` literals are
//!   emitted the moment the candidate first parses (leftmost shortest
//!   valid prefix: no extension of such a document is valid JSON);
//! - a bare number is ambiguous (`1` may be the start of `123`), so it is
//!   held until a character arrives that cannot continue a number.
//!
//! Anything that never completes stays buffered until [`JsonStream::clear`].
//! Re-parsing growing prefixes is quadratic in the worst case; hub
//! messages are small.

use std::time::{Duration, Instant};

use serde::de::IgnoredAny;

type Callback = Box<dyn FnMut(&str) + Send>;
type OnceCallback = Box<dyn FnOnce(&str) + Send>;

/// Incremental splitter for concatenated JSON documents.
#[derive(Default)]
pub struct JsonStream {
    buffer: String,
    pending_since: Option<Instant>,
    callback: Option<Callback>,
    once_callback: Option<OnceCallback>,
}

impl JsonStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the durable per-document callback, replacing any previous one.
    pub fn set_callback(&mut self, callback: impl FnMut(&str) + Send + 'static) {
        self.callback = Some(Box::new(callback));
    }

    /// Register a callback that fires for the next emitted document only.
    pub fn set_once_callback(&mut self, callback: impl FnOnce(&str) + Send + 'static) {
        self.once_callback = Some(Box::new(callback));
    }

    /// Detach the durable callback.
    pub fn remove_callback(&mut self) {
        self.callback = None;
    }

    /// Drop buffered, undelivered text. Callbacks stay registered.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.pending_since = None;
    }

    /// Unconsumed text still waiting for a document boundary.
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// How long the current partial document has been waiting.
    pub fn pending_age(&self) -> Option<Duration> {
        self.pending_since.map(|since| since.elapsed())
    }

    /// Append `chunk` and emit every document it completes, in order.
    ///
    /// Emitted documents are handed to the callbacks and also returned.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);

        let (documents, consumed) = split_documents(&self.buffer);
        self.buffer.drain(..consumed);

        if self.buffer.is_empty() {
            self.pending_since = None;
        } else if consumed > 0 || self.pending_since.is_none() {
            self.pending_since = Some(Instant::now());
        }

        for document in &documents {
            self.run_callbacks(document);
        }
        documents
    }

    fn run_callbacks(&mut self, document: &str) {
        if let Some(callback) = self.callback.as_mut() {
            callback(document);
        }
        if let Some(once) = self.once_callback.take() {
            once(document);
        }
    }
}

/// Scan `text` for complete documents. Returns them (trimmed) together
/// with the number of bytes they consumed.
///
/// A number is only known to be complete once the scan has moved past it,
/// so text after an emitted number is scanned again from its new start.
fn split_documents(text: &str) -> (Vec<String>, usize) {
    let mut documents = Vec::new();
    let mut consumed = 0;
    loop {
        let (mut found, used) = scan_documents(&text[consumed..]);
        if used == 0 {
            break;
        }
        documents.append(&mut found);
        consumed += used;
    }
    (documents, consumed)
}

fn scan_documents(text: &str) -> (Vec<String>, usize) {
    let mut documents = Vec::new();
    let mut start = 0;
    // End of a bare number that parsed but may still be growing.
    let mut pending_number: Option<usize> = None;

    for (idx, ch) in text.char_indices() {
        if let Some(valid_end) = pending_number {
            if continues_number(ch) {
                // `12.` or `1e` fail to parse but may still become valid.
            } else {
                documents.push(text[start..valid_end].trim().to_owned());
                start = valid_end;
                pending_number = None;
            }
        }

        if !may_end_document(ch) {
            continue;
        }

        let end = idx + ch.len_utf8();
        let candidate = &text[start..end];
        if !is_json(candidate) {
            continue;
        }

        if is_number(candidate) {
            pending_number = Some(end);
        } else {
            documents.push(candidate.trim().to_owned());
            start = end;
        }
    }

    (documents, start)
}

fn is_json(candidate: &str) -> bool {
    serde_json::from_str::<IgnoredAny>(candidate).is_ok()
}

fn is_number(candidate: &str) -> bool {
    candidate
        .trim_start()
        .starts_with(|c: char| c == '-' || c.is_ascii_digit())
}

/// Only these characters can be the last byte of a valid document.
fn may_end_document(ch: char) -> bool {
    matches!(ch, '}' | ']' | '"' | 'e' | 'l') || ch.is_ascii_digit()
}

fn continues_number(ch: char) -> bool {
    ch.is_ascii_digit() || matches!(ch, '.' | 'e' | 'E' | '+' | '-')
}
