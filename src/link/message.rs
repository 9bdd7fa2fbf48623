//! Fixed-capacity message buffer.
//!
//! Every frame that crosses the transport, outbound from producers or
//! inbound from the peer, travels as a [`Message`]. The payload lives in
//! a `heapless::Vec`, so a queue slot has a fixed footprint and no heap
//! traffic happens per message.
//!
//! Oversized sources are truncated to [`MAX_MESSAGE_LEN`], never rejected.

use core::fmt;

use heapless::Vec;

/// Maximum payload size of a single message, in bytes.
pub const MAX_MESSAGE_LEN: usize = 512;

/// An immutable, capacity-bounded payload.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Message {
    bytes: Vec<u8, MAX_MESSAGE_LEN>,
}

impl Message {
    /// Copy `data` into a new message, truncating past [`MAX_MESSAGE_LEN`].
    pub fn new(data: &[u8]) -> Self {
        let len = data.len().min(MAX_MESSAGE_LEN);
        let mut bytes = Vec::new();
        // Cannot fail: `len` is clamped to the capacity.
        let _ = bytes.extend_from_slice(&data[..len]);
        Self { bytes }
    }

    /// Build a text message. Truncation backs off to the previous UTF-8
    /// character boundary so the payload stays valid text.
    pub fn from_text(text: &str) -> Self {
        let mut end = text.len().min(MAX_MESSAGE_LEN);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        Self::new(&text.as_bytes()[..end])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The payload as UTF-8, if it is valid text.
    pub fn as_text(&self) -> Option<&str> {
        core::str::from_utf8(&self.bytes).ok()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::from_text(text)
    }
}

impl From<&[u8]> for Message {
    fn from(data: &[u8]) -> Self {
        Self::new(data)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_text() {
            Some(text) => write!(f, "Message({:?})", text),
            None => write!(f, "Message({} bytes)", self.bytes.len()),
        }
    }
}
