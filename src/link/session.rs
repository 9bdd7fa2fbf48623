//! Connection session: one live connection to the peer.
//!
//! The network itself sits behind two port traits so the worker's state
//! machine never touches a socket directly:
//!
//! - [`Connector`] opens a [`Link`] to a URI (handshake included).
//! - [`Link`] is an established connection: send one frame, poll one
//!   event without blocking, close.
//!
//! Concrete implementations:
//! - `WsConnector` (tungstenite on host, esp-idf-svc WebSocket client on
//!   ESP32)
//! - test doubles in `tests/integration/mock_link.rs`
//!
//! A [`Session`] wraps one link for the lifetime of one connection attempt.
//! It is created by [`Session::open`], destroyed on disconnect, error, or
//! stop, and never reused.

use core::fmt;
use core::time::Duration;
use std::time::Instant;

use log::{debug, info};

use super::message::Message;

// ───────────────────────────────────────────────────────────────
// Errors
// ───────────────────────────────────────────────────────────────

/// Failure to establish a session. Always retried with backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectError {
    /// URI does not parse or uses an unsupported scheme.
    InvalidUri,
    /// Host could not be resolved or refused the TCP connection.
    Unreachable,
    /// Transport connected but the peer rejected the upgrade handshake.
    HandshakeRejected,
    /// Connect or handshake did not finish within the timeout.
    Timeout,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUri => write!(f, "invalid URI"),
            Self::Unreachable => write!(f, "peer unreachable"),
            Self::HandshakeRejected => write!(f, "handshake rejected"),
            Self::Timeout => write!(f, "connect timed out"),
        }
    }
}

/// Failure to transmit one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// No live connection; the message is dropped.
    NotConnected,
    /// The link did not accept the frame within the timeout.
    Timeout,
    /// The link reported an I/O or protocol failure.
    Link,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::Timeout => write!(f, "send timed out"),
            Self::Link => write!(f, "link failure"),
        }
    }
}

/// What went wrong on an established link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkErrorKind {
    /// Socket-level failure.
    Io,
    /// Peer violated the framing protocol.
    Protocol,
}

// ───────────────────────────────────────────────────────────────
// Events
// ───────────────────────────────────────────────────────────────

/// Everything a link can report, consumed synchronously by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Link is (re)established.
    Connected,
    /// Peer closed the connection cleanly.
    Disconnected,
    /// One complete data frame arrived.
    DataReceived(Message),
    /// A control frame (ping/pong) arrived; proves liveness, carries no data.
    KeepAlive,
    /// The link failed; the session is no longer usable.
    Error(LinkErrorKind),
}

impl SessionEvent {
    /// Whether this event counts as inbound activity for liveness.
    pub fn is_activity(&self) -> bool {
        matches!(self, Self::Connected | Self::DataReceived(_) | Self::KeepAlive)
    }

    /// Whether this event ends the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Error(_))
    }
}

// ───────────────────────────────────────────────────────────────
// Ports
// ───────────────────────────────────────────────────────────────

/// An established, bidirectional frame channel.
pub trait Link: Send {
    /// Transmit one frame, giving up after `timeout`.
    fn send(&mut self, frame: &[u8], timeout: Duration) -> Result<(), SendError>;

    /// Return the next pending event, or `None` if nothing is ready.
    /// Must not block. Partial frames stay buffered inside the link.
    fn poll_event(&mut self) -> Option<SessionEvent>;

    /// Tear down the connection. Called at most once per link.
    fn close(&mut self);
}

/// Factory for links. Cloned into each transport run.
pub trait Connector: Clone + Send + 'static {
    type Link: Link + 'static;

    /// Open a link to `uri`, including any handshake, within `timeout`.
    fn connect(&mut self, uri: &str, timeout: Duration) -> Result<Self::Link, ConnectError>;
}

// ───────────────────────────────────────────────────────────────
// Session
// ───────────────────────────────────────────────────────────────

/// One connection attempt's worth of state.
pub struct Session<L: Link> {
    uri: String,
    link: Option<L>,
    last_activity: Instant,
}

impl<L: Link> Session<L> {
    /// Connect to `uri`. Blocking; the caller owns the only attempt.
    pub fn open<C>(connector: &mut C, uri: &str, timeout: Duration) -> Result<Self, ConnectError>
    where
        C: Connector<Link = L>,
    {
        let link = connector.connect(uri, timeout)?;
        info!("LINK: session open to {}", uri);
        Ok(Self {
            uri: uri.into(),
            link: Some(link),
            last_activity: Instant::now(),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Instant of the last inbound activity (or of the connect).
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Send one frame. Fails fast with `NotConnected` once closed.
    pub fn send(&mut self, frame: &[u8], timeout: Duration) -> Result<(), SendError> {
        let link = self.link.as_mut().ok_or(SendError::NotConnected)?;
        link.send(frame, timeout)
    }

    /// Next event from the link. Terminal events close the session.
    pub fn poll(&mut self) -> Option<SessionEvent> {
        let event = self.link.as_mut()?.poll_event()?;
        if event.is_activity() {
            self.last_activity = Instant::now();
        }
        if event.is_terminal() {
            debug!("LINK: session to {} ended ({:?})", self.uri, event);
            self.close();
        }
        Some(event)
    }

    /// Close the link. Safe to call any number of times.
    pub fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
            info!("LINK: session to {} closed", self.uri);
        }
    }
}

impl<L: Link> Drop for Session<L> {
    fn drop(&mut self) {
        self.close();
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
