//! WebSocket client adapter.
//!
//! Implements the link ports ([`Connector`] / [`Link`]) over a WebSocket
//! client connection to the configured peer.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_idf_svc::ws::client::EspWebSocketClient`.
//!   The client delivers events from its own task through a callback; they
//!   are funnelled into a small channel and drained by `poll_event`.
//! - **all other targets**: blocking `tungstenite` over `std::net::TcpStream`
//!   (plaintext `ws://` only). The socket is non-blocking after the
//!   handshake so `poll_event` never stalls the worker; sends switch it to
//!   blocking with a write timeout for the duration of one frame.
//!
//! Auto-reconnect of the underlying client is always disabled: reconnect
//! policy belongs to the transport worker.

use core::time::Duration;

use crate::link::session::{ConnectError, Connector, Link, SendError, SessionEvent};

#[cfg(not(target_os = "espidf"))]
use crate::link::message::Message;
#[cfg(not(target_os = "espidf"))]
use crate::link::session::LinkErrorKind;
#[cfg(not(target_os = "espidf"))]
use log::{debug, info, warn};
#[cfg(not(target_os = "espidf"))]
use std::net::{TcpStream, ToSocketAddrs};
#[cfg(not(target_os = "espidf"))]
use tungstenite::{Error as WsError, Message as WsMessage, WebSocket};

// ───────────────────────────────────────────────────────────────
// ESP-IDF platform helpers
// ───────────────────────────────────────────────────────────────
#[cfg(target_os = "espidf")]
mod esp_impl;

/// Default port for `ws://` URIs without one.
pub const DEFAULT_WS_PORT: u16 = 80;

/// Receive buffer of the ESP-IDF client. A frame longer than this is
/// handed to the event callback as several chunks of at most this size.
pub const FRAME_BUFFER: usize = 1024;

/// Keeps the first chunk of a split inbound frame and drops the rest.
///
/// A full-size chunk means more of the same frame may follow; every chunk
/// up to and including the next short one is a continuation. A frame of
/// exactly `FRAME_BUFFER` bytes cannot be told apart from a split one, so
/// the frame after it is dropped.
#[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
#[derive(Debug, Default)]
struct ChunkGate {
    in_frame: bool,
}

#[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
impl ChunkGate {
    /// Whether a data chunk of `len` bytes should be delivered.
    fn admit(&mut self, len: usize) -> bool {
        let head = !self.in_frame;
        self.in_frame = len >= FRAME_BUFFER;
        head
    }
}

// ───────────────────────────────────────────────────────────────
// Connector
// ───────────────────────────────────────────────────────────────

/// Opens WebSocket links. Stateless; clone freely.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    type Link = WsLink;

    #[cfg(target_os = "espidf")]
    fn connect(&mut self, uri: &str, timeout: Duration) -> Result<WsLink, ConnectError> {
        esp_impl::connect(uri, timeout).map(|inner| WsLink { inner })
    }

    #[cfg(not(target_os = "espidf"))]
    fn connect(&mut self, uri: &str, timeout: Duration) -> Result<WsLink, ConnectError> {
        sim_connect(uri, timeout).map(|socket| WsLink { socket })
    }
}

// ───────────────────────────────────────────────────────────────
// Link
// ───────────────────────────────────────────────────────────────

/// One established WebSocket connection.
pub struct WsLink {
    #[cfg(target_os = "espidf")]
    inner: esp_impl::EspWsLink,

    #[cfg(not(target_os = "espidf"))]
    socket: WebSocket<TcpStream>,
}

#[cfg(target_os = "espidf")]
impl Link for WsLink {
    fn send(&mut self, frame: &[u8], timeout: Duration) -> Result<(), SendError> {
        self.inner.send(frame, timeout)
    }

    fn poll_event(&mut self) -> Option<SessionEvent> {
        self.inner.poll_event()
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

#[cfg(not(target_os = "espidf"))]
impl Link for WsLink {
    fn send(&mut self, frame: &[u8], timeout: Duration) -> Result<(), SendError> {
        let msg = match core::str::from_utf8(frame) {
            Ok(text) => WsMessage::Text(text.to_owned()),
            Err(_) => WsMessage::Binary(frame.to_vec()),
        };

        let stream = self.socket.get_ref();
        let _ = stream.set_nonblocking(false);
        let _ = stream.set_write_timeout(Some(timeout.max(Duration::from_millis(1))));
        let result = self.socket.send(msg);
        let _ = self.socket.get_ref().set_nonblocking(true);

        result.map_err(|e| match e {
            WsError::Io(ref io) if is_transient(io) => SendError::Timeout,
            WsError::ConnectionClosed | WsError::AlreadyClosed => SendError::NotConnected,
            other => {
                debug!("WS(sim): send error: {}", other);
                SendError::Link
            }
        })
    }

    fn poll_event(&mut self) -> Option<SessionEvent> {
        match self.socket.read() {
            Ok(WsMessage::Text(text)) => Some(SessionEvent::DataReceived(Message::from_text(&text))),
            Ok(WsMessage::Binary(data)) => Some(SessionEvent::DataReceived(Message::new(&data))),
            Ok(WsMessage::Ping(_) | WsMessage::Pong(_)) => Some(SessionEvent::KeepAlive),
            Ok(WsMessage::Close(_)) => Some(SessionEvent::Disconnected),
            Ok(WsMessage::Frame(_)) => None,
            Err(WsError::Io(ref io)) if is_transient(io) => None,
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                Some(SessionEvent::Disconnected)
            }
            Err(WsError::Io(io)) => {
                warn!("WS(sim): read error: {}", io);
                Some(SessionEvent::Error(LinkErrorKind::Io))
            }
            Err(e) => {
                warn!("WS(sim): protocol error: {}", e);
                Some(SessionEvent::Error(LinkErrorKind::Protocol))
            }
        }
    }

    fn close(&mut self) {
        let _ = self.socket.close(None);
        let _ = self.socket.flush();
        info!("WS(sim): connection closed");
    }
}

// ───────────────────────────────────────────────────────────────
// Simulation helpers
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
    )
}

/// Split a `ws://host[:port]/path` URI into a dialable host and port.
#[cfg(not(target_os = "espidf"))]
fn host_port(uri: &tungstenite::http::Uri) -> Result<(String, u16), ConnectError> {
    if uri.scheme_str() != Some("ws") {
        return Err(ConnectError::InvalidUri);
    }
    let host = uri.host().ok_or(ConnectError::InvalidUri)?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(ConnectError::InvalidUri);
    }
    Ok((host.to_owned(), uri.port_u16().unwrap_or(DEFAULT_WS_PORT)))
}

#[cfg(not(target_os = "espidf"))]
fn sim_connect(uri: &str, timeout: Duration) -> Result<WebSocket<TcpStream>, ConnectError> {
    use tungstenite::client::IntoClientRequest;
    use tungstenite::handshake::HandshakeError;

    let request = uri
        .into_client_request()
        .map_err(|_| ConnectError::InvalidUri)?;
    let (host, port) = host_port(request.uri())?;

    let addr = (host.as_str(), port)
        .to_socket_addrs()
        .map_err(|_| ConnectError::Unreachable)?
        .next()
        .ok_or(ConnectError::Unreachable)?;

    let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
        if e.kind() == std::io::ErrorKind::TimedOut {
            ConnectError::Timeout
        } else {
            ConnectError::Unreachable
        }
    })?;
    let _ = stream.set_nodelay(true);
    stream
        .set_read_timeout(Some(timeout))
        .and_then(|()| stream.set_write_timeout(Some(timeout)))
        .map_err(|_| ConnectError::Unreachable)?;

    let (socket, _response) = tungstenite::client::client(request, stream).map_err(|e| match e {
        HandshakeError::Interrupted(_) => ConnectError::Timeout,
        HandshakeError::Failure(WsError::Io(ref io)) if is_transient(io) => ConnectError::Timeout,
        HandshakeError::Failure(other) => {
            debug!("WS(sim): handshake failed: {}", other);
            ConnectError::HandshakeRejected
        }
    })?;

    socket
        .get_ref()
        .set_nonblocking(true)
        .map_err(|_| ConnectError::Unreachable)?;

    info!("WS(sim): connected to {}:{}", host, port);
    Ok(socket)
}
