//! ESP-IDF platform helpers for `WsLink`.
//!
//! Compiled only for `target_os = "espidf"`. Wraps
//! `esp_idf_svc::ws::client::EspWebSocketClient`, whose events arrive on
//! the client's own task. The callback maps them to [`SessionEvent`]s and
//! pushes them into a channel that `poll_event` drains without blocking.
//! Frames larger than [`FRAME_BUFFER`] keep only their first chunk.

use core::time::Duration;
use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use esp_idf_svc::io::EspIOError;
use esp_idf_svc::ws::FrameType;
use esp_idf_svc::ws::client::{
    EspWebSocketClient, EspWebSocketClientConfig, WebSocketEvent, WebSocketEventType,
};
use futures_lite::future;
use log::{debug, info, warn};

use super::{ChunkGate, FRAME_BUFFER};
use crate::link::message::Message;
use crate::link::session::{ConnectError, LinkErrorKind, SendError, SessionEvent};

/// Events buffered between two worker polls.
const EVENT_DEPTH: usize = 8;

type EventChannel = Channel<CriticalSectionRawMutex, SessionEvent, EVENT_DEPTH>;

pub(super) struct EspWsLink {
    client: Option<EspWebSocketClient<'static>>,
    events: Arc<EventChannel>,
}

fn map_event(
    event: &Result<WebSocketEvent<'_>, EspIOError>,
    gate: &mut ChunkGate,
) -> Option<SessionEvent> {
    let event = match event {
        Ok(ev) => ev,
        Err(e) => {
            warn!("WS(espidf): client error: {:?}", e);
            return Some(SessionEvent::Error(LinkErrorKind::Io));
        }
    };
    match event.event_type {
        WebSocketEventType::Connected => Some(SessionEvent::Connected),
        WebSocketEventType::Disconnected
        | WebSocketEventType::Close(_)
        | WebSocketEventType::Closed => Some(SessionEvent::Disconnected),
        WebSocketEventType::Text(text) => admit(gate, text.len())
            .then(|| SessionEvent::DataReceived(Message::from_text(text))),
        WebSocketEventType::Binary(data) => admit(gate, data.len())
            .then(|| SessionEvent::DataReceived(Message::new(data))),
        WebSocketEventType::Ping | WebSocketEventType::Pong => Some(SessionEvent::KeepAlive),
        _ => None,
    }
}

fn admit(gate: &mut ChunkGate, len: usize) -> bool {
    let keep = gate.admit(len);
    if !keep {
        debug!("WS(espidf): dropping {} byte continuation chunk", len);
    }
    keep
}

pub(super) fn connect(uri: &str, timeout: Duration) -> Result<EspWsLink, ConnectError> {
    if !(uri.starts_with("ws://") || uri.starts_with("wss://")) {
        return Err(ConnectError::InvalidUri);
    }

    let events: Arc<EventChannel> = Arc::new(Channel::new());
    let tx = events.clone();

    let config = EspWebSocketClientConfig {
        disable_auto_reconnect: true,
        network_timeout_ms: timeout,
        buffer_size: FRAME_BUFFER,
        ..Default::default()
    };

    let mut gate = ChunkGate::default();
    let client = EspWebSocketClient::new(uri, &config, timeout, move |event| {
        if let Some(ev) = map_event(event, &mut gate) {
            if tx.try_send(ev).is_err() {
                warn!("WS(espidf): event channel full, dropping event");
            }
        }
    })
    .map_err(|e| {
        warn!("WS(espidf): client init failed: {:?}", e);
        ConnectError::InvalidUri
    })?;

    // The handshake runs on the client task; wait for its verdict.
    let verdict = future::block_on(future::or(
        async {
            loop {
                match events.receive().await {
                    SessionEvent::Connected => return Ok(()),
                    SessionEvent::Disconnected => return Err(ConnectError::HandshakeRejected),
                    SessionEvent::Error(_) => return Err(ConnectError::Unreachable),
                    _ => {}
                }
            }
        },
        async {
            async_io_mini::Timer::after(timeout).await;
            Err(ConnectError::Timeout)
        },
    ));
    verdict?;

    info!("WS(espidf): connected to {}", uri);
    Ok(EspWsLink {
        client: Some(client),
        events,
    })
}

impl EspWsLink {
    /// The client applies its own network timeout; `_timeout` only bounds
    /// the host implementation.
    pub(super) fn send(&mut self, frame: &[u8], _timeout: Duration) -> Result<(), SendError> {
        let client = self.client.as_mut().ok_or(SendError::NotConnected)?;
        if !client.is_connected() {
            return Err(SendError::NotConnected);
        }
        let frame_type = if core::str::from_utf8(frame).is_ok() {
            FrameType::Text(false)
        } else {
            FrameType::Binary(false)
        };
        client.send(frame_type, frame).map_err(|e| {
            warn!("WS(espidf): send failed: {:?}", e);
            SendError::Link
        })
    }

    pub(super) fn poll_event(&mut self) -> Option<SessionEvent> {
        self.events.try_receive().ok()
    }

    pub(super) fn close(&mut self) {
        // Dropping the client stops its task and closes the socket.
        if self.client.take().is_some() {
            info!("WS(espidf): connection closed");
        }
        while self.events.try_receive().is_ok() {}
    }
}
