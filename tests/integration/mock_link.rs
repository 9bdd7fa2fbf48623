//! Mock network for integration tests.
//!
//! A [`MockNetwork`] is a `Connector` whose behaviour is scripted through a
//! shared state block: how many connects fail, how long each connect
//! blocks, which sends fail, what the peer sends back. Everything the
//! transport does to the network is recorded so tests can assert on the
//! full history.

use bootbone::link::envelope::is_heartbeat;
use bootbone::link::{ConnectError, Connector, Link, Message, SendError, SessionEvent};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

// ── Shared state ──────────────────────────────────────────────

#[derive(Default)]
pub struct NetState {
    /// Remaining connect attempts that fail with `Unreachable`.
    pub fail_connects: u32,
    /// How long each connect blocks before resolving.
    pub connect_delay: Duration,
    /// Instant of every connect attempt, successful or not.
    pub connect_times: Vec<Instant>,
    /// Connects currently blocked inside `connect`.
    pub connects_in_flight: u32,
    pub max_connects_in_flight: u32,
    /// Remaining sends that fail with `SendError::Link`.
    pub fail_sends: u32,
    /// How long each send blocks before completing.
    pub send_delay: Duration,
    /// Every frame the peer received, heartbeats included.
    pub sent: Vec<Vec<u8>>,
    /// Events the current link will report, in order.
    pub inbound: VecDeque<SessionEvent>,
    /// Answer each heartbeat with a keep-alive.
    pub echo_heartbeats: bool,
    pub closes: u32,
    pub live_links: u32,
    pub max_live_links: u32,
}

// ── MockNetwork (Connector) ───────────────────────────────────

#[derive(Clone, Default)]
pub struct MockNetwork {
    state: Arc<Mutex<NetState>>,
}

#[allow(dead_code)]
impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, NetState> {
        self.state.lock().unwrap()
    }

    pub fn fail_next_connects(&self, n: u32) -> &Self {
        self.state().fail_connects = n;
        self
    }

    pub fn connect_delay(&self, d: Duration) -> &Self {
        self.state().connect_delay = d;
        self
    }

    pub fn send_delay(&self, d: Duration) -> &Self {
        self.state().send_delay = d;
        self
    }

    pub fn fail_next_sends(&self, n: u32) -> &Self {
        self.state().fail_sends = n;
        self
    }

    pub fn echo_heartbeats(&self, on: bool) -> &Self {
        self.state().echo_heartbeats = on;
        self
    }

    /// Peer sends a text frame.
    pub fn peer_sends(&self, text: &str) {
        self.state()
            .inbound
            .push_back(SessionEvent::DataReceived(Message::from_text(text)));
    }

    /// Peer closes the connection.
    pub fn peer_closes(&self) {
        self.state().inbound.push_back(SessionEvent::Disconnected);
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.state().connect_times.clone()
    }

    pub fn connects(&self) -> usize {
        self.state().connect_times.len()
    }

    pub fn closes(&self) -> u32 {
        self.state().closes
    }

    /// Application frames the peer received, heartbeats excluded.
    pub fn data_frames(&self) -> Vec<String> {
        self.state()
            .sent
            .iter()
            .map(|f| Message::new(f))
            .filter(|m| !is_heartbeat(m))
            .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
            .collect()
    }

    pub fn heartbeats(&self) -> usize {
        self.state()
            .sent
            .iter()
            .filter(|f| is_heartbeat(&Message::new(f)))
            .count()
    }

    pub fn max_live_links(&self) -> u32 {
        self.state().max_live_links
    }

    pub fn max_connects_in_flight(&self) -> u32 {
        self.state().max_connects_in_flight
    }
}

impl Connector for MockNetwork {
    type Link = MockLink;

    fn connect(&mut self, _uri: &str, _timeout: Duration) -> Result<MockLink, ConnectError> {
        let delay = {
            let mut s = self.state();
            s.connect_times.push(Instant::now());
            s.connects_in_flight += 1;
            s.max_connects_in_flight = s.max_connects_in_flight.max(s.connects_in_flight);
            s.connect_delay
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut s = self.state();
        s.connects_in_flight -= 1;
        if s.fail_connects > 0 {
            s.fail_connects -= 1;
            return Err(ConnectError::Unreachable);
        }
        s.live_links += 1;
        s.max_live_links = s.max_live_links.max(s.live_links);
        Ok(MockLink {
            state: self.state.clone(),
            closed: false,
        })
    }
}

// ── MockLink ──────────────────────────────────────────────────

pub struct MockLink {
    state: Arc<Mutex<NetState>>,
    closed: bool,
}

impl Link for MockLink {
    fn send(&mut self, frame: &[u8], _timeout: Duration) -> Result<(), SendError> {
        let delay = self.state.lock().unwrap().send_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let mut s = self.state.lock().unwrap();
        if s.fail_sends > 0 {
            s.fail_sends -= 1;
            return Err(SendError::Link);
        }
        s.sent.push(frame.to_vec());
        if s.echo_heartbeats && is_heartbeat(&Message::new(frame)) {
            s.inbound.push_back(SessionEvent::KeepAlive);
        }
        Ok(())
    }

    fn poll_event(&mut self) -> Option<SessionEvent> {
        self.state.lock().unwrap().inbound.pop_front()
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut s = self.state.lock().unwrap();
        s.closes += 1;
        s.live_links -= 1;
    }
}

// ── Helpers ───────────────────────────────────────────────────

/// Poll `cond` every 5 ms until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
