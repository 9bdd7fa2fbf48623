//! Shared run state: lifecycle state, connectivity, liveness, counters.
//!
//! Written only by the worker (plus the facade for the Starting/Stopping
//! edges), read from any thread. Everything is a plain atomic so readers
//! never contend with the worker's I/O.

use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

// ---------------------------------------------------------------------------
// Lifecycle state
// ---------------------------------------------------------------------------

/// Externally visible transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransportState {
    Stopped = 0,
    Starting = 1,
    Disconnected = 2,
    Connecting = 3,
    Connected = 4,
    Stopping = 5,
}

impl TransportState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Starting,
            2 => Self::Disconnected,
            3 => Self::Connecting,
            4 => Self::Connected,
            5 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Snapshot of the run's traffic and recovery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub connect_attempts: u32,
    pub connect_failures: u32,
    pub stale_disconnects: u32,
    pub frames_sent: u32,
    pub send_failures: u32,
    pub frames_received: u32,
    pub inbound_dropped: u32,
    pub heartbeats_sent: u32,
}

#[derive(Default)]
pub(crate) struct Counters {
    pub connect_attempts: AtomicU32,
    pub connect_failures: AtomicU32,
    pub stale_disconnects: AtomicU32,
    pub frames_sent: AtomicU32,
    pub send_failures: AtomicU32,
    pub frames_received: AtomicU32,
    pub inbound_dropped: AtomicU32,
    pub heartbeats_sent: AtomicU32,
}

pub(crate) fn bump(counter: &AtomicU32) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Counters {
    fn snapshot(&self) -> LinkStats {
        let get = |c: &AtomicU32| c.load(Ordering::Relaxed);
        LinkStats {
            connect_attempts: get(&self.connect_attempts),
            connect_failures: get(&self.connect_failures),
            stale_disconnects: get(&self.stale_disconnects),
            frames_sent: get(&self.frames_sent),
            send_failures: get(&self.send_failures),
            frames_received: get(&self.frames_received),
            inbound_dropped: get(&self.inbound_dropped),
            heartbeats_sent: get(&self.heartbeats_sent),
        }
    }
}

// ---------------------------------------------------------------------------
// Status block
// ---------------------------------------------------------------------------

const NO_ACTIVITY: u64 = u64::MAX;

pub(crate) struct LinkStatus {
    epoch: Instant,
    state: AtomicU8,
    connected: AtomicBool,
    /// Milliseconds since `epoch` of the last inbound activity, or
    /// `NO_ACTIVITY` before the first connect.
    last_activity_ms: AtomicU64,
    pub counters: Counters,
}

impl LinkStatus {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            state: AtomicU8::new(TransportState::Starting as u8),
            connected: AtomicBool::new(false),
            last_activity_ms: AtomicU64::new(NO_ACTIVITY),
            counters: Counters::default(),
        }
    }

    pub fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: TransportState) {
        self.state.store(state as u8, Ordering::Release);
        self.connected
            .store(state == TransportState::Connected, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn touch(&self, at: Instant) {
        let ms = at.saturating_duration_since(self.epoch).as_millis() as u64;
        self.last_activity_ms.store(ms, Ordering::Release);
    }

    /// Last inbound activity (or connect) of this run, if any.
    pub fn last_activity(&self) -> Option<Instant> {
        match self.last_activity_ms.load(Ordering::Acquire) {
            NO_ACTIVITY => None,
            ms => Some(self.epoch + core::time::Duration::from_millis(ms)),
        }
    }

    pub fn stats(&self) -> LinkStats {
        self.counters.snapshot()
    }
}

// ---------------------------------------------------------------------------
// Stop request
// ---------------------------------------------------------------------------

/// One-shot cancellation: a sticky flag for polling plus a signal that
/// wakes the worker out of any await it is parked in.
pub(crate) struct StopToken {
    requested: AtomicBool,
    exited_flag: AtomicBool,
    wake: Signal<CriticalSectionRawMutex, ()>,
    exited: Signal<CriticalSectionRawMutex, ()>,
}

impl StopToken {
    pub const fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
            exited_flag: AtomicBool::new(false),
            wake: Signal::new(),
            exited: Signal::new(),
        }
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
        self.wake.signal(());
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Resolves once a stop has been requested.
    pub async fn wait(&self) {
        while !self.is_requested() {
            self.wake.wait().await;
        }
    }

    /// Called by the worker as its very last action.
    pub fn mark_exited(&self) {
        self.exited_flag.store(true, Ordering::Release);
        self.exited.signal(());
    }

    pub fn has_exited(&self) -> bool {
        self.exited_flag.load(Ordering::Acquire)
    }

    /// Resolves once the worker has exited.
    pub async fn wait_exited(&self) {
        self.exited.wait().await;
    }
}
