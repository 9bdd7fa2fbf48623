//! Transport facade: the public contract of the uplink.
//!
//! A [`Transport`] owns one connector, one validated configuration, and at
//! most one running worker. Every method takes `&self` and may be called
//! from any thread; callers only ever touch the queues and the atomic
//! status, never the session.
//!
//! ```text
//!  producers ──send()──► [outbound OUT] ──► worker ──► session ──► peer
//!  consumers ◄─try_receive()─ [inbound IN] ◄── worker ◄── session ◄── peer
//! ```

use core::time::Duration;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Instant;

use futures_lite::future;
use log::{info, warn};

use super::message::Message;
use super::queue::DEFAULT_QUEUE_DEPTH;
use super::session::Connector;
use super::status::{LinkStats, TransportState};
use super::worker::{Shared, Worker};
use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::task::{self, LINK_TASK};

struct Running<const OUT: usize, const IN: usize> {
    uri: String,
    shared: Arc<Shared<OUT, IN>>,
    handle: JoinHandle<()>,
}

struct Slot<C, const OUT: usize, const IN: usize> {
    connector: C,
    running: Option<Running<OUT, IN>>,
    /// A run released by `stop` while its worker was still connecting.
    detached: Option<Running<OUT, IN>>,
}

/// Resilient single-peer message transport.
///
/// `OUT` and `IN` are the outbound and inbound queue capacities.
pub struct Transport<C: Connector, const OUT: usize = DEFAULT_QUEUE_DEPTH, const IN: usize = DEFAULT_QUEUE_DEPTH> {
    config: TransportConfig,
    slot: Mutex<Slot<C, OUT, IN>>,
}

impl<C: Connector, const OUT: usize, const IN: usize> Transport<C, OUT, IN> {
    /// Build a stopped transport. Fails if `config` does not validate.
    pub fn new(connector: C, config: TransportConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            slot: Mutex::new(Slot {
                connector,
                running: None,
                detached: None,
            }),
        })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Slot<C, OUT, IN>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn shared(&self) -> Option<Arc<Shared<OUT, IN>>> {
        self.lock().running.as_ref().map(|r| r.shared.clone())
    }

    // ── Lifecycle ────────────────────────────────────────────

    /// Spawn the worker and begin connecting to `uri`.
    ///
    /// If an earlier `stop` had to release a worker still blocked in a
    /// connect, waits up to the shutdown grace for it to exit and fails
    /// with [`Error::Busy`] if it has not, so at most one connect is ever
    /// in flight against the peer.
    pub fn start(&self, uri: &str) -> Result<()> {
        self.reap_detached()?;
        let mut slot = self.lock();
        if slot.running.is_some() {
            return Err(Error::AlreadyStarted);
        }

        let shared = Arc::new(Shared::new());
        let worker = Worker::new(
            slot.connector.clone(),
            uri.into(),
            self.config.clone(),
            shared.clone(),
        );
        let handle = task::spawn_task(&LINK_TASK, move || worker.run())?;

        slot.running = Some(Running {
            uri: uri.into(),
            shared,
            handle,
        });
        info!("LINK: transport started ({} out / {} in)", OUT, IN);
        Ok(())
    }

    /// Stop the worker, close the session, and clear both queues.
    ///
    /// Waits at most the configured shutdown grace for the worker. A worker
    /// still stuck in a blocking connect after that is detached; it only
    /// holds its own run state and exits as soon as the connect returns.
    /// Calling `stop` on a stopped transport is a no-op.
    pub fn stop(&self) {
        let Some(run) = self.lock().running.take() else {
            return;
        };
        let shared = run.shared.clone();

        shared.status.set_state(TransportState::Stopping);
        shared.stop.request();

        if self.wait_exited(&shared) {
            join(run);
        } else {
            warn!(
                "LINK: worker for {} did not exit within {} ms, force-releasing",
                run.uri,
                self.config.shutdown_grace_ms
            );
            self.lock().detached = Some(run);
        }

        shared.outbound.clear();
        shared.inbound.clear();
        shared.status.set_state(TransportState::Stopped);
        info!("LINK: transport stopped");
    }

    /// Wait up to the shutdown grace for the worker of `shared` to exit.
    fn wait_exited(&self, shared: &Shared<OUT, IN>) -> bool {
        if shared.stop.has_exited() {
            return true;
        }
        future::block_on(future::or(
            async {
                shared.stop.wait_exited().await;
                true
            },
            async {
                async_io_mini::Timer::after(self.config.shutdown_grace()).await;
                false
            },
        ))
    }

    fn reap_detached(&self) -> Result<()> {
        let Some(old) = self.lock().detached.take() else {
            return Ok(());
        };
        if self.wait_exited(&old.shared) {
            join(old);
            return Ok(());
        }
        warn!("LINK: released worker for {} still connecting", old.uri);
        self.lock().detached = Some(old);
        Err(Error::Busy)
    }

    // ── Status ───────────────────────────────────────────────

    pub fn is_running(&self) -> bool {
        self.lock().running.is_some()
    }

    /// Whether a session is currently established.
    pub fn is_connected(&self) -> bool {
        self.shared().is_some_and(|s| s.status.is_connected())
    }

    pub fn state(&self) -> TransportState {
        self.shared()
            .map_or(TransportState::Stopped, |s| s.status.state())
    }

    /// Counters of the current run. All zero while stopped.
    pub fn stats(&self) -> LinkStats {
        self.shared().map(|s| s.status.stats()).unwrap_or_default()
    }

    /// Instant of the last inbound frame (or of the connect) in the current
    /// run. `None` while stopped or before the first connect.
    pub fn last_activity(&self) -> Option<Instant> {
        self.shared()?.status.last_activity()
    }

    /// Target URI of the current run.
    pub fn uri(&self) -> Option<String> {
        self.lock().running.as_ref().map(|r| r.uri.clone())
    }

    pub fn outbound_depth(&self) -> usize {
        self.shared().map_or(0, |s| s.outbound.len())
    }

    pub fn inbound_depth(&self) -> usize {
        self.shared().map_or(0, |s| s.inbound.len())
    }

    // ── Data path ────────────────────────────────────────────

    /// Enqueue `msg` for transmission without waiting.
    pub fn send(&self, msg: Message) -> Result<()> {
        self.send_with_timeout(msg, Duration::ZERO)
    }

    /// Enqueue `msg`, waiting up to `timeout` for queue space.
    pub fn send_with_timeout(&self, msg: Message, timeout: Duration) -> Result<()> {
        let shared = self.shared().ok_or(Error::NotRunning)?;
        shared.outbound.push(msg, timeout)?;
        Ok(())
    }

    /// Oldest received message, waiting up to `timeout`.
    pub fn try_receive(&self, timeout: Duration) -> Option<Message> {
        self.shared()?.inbound.pop(timeout)
    }

    /// Enqueue a text frame (truncated to one message).
    pub fn send_text(&self, text: &str) -> Result<()> {
        self.send(Message::from_text(text))
    }

    /// Next received frame as text; invalid UTF-8 is replaced lossily.
    pub fn recv_text(&self, timeout: Duration) -> Option<String> {
        let msg = self.try_receive(timeout)?;
        Some(String::from_utf8_lossy(msg.as_bytes()).into_owned())
    }
}

fn join<const OUT: usize, const IN: usize>(run: Running<OUT, IN>) {
    if run.handle.join().is_err() {
        warn!("LINK: worker for {} panicked", run.uri);
    }
}

impl<C: Connector, const OUT: usize, const IN: usize> Drop for Transport<C, OUT, IN> {
    fn drop(&mut self) {
        self.stop();
    }
}
