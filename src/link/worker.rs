//! Transport worker: the single control loop behind a running transport.
//!
//! Owns the one live [`Session`] and is the only writer of the run's
//! [`LinkStatus`]. Runs on its own thread, driven by
//! `futures_lite::future::block_on` with `async-io-mini` reactor timers, so
//! every wait is wake-based: outbound data, a timer, or a stop request.
//!
//! ```text
//!               connect ok
//!   ┌──────────────┐ ─────────► ┌─────────────┐
//!   │ Disconnected │            │  Connected  │──┐ pump inbound events
//!   │  (backoff)   │ ◄───────── │             │  │ stale? → close
//!   └──────────────┘  stale /   └─────────────┘  │ heartbeat due? → probe
//!          │         peer gone        ▲          │ else wait: outbound | timer | stop
//!          │ stop                     └──────────┘
//!          ▼
//!      ┌─────────┐
//!      │ Stopped │  close session, signal exit
//!      └─────────┘
//! ```

use core::time::Duration;
use std::sync::Arc;
use std::time::Instant;

use futures_lite::future;
use log::{debug, info, warn};

use super::backoff::Backoff;
use super::envelope::heartbeat_probe;
use super::message::Message;
use super::queue::BoundedQueue;
use super::session::{Connector, Session, SessionEvent};
use super::status::{LinkStatus, StopToken, TransportState, bump};
use crate::config::TransportConfig;

/// Upper bound on link events handled per tick so a chatty peer cannot
/// starve the outbound side or the stop check.
const MAX_EVENTS_PER_TICK: usize = 8;

/// State shared by the facade and one worker run. A fresh block is built
/// for every `start`, so a worker detached after a timed-out stop can only
/// ever touch its own, already abandoned, run.
pub(crate) struct Shared<const OUT: usize, const IN: usize> {
    pub outbound: BoundedQueue<OUT>,
    pub inbound: BoundedQueue<IN>,
    pub status: LinkStatus,
    pub stop: StopToken,
}

impl<const OUT: usize, const IN: usize> Shared<OUT, IN> {
    pub fn new() -> Self {
        Self {
            outbound: BoundedQueue::new(),
            inbound: BoundedQueue::new(),
            status: LinkStatus::new(),
            stop: StopToken::new(),
        }
    }
}

/// What woke the connected-state wait.
enum Wake {
    Outbound(Message),
    Tick,
    Stop,
}

pub(crate) struct Worker<C: Connector, const OUT: usize, const IN: usize> {
    connector: C,
    uri: String,
    cfg: TransportConfig,
    shared: Arc<Shared<OUT, IN>>,
    backoff: Backoff,
    session: Option<Session<C::Link>>,
    last_heartbeat: Instant,
}

impl<C: Connector, const OUT: usize, const IN: usize> Worker<C, OUT, IN> {
    pub fn new(connector: C, uri: String, cfg: TransportConfig, shared: Arc<Shared<OUT, IN>>) -> Self {
        let backoff = Backoff::from_millis(&cfg.backoff_schedule_ms);
        Self {
            connector,
            uri,
            cfg,
            shared,
            backoff,
            session: None,
            last_heartbeat: Instant::now(),
        }
    }

    /// Thread entry point. Returns once a stop has been honoured.
    pub fn run(mut self) {
        info!("LINK: worker started for {}", self.uri);
        future::block_on(self.run_loop());
        self.shutdown();
    }

    async fn run_loop(&mut self) {
        while !self.stop().is_requested() {
            if self.session.is_some() {
                self.connected_tick().await;
            } else {
                self.connect_attempt().await;
            }
        }
    }

    fn stop(&self) -> &StopToken {
        &self.shared.stop
    }

    fn status(&self) -> &LinkStatus {
        &self.shared.status
    }

    // ── Disconnected ─────────────────────────────────────────

    async fn connect_attempt(&mut self) {
        self.status().set_state(TransportState::Connecting);
        bump(&self.status().counters.connect_attempts);
        debug!("LINK: connecting to {}", self.uri);

        let result = Session::open(&mut self.connector, &self.uri, self.cfg.connect_timeout());

        // A stop that landed while the connect was blocking wins: close
        // without ever publishing Connected for this run.
        if self.stop().is_requested() {
            if let Ok(mut session) = result {
                session.close();
            }
            return;
        }

        match result {
            Ok(session) => {
                let now = Instant::now();
                self.backoff.reset();
                self.last_heartbeat = now;
                self.status().touch(now);
                self.session = Some(session);
                self.status().set_state(TransportState::Connected);
                info!("LINK: connected to {}", self.uri);
            }
            Err(e) => {
                self.status().set_state(TransportState::Disconnected);
                bump(&self.status().counters.connect_failures);
                let delay = self.backoff.next_delay();
                warn!(
                    "LINK: connect to {} failed ({}), retrying in {} ms",
                    self.uri,
                    e,
                    delay.as_millis()
                );
                self.sleep_unless_stopped(delay).await;
            }
        }
    }

    async fn sleep_unless_stopped(&self, delay: Duration) {
        future::or(
            async {
                async_io_mini::Timer::after(delay).await;
            },
            self.stop().wait(),
        )
        .await;
    }

    // ── Connected ────────────────────────────────────────────

    async fn connected_tick(&mut self) {
        self.pump_events();
        let Some(session) = self.session.as_ref() else {
            return;
        };

        let now = Instant::now();
        let heartbeat = self.cfg.heartbeat_interval();
        let idle = now.saturating_duration_since(session.last_activity());

        if idle > heartbeat * 2 {
            warn!(
                "LINK: no inbound activity for {} ms, dropping stale link",
                idle.as_millis()
            );
            bump(&self.status().counters.stale_disconnects);
            self.drop_session();
            return;
        }

        let since_heartbeat = now.saturating_duration_since(self.last_heartbeat);
        if since_heartbeat >= heartbeat {
            self.send_heartbeat(now);
            return;
        }

        let wait = self.cfg.poll_interval().min(heartbeat - since_heartbeat);
        match self.wait_for_work(wait).await {
            Wake::Outbound(msg) => self.transmit(&msg),
            Wake::Tick | Wake::Stop => {}
        }
    }

    /// Drain ready link events into the inbound queue.
    fn pump_events(&mut self) {
        for _ in 0..MAX_EVENTS_PER_TICK {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            let Some(event) = session.poll() else {
                return;
            };
            if event.is_activity() {
                self.shared.status.touch(session.last_activity());
            }
            match event {
                SessionEvent::DataReceived(msg) => {
                    bump(&self.shared.status.counters.frames_received);
                    debug!("LINK: rx {} bytes", msg.len());
                    if self.shared.inbound.try_push(msg).is_err() {
                        bump(&self.shared.status.counters.inbound_dropped);
                        warn!("LINK: inbound queue full, dropping frame");
                    }
                }
                SessionEvent::Connected | SessionEvent::KeepAlive => {}
                SessionEvent::Disconnected => {
                    info!("LINK: peer closed the connection");
                    self.drop_session();
                }
                SessionEvent::Error(kind) => {
                    warn!("LINK: link error ({:?}), reconnecting", kind);
                    self.drop_session();
                }
            }
        }
    }

    async fn wait_for_work(&self, wait: Duration) -> Wake {
        future::or(
            async { Wake::Outbound(self.shared.outbound.recv().await) },
            future::or(
                async {
                    async_io_mini::Timer::after(wait).await;
                    Wake::Tick
                },
                async {
                    self.stop().wait().await;
                    Wake::Stop
                },
            ),
        )
        .await
    }

    fn send_heartbeat(&mut self, now: Instant) {
        self.last_heartbeat = now;
        let probe = heartbeat_probe();
        let timeout = self.cfg.send_timeout();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match session.send(probe.as_bytes(), timeout) {
            Ok(()) => {
                bump(&self.shared.status.counters.heartbeats_sent);
                debug!("LINK: heartbeat sent");
            }
            Err(e) => warn!("LINK: heartbeat send failed: {}", e),
        }
    }

    /// Transmit one dequeued message. Failure drops the message but keeps
    /// the session; the stale-link check decides when the link is dead.
    fn transmit(&mut self, msg: &Message) {
        let timeout = self.cfg.send_timeout();
        let Some(session) = self.session.as_mut() else {
            warn!("LINK: session gone, dropping {} byte message", msg.len());
            return;
        };
        match session.send(msg.as_bytes(), timeout) {
            Ok(()) => {
                bump(&self.shared.status.counters.frames_sent);
                debug!("LINK: tx {} bytes", msg.len());
            }
            Err(e) => {
                bump(&self.shared.status.counters.send_failures);
                warn!("LINK: send failed ({}), message dropped", e);
            }
        }
    }

    fn drop_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
        self.status().set_state(TransportState::Disconnected);
    }

    // ── Stop ─────────────────────────────────────────────────

    fn shutdown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
        self.status().set_state(TransportState::Stopped);
        info!("LINK: worker for {} stopped", self.uri);
        self.stop().mark_exited();
    }
}
