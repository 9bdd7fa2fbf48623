//! Uplink transport: one resilient connection to one peer.
//!
//! ```text
//!  ┌───────────┐   ┌─────────────────────────────────────────────┐
//!  │ producers │──►│ Transport (facade, &self, any thread)       │
//!  │ consumers │◄──│   outbound queue ─┐        ┌─ inbound queue │
//!  └───────────┘   └───────────────────┼────────┼────────────────┘
//!                                      ▼        │
//!                  ┌─────────────────────────────────────────────┐
//!                  │ Worker thread ("ws-link")                   │
//!                  │   backoff ─ connect ─ heartbeat ─ watchdog  │
//!                  │            Session<Link>                    │
//!                  └──────────────────────┬──────────────────────┘
//!                                         ▼
//!                          Connector / Link (ws_client, mocks)
//! ```
//!
//! Only the worker touches the session. Callers see the two queues and an
//! atomic status block, nothing else.

pub mod backoff;
pub mod envelope;
pub mod message;
pub mod queue;
pub mod session;
pub mod status;
pub mod transport;

mod worker;

pub use backoff::Backoff;
pub use envelope::{Envelope, EnvelopeError};
pub use message::{MAX_MESSAGE_LEN, Message};
pub use queue::{BoundedQueue, DEFAULT_QUEUE_DEPTH, QueueError};
pub use session::{ConnectError, Connector, Link, LinkErrorKind, SendError, Session, SessionEvent};
pub use status::{LinkStats, TransportState};
pub use transport::Transport;
