//! Unified error types for the BootBone uplink.
//!
//! A single `Error` enum that every caller-facing operation funnels into,
//! with the subsystem errors converting into it. All variants are `Copy`
//! so they can be handed back across threads without allocation.

use core::fmt;

use crate::config::ConfigError;
use crate::kv_store::KvError;
use crate::link::queue::QueueError;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible facade operation returns this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// `start` was called on a transport that is already running.
    AlreadyStarted,
    /// A worker released by an earlier `stop` is still finishing a connect.
    Busy,
    /// The transport is stopped; there is no queue to talk to.
    NotRunning,
    /// Non-blocking push found the outbound queue full.
    QueueFull,
    /// Bounded push waited the whole timeout without room appearing.
    TimedOut,
    /// Configuration is invalid.
    Config(&'static str),
    /// The background worker thread could not be created.
    Spawn,
    /// The persistence service failed a request.
    Storage(KvError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyStarted => write!(f, "transport already started"),
            Self::Busy => write!(f, "previous worker still shutting down"),
            Self::NotRunning => write!(f, "transport not running"),
            Self::QueueFull => write!(f, "outbound queue full"),
            Self::TimedOut => write!(f, "timed out waiting for queue space"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn => write!(f, "worker thread spawn failed"),
            Self::Storage(e) => write!(f, "storage: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<QueueError> for Error {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Full => Self::QueueFull,
            QueueError::TimedOut => Self::TimedOut,
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::ValidationFailed(msg) => Self::Config(msg),
            ConfigError::Corrupted => Self::Config("stored config corrupted"),
        }
    }
}

impl From<KvError> for Error {
    fn from(e: KvError) -> Self {
        Self::Storage(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
