//! Key-value persistence service.
//!
//! A single worker thread owns the storage backend; everybody else talks to
//! it through a bounded request channel. Each request is a tagged
//! [`KvCommand`] carrying its own reply slot, so concurrent callers can
//! never pick up each other's answers.
//!
//! ```text
//!   caller ──► [request channel, 10] ──► kv-store thread ──► KvBackend
//!     ▲                                        │
//!     └──────────── per-request reply slot ◄───┘
//! ```
//!
//! Enqueue waits at most [`ENQUEUE_TIMEOUT`]; the reply at most
//! [`REPLY_TIMEOUT`]. Keys are limited to [`MAX_KEY_LEN`] bytes.

use core::fmt;
use core::time::Duration;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use futures_lite::future;
use log::{debug, info, warn};

use crate::error::Error;
use crate::task::{self, KV_TASK};

/// Longest accepted key, in bytes (NVS limit).
pub const MAX_KEY_LEN: usize = 15;

/// Depth of the request channel.
pub const KV_QUEUE_DEPTH: usize = 10;

pub const ENQUEUE_TIMEOUT: Duration = Duration::from_millis(100);
pub const REPLY_TIMEOUT: Duration = Duration::from_millis(500);

// ───────────────────────────────────────────────────────────────
// Types
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvError {
    /// The request channel stayed full for the whole enqueue timeout.
    QueueFull,
    /// No reply arrived in time.
    Timeout,
    /// Key absent, or stored with a different type.
    NotFound,
    /// The storage backend reported a failure.
    Backend,
    /// Empty, overlong, or NUL-containing key.
    InvalidKey,
    /// The service has been shut down.
    Closed,
}

impl fmt::Display for KvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "request queue full"),
            Self::Timeout => write!(f, "no reply in time"),
            Self::NotFound => write!(f, "key not found"),
            Self::Backend => write!(f, "backend failure"),
            Self::InvalidKey => write!(f, "invalid key"),
            Self::Closed => write!(f, "store closed"),
        }
    }
}

impl std::error::Error for KvError {}

/// A stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvValue {
    Str(String),
    U32(u32),
    Blob(Vec<u8>),
}

impl KvValue {
    pub fn kind(&self) -> KvKind {
        match self {
            Self::Str(_) => KvKind::Str,
            Self::U32(_) => KvKind::U32,
            Self::Blob(_) => KvKind::Blob,
        }
    }
}

/// Which value type a `Get` expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvKind {
    Str,
    U32,
    Blob,
}

pub type Key = heapless::String<MAX_KEY_LEN>;

/// `Some(value)` for a successful get, `None` for set/reset.
pub type KvReply = Result<Option<KvValue>, KvError>;

pub type ReplySlot = Arc<Signal<CriticalSectionRawMutex, KvReply>>;

/// One request to the store worker.
pub enum KvCommand {
    Set { key: Key, value: KvValue, reply: ReplySlot },
    Get { key: Key, kind: KvKind, reply: ReplySlot },
    /// Erase every key in the namespace.
    Reset { reply: ReplySlot },
    Shutdown,
}

/// Storage port. Runs only on the store worker thread.
pub trait KvBackend: Send + 'static {
    fn set(&mut self, key: &str, value: &KvValue) -> Result<(), KvError>;
    fn get(&mut self, key: &str, kind: KvKind) -> Result<KvValue, KvError>;
    fn erase_all(&mut self) -> Result<(), KvError>;
}

fn make_key(key: &str) -> Result<Key, KvError> {
    if key.is_empty() || key.len() > MAX_KEY_LEN || key.contains('\0') {
        return Err(KvError::InvalidKey);
    }
    Key::try_from(key).map_err(|_| KvError::InvalidKey)
}

// ───────────────────────────────────────────────────────────────
// Worker
// ───────────────────────────────────────────────────────────────

type Requests = Channel<CriticalSectionRawMutex, KvCommand, KV_QUEUE_DEPTH>;

async fn serve(mut backend: impl KvBackend, requests: Arc<Requests>) {
    loop {
        match requests.receive().await {
            KvCommand::Set { key, value, reply } => {
                debug!("KV: set {} ({:?})", key, value.kind());
                reply.signal(backend.set(&key, &value).map(|()| None));
            }
            KvCommand::Get { key, kind, reply } => {
                debug!("KV: get {} ({:?})", key, kind);
                reply.signal(backend.get(&key, kind).map(Some));
            }
            KvCommand::Reset { reply } => {
                warn!("KV: erasing namespace");
                reply.signal(backend.erase_all().map(|()| None));
            }
            KvCommand::Shutdown => break,
        }
    }
    info!("KV: worker stopped");
}

// ───────────────────────────────────────────────────────────────
// Client handle
// ───────────────────────────────────────────────────────────────

/// Handle to the store worker. Cheap to share behind an `Arc`.
pub struct KvStore {
    requests: Arc<Requests>,
    closed: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl KvStore {
    /// Start the worker thread over `backend`.
    pub fn spawn(backend: impl KvBackend) -> Result<Self, Error> {
        let requests: Arc<Requests> = Arc::new(Channel::new());
        let worker_requests = requests.clone();
        let handle = task::spawn_task(&KV_TASK, move || {
            future::block_on(serve(backend, worker_requests));
        })?;
        info!("KV: store started");
        Ok(Self {
            requests,
            closed: AtomicBool::new(false),
            handle: Mutex::new(Some(handle)),
        })
    }

    fn enqueue(&self, cmd: KvCommand) -> Result<(), KvError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(KvError::Closed);
        }
        future::block_on(future::or(
            async {
                self.requests.send(cmd).await;
                Ok(())
            },
            async {
                async_io_mini::Timer::after(ENQUEUE_TIMEOUT).await;
                Err(KvError::QueueFull)
            },
        ))
    }

    fn request(&self, build: impl FnOnce(ReplySlot) -> KvCommand) -> KvReply {
        let reply: ReplySlot = Arc::new(Signal::new());
        self.enqueue(build(reply.clone()))?;
        future::block_on(future::or(reply.wait(), async {
            async_io_mini::Timer::after(REPLY_TIMEOUT).await;
            Err(KvError::Timeout)
        }))
    }

    fn set(&self, key: &str, value: KvValue) -> Result<(), KvError> {
        let key = make_key(key)?;
        self.request(|reply| KvCommand::Set { key, value, reply })
            .map(|_| ())
    }

    fn get(&self, key: &str, kind: KvKind) -> Result<KvValue, KvError> {
        let key = make_key(key)?;
        match self.request(|reply| KvCommand::Get { key, kind, reply })? {
            Some(value) if value.kind() == kind => Ok(value),
            _ => Err(KvError::NotFound),
        }
    }

    pub fn set_str(&self, key: &str, value: &str) -> Result<(), KvError> {
        self.set(key, KvValue::Str(value.into()))
    }

    pub fn set_u32(&self, key: &str, value: u32) -> Result<(), KvError> {
        self.set(key, KvValue::U32(value))
    }

    pub fn set_blob(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
        self.set(key, KvValue::Blob(value.to_vec()))
    }

    pub fn get_str(&self, key: &str) -> Result<String, KvError> {
        match self.get(key, KvKind::Str)? {
            KvValue::Str(s) => Ok(s),
            _ => Err(KvError::NotFound),
        }
    }

    pub fn get_u32(&self, key: &str) -> Result<u32, KvError> {
        match self.get(key, KvKind::U32)? {
            KvValue::U32(v) => Ok(v),
            _ => Err(KvError::NotFound),
        }
    }

    pub fn get_blob(&self, key: &str) -> Result<Vec<u8>, KvError> {
        match self.get(key, KvKind::Blob)? {
            KvValue::Blob(b) => Ok(b),
            _ => Err(KvError::NotFound),
        }
    }

    /// Erase the whole namespace.
    pub fn reset(&self) -> Result<(), KvError> {
        self.request(|reply| KvCommand::Reset { reply }).map(|_| ())
    }

    /// Stop the worker and wait for it. Later requests fail with `Closed`.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let sent = future::block_on(future::or(
            async {
                self.requests.send(KvCommand::Shutdown).await;
                true
            },
            async {
                async_io_mini::Timer::after(REPLY_TIMEOUT).await;
                false
            },
        ));
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match (sent, handle) {
            (true, Some(h)) => {
                if h.join().is_err() {
                    warn!("KV: worker panicked");
                }
            }
            (false, Some(_)) => warn!("KV: worker busy, detaching"),
            _ => {}
        }
    }
}

impl Drop for KvStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}
