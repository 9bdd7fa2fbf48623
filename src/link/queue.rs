//! Bounded message queue.
//!
//! A `heapless::Deque` behind an `embassy-sync` blocking mutex, with a
//! [`MultiWakerRegistration`] per direction so any number of producers and
//! consumers can park at once. A push wakes the parked consumers and a pop
//! wakes the parked producers; nobody else is woken.
//!
//! - `push(msg, Duration::ZERO)` fails immediately when full
//!   ([`QueueError::Full`]) and never blocks.
//! - `push(msg, t)` waits up to `t` for room ([`QueueError::TimedOut`]).
//! - `pop(t)` waits up to `t` for a message.
//!
//! Blocking variants drive the async forms with `futures_lite::block_on`
//! and race them against an `async_io_mini` reactor timer, so waiting
//! callers sleep on a waker instead of spinning. The async variants are
//! used directly by the transport worker inside its own event loop.
//!
//! The queue never logs and never retries; whole messages only.

use core::cell::RefCell;
use core::fmt;
use core::task::{Context, Poll};
use core::time::Duration;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::waitqueue::MultiWakerRegistration;
use futures_lite::future;
use heapless::Deque;

use super::message::Message;

/// Default depth for both the inbound and the outbound queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 16;

/// Parked wakers kept per direction. Past this, a new waiter wakes the
/// others once so they re-register.
const MAX_WAITERS: usize = 8;

/// Why a push did not go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// Queue full and the caller asked not to wait.
    Full,
    /// Queue stayed full for the whole timeout.
    TimedOut,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "queue full"),
            Self::TimedOut => write!(f, "timed out waiting for queue space"),
        }
    }
}

struct Inner<const N: usize> {
    items: Deque<Message, N>,
    senders: MultiWakerRegistration<MAX_WAITERS>,
    receivers: MultiWakerRegistration<MAX_WAITERS>,
}

/// Fixed-capacity FIFO of [`Message`]s, safe to share between threads.
pub struct BoundedQueue<const N: usize> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<Inner<N>>>,
}

impl<const N: usize> BoundedQueue<N> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                items: Deque::new(),
                senders: MultiWakerRegistration::new(),
                receivers: MultiWakerRegistration::new(),
            })),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner<N>) -> R) -> R {
        self.inner.lock(|cell| f(&mut cell.borrow_mut()))
    }

    /// Enqueue `msg`, waiting at most `timeout` for room.
    pub fn push(&self, msg: Message, timeout: Duration) -> Result<(), QueueError> {
        match self.try_push_or_return(msg) {
            Ok(()) => Ok(()),
            Err(_) if timeout.is_zero() => Err(QueueError::Full),
            Err(msg) => future::block_on(self.push_async(msg, timeout)),
        }
    }

    /// Async form of [`push`](Self::push).
    pub async fn push_async(&self, msg: Message, timeout: Duration) -> Result<(), QueueError> {
        future::or(
            async {
                self.send(msg).await;
                Ok(())
            },
            async {
                async_io_mini::Timer::after(timeout).await;
                Err(QueueError::TimedOut)
            },
        )
        .await
    }

    /// Wait (without bound) for room, then enqueue.
    pub async fn send(&self, msg: Message) {
        let mut slot = Some(msg);
        future::poll_fn(|cx| self.poll_push(cx, &mut slot)).await;
    }

    fn poll_push(&self, cx: &mut Context<'_>, slot: &mut Option<Message>) -> Poll<()> {
        let Some(msg) = slot.take() else {
            return Poll::Ready(());
        };
        self.with(|inner| match inner.items.push_back(msg) {
            Ok(()) => {
                inner.receivers.wake();
                Poll::Ready(())
            }
            Err(msg) => {
                *slot = Some(msg);
                inner.senders.register(cx.waker());
                Poll::Pending
            }
        })
    }

    fn try_push_or_return(&self, msg: Message) -> Result<(), Message> {
        self.with(|inner| {
            inner.items.push_back(msg)?;
            inner.receivers.wake();
            Ok(())
        })
    }

    /// Non-blocking enqueue.
    pub fn try_push(&self, msg: Message) -> Result<(), QueueError> {
        self.try_push_or_return(msg).map_err(|_| QueueError::Full)
    }

    /// Dequeue the oldest message, waiting at most `timeout`.
    pub fn pop(&self, timeout: Duration) -> Option<Message> {
        if let Some(msg) = self.try_pop() {
            return Some(msg);
        }
        if timeout.is_zero() {
            return None;
        }
        future::block_on(self.pop_async(timeout))
    }

    /// Async form of [`pop`](Self::pop).
    pub async fn pop_async(&self, timeout: Duration) -> Option<Message> {
        future::or(async { Some(self.recv().await) }, async {
            async_io_mini::Timer::after(timeout).await;
            None
        })
        .await
    }

    /// Wait (without bound) for the next message. Only for use inside a
    /// `select` that also races a timer or a stop signal.
    pub async fn recv(&self) -> Message {
        future::poll_fn(|cx| self.poll_pop(cx)).await
    }

    fn poll_pop(&self, cx: &mut Context<'_>) -> Poll<Message> {
        self.with(|inner| match inner.items.pop_front() {
            Some(msg) => {
                inner.senders.wake();
                Poll::Ready(msg)
            }
            None => {
                inner.receivers.register(cx.waker());
                Poll::Pending
            }
        })
    }

    pub fn try_pop(&self) -> Option<Message> {
        self.with(|inner| {
            let msg = inner.items.pop_front()?;
            inner.senders.wake();
            Some(msg)
        })
    }

    /// Current depth. Racy under concurrent use, but always `<= N`.
    pub fn len(&self) -> usize {
        self.with(|inner| inner.items.len())
    }

    pub fn is_empty(&self) -> bool {
        self.with(|inner| inner.items.is_empty())
    }

    pub fn is_full(&self) -> bool {
        self.with(|inner| inner.items.is_full())
    }

    /// Drop every queued message.
    pub fn clear(&self) {
        self.with(|inner| {
            inner.items.clear();
            inner.senders.wake();
        });
    }
}

impl<const N: usize> Default for BoundedQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
