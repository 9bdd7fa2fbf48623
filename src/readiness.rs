//! Device readiness bits.
//!
//! Provisioning and network bring-up publish their progress here; the
//! firmware waits on the bits it needs (normally [`CONNECTED_TO_AP`])
//! before starting the transport. The transport itself never reads them.

use core::cell::RefCell;
use core::future::{Future, poll_fn};
use core::sync::atomic::{AtomicU8, Ordering};
use core::task::Poll;
use core::time::Duration;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::waitqueue::MultiWakerRegistration;
use futures_lite::future::or;

/// Credentials are stored.
pub const PROVISIONED: u8 = 1 << 0;
/// Radio is in station mode.
pub const STA_MODE: u8 = 1 << 1;
/// Station association in progress.
pub const WAIT_ON_CONN: u8 = 1 << 2;
/// Association failed; fall back to access-point provisioning.
pub const ROLLBACK_TO_AP: u8 = 1 << 3;
/// Station has an IP address.
pub const CONNECTED_TO_AP: u8 = 1 << 4;
/// Factory reset requested and pending.
pub const WAIT_ON_RESET: u8 = 1 << 5;
/// Factory reset in progress.
pub const ON_RESET: u8 = 1 << 6;

const MAX_WAITERS: usize = 4;

/// A small set of flags shared between tasks.
///
/// Waiters park until a [`set`](Self::set) wakes them; nothing polls.
pub struct Readiness {
    bits: AtomicU8,
    waiters: Mutex<CriticalSectionRawMutex, RefCell<MultiWakerRegistration<MAX_WAITERS>>>,
}

impl Readiness {
    pub const fn new() -> Self {
        Self {
            bits: AtomicU8::new(0),
            waiters: Mutex::new(RefCell::new(MultiWakerRegistration::new())),
        }
    }

    pub fn set(&self, mask: u8) {
        self.bits.fetch_or(mask, Ordering::AcqRel);
        self.waiters.lock(|w| w.borrow_mut().wake());
    }

    pub fn clear(&self, mask: u8) {
        self.bits.fetch_and(!mask, Ordering::AcqRel);
    }

    pub fn bits(&self) -> u8 {
        self.bits.load(Ordering::Acquire)
    }

    /// All of `mask` is set.
    pub fn contains(&self, mask: u8) -> bool {
        self.bits() & mask == mask
    }

    /// Block until every bit in `mask` is set or `timeout` elapses.
    /// Returns whether the bits were seen.
    pub fn wait_all(&self, mask: u8, timeout: Duration) -> bool {
        futures_lite::future::block_on(self.wait_all_async(mask, timeout))
    }

    pub async fn wait_all_async(&self, mask: u8, timeout: Duration) -> bool {
        let seen = async {
            self.until(mask).await;
            true
        };
        let expired = async {
            async_io_mini::Timer::after(timeout).await;
            false
        };
        or(seen, expired).await
    }

    /// Resolves once every bit in `mask` is set.
    fn until(&self, mask: u8) -> impl Future<Output = ()> + '_ {
        poll_fn(move |cx| {
            // `set` wakes under this same lock.
            self.waiters.lock(|w| {
                if self.contains(mask) {
                    Poll::Ready(())
                } else {
                    w.borrow_mut().register(cx.waker());
                    Poll::Pending
                }
            })
        })
    }
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Readiness {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Readiness")
            .field("bits", &format_args!("{:#010b}", self.bits()))
            .finish()
    }
}
