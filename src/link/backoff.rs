//! Reconnect backoff schedule.
//!
//! Walks a fixed, non-decreasing table of delays. Each failed attempt
//! yields the delay at the current index and then advances the index,
//! clamping at the last entry. Only a successful connection resets it.
//!
//! ```text
//!  failure #   1    2    3    4     5     6     7 ...
//!  delay       1s   2s   5s   10s   15s   30s   30s ...
//! ```

use core::time::Duration;

use heapless::Vec;

/// Maximum number of steps in a schedule.
pub const MAX_BACKOFF_STEPS: usize = 8;

/// Default schedule in milliseconds.
pub const DEFAULT_BACKOFF_MS: [u32; 6] = [1_000, 2_000, 5_000, 10_000, 15_000, 30_000];

#[derive(Debug, Clone)]
pub struct Backoff {
    steps: Vec<Duration, MAX_BACKOFF_STEPS>,
    index: usize,
}

impl Backoff {
    /// Build from a millisecond table. An empty table degrades to a single
    /// one-second step; callers validate the config before reaching here.
    pub fn from_millis(schedule: &[u32]) -> Self {
        let mut steps = Vec::new();
        for &ms in schedule.iter().take(MAX_BACKOFF_STEPS) {
            let _ = steps.push(Duration::from_millis(u64::from(ms)));
        }
        if steps.is_empty() {
            let _ = steps.push(Duration::from_secs(1));
        }
        Self { steps, index: 0 }
    }

    /// Delay to sleep after the failure just observed; advances the index.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.steps[self.index];
        if self.index + 1 < self.steps.len() {
            self.index += 1;
        }
        delay
    }

    /// Delay that the next failure would yield, without advancing.
    pub fn peek(&self) -> Duration {
        self.steps[self.index]
    }

    /// Back to the first step (after a successful connect).
    pub fn reset(&mut self) {
        self.index = 0;
    }

    /// Largest delay in the schedule.
    pub fn max_delay(&self) -> Duration {
        self.steps[self.steps.len() - 1]
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_millis(&DEFAULT_BACKOFF_MS)
    }
}
