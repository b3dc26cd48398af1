//! One-shot sample-rate handoff between synthesis and playback.
//!
//! The synthesis stage publishes the rate of its first successful waveform;
//! the playback stage waits for it before opening the device.  If synthesis
//! finishes without ever producing audio it closes the latch instead, and
//! the waiter gets `None`.
//!
//! ```text
//!   Pending ──publish(rate)──▶ Ready(rate)
//!      │
//!      └──────close()────────▶ Closed
//! ```
//!
//! Both transitions happen at most once; later calls are ignored.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LatchState {
    Pending,
    Ready(u32),
    Closed,
}

#[derive(Debug)]
pub struct SampleRateLatch {
    state: Mutex<LatchState>,
    cond: Condvar,
}

impl SampleRateLatch {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LatchState::Pending),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LatchState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Lock in `rate`.  Returns `true` if this call set it.
    pub fn publish(&self, rate: u32) -> bool {
        let mut state = self.lock();
        if *state != LatchState::Pending {
            return false;
        }
        *state = LatchState::Ready(rate);
        self.cond.notify_all();
        true
    }

    /// Release waiters without a rate.  No effect once a rate is published.
    pub fn close(&self) {
        let mut state = self.lock();
        if *state == LatchState::Pending {
            *state = LatchState::Closed;
            self.cond.notify_all();
        }
    }

    /// The published rate, if any, without waiting.
    pub fn get(&self) -> Option<u32> {
        match *self.lock() {
            LatchState::Ready(rate) => Some(rate),
            _ => None,
        }
    }

    /// Block until the latch is published or closed.
    pub fn wait(&self) -> Option<u32> {
        let mut state = self.lock();
        loop {
            match *state {
                LatchState::Ready(rate) => return Some(rate),
                LatchState::Closed => return None,
                LatchState::Pending => {
                    state = self.cond.wait(state).unwrap_or_else(|e| e.into_inner());
                }
            }
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<u32> {
        let state = self.lock();
        let (state, _) = self
            .cond
            .wait_timeout_while(state, timeout, |s| *s == LatchState::Pending)
            .unwrap_or_else(|e| e.into_inner());
        match *state {
            LatchState::Ready(rate) => Some(rate),
            _ => None,
        }
    }
}

impl Default for SampleRateLatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn publish_is_write_once() {
        let latch = SampleRateLatch::new();
        assert!(latch.publish(24_000));
        assert!(!latch.publish(22_050));
        assert_eq!(latch.get(), Some(24_000));
    }

    #[test]
    fn close_after_publish_keeps_rate() {
        let latch = SampleRateLatch::new();
        latch.publish(16_000);
        latch.close();
        assert_eq!(latch.wait(), Some(16_000));
    }

    #[test]
    fn close_releases_waiter_with_none() {
        let latch = Arc::new(SampleRateLatch::new());
        let waiter = {
            let latch = Arc::clone(&latch);
            thread::spawn(move || latch.wait())
        };
        thread::sleep(Duration::from_millis(20));
        latch.close();
        assert_eq!(waiter.join().unwrap(), None);
        assert!(!latch.publish(24_000));
    }

    #[test]
    fn publish_wakes_waiter() {
        let latch = Arc::new(SampleRateLatch::new());
        let waiter = {
            let latch = Arc::clone(&latch);
            thread::spawn(move || latch.wait())
        };
        thread::sleep(Duration::from_millis(20));
        latch.publish(24_000);
        assert_eq!(waiter.join().unwrap(), Some(24_000));
    }

    #[test]
    fn wait_timeout_expires_while_pending() {
        let latch = SampleRateLatch::new();
        assert_eq!(latch.wait_timeout(Duration::from_millis(10)), None);
        assert_eq!(latch.get(), None);
    }
}
