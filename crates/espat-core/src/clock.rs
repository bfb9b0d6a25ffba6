//! Time and timeout tracking
//!
//! The engine never reads a system clock. Time only moves when the host calls
//! [`Clock::advance_time`], typically from a 1 ms timer tick.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Shared millisecond counter
///
/// Clones share the same counter, so the tick source can hold one while the
/// engine holds another.
#[derive(Debug, Clone, Default)]
pub struct Clock {
    millis: Arc<AtomicU64>,
}

impl Clock {
    /// Create a clock starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Current time in milliseconds since the clock was created
    pub fn now(&self) -> u64 {
        self.millis.load(Ordering::Acquire)
    }

    /// Advance the clock by `ms` milliseconds
    pub fn advance_time(&self, ms: u64) {
        self.millis.fetch_add(ms, Ordering::AcqRel);
    }

    /// Deadline `timeout_ms` from now
    pub fn deadline(&self, timeout_ms: u64) -> Deadline {
        Deadline::new(self.now(), timeout_ms)
    }

    /// Spawn a thread that advances this clock every `period`
    ///
    /// Intended for hosts that have no timer interrupt to hook. The ticker
    /// stops when the returned handle is dropped.
    pub fn spawn_ticker(&self, period: Duration) -> Ticker {
        let clock = self.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let step = period.as_millis().max(1) as u64;

        let handle = std::thread::spawn(move || {
            while !stop_flag.load(Ordering::Acquire) {
                std::thread::sleep(period);
                clock.advance_time(step);
            }
        });

        Ticker {
            stop,
            handle: Some(handle),
        }
    }
}

/// Handle to a running ticker thread
pub struct Ticker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// A point in time recorded as `issued_at + timeout_ms`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    /// Clock value when the operation started
    pub issued_at: u64,
    /// Allowed duration in milliseconds
    pub timeout_ms: u64,
}

impl Deadline {
    /// Create a deadline
    pub fn new(issued_at: u64, timeout_ms: u64) -> Self {
        Self {
            issued_at,
            timeout_ms,
        }
    }

    /// Absolute expiry time
    pub fn at(&self) -> u64 {
        self.issued_at.saturating_add(self.timeout_ms)
    }

    /// True once `now` has reached the expiry time
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.at()
    }

    /// Milliseconds left before expiry
    pub fn remaining(&self, now: u64) -> u64 {
        self.at().saturating_sub(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_time() {
        let clock = Clock::new();
        let tick_source = clock.clone();
        tick_source.advance_time(5);
        tick_source.advance_time(1);
        assert_eq!(clock.now(), 6);
    }

    #[test]
    fn test_deadline_expiry() {
        let clock = Clock::new();
        clock.advance_time(100);
        let deadline = clock.deadline(50);
        assert_eq!(deadline.at(), 150);
        assert!(!deadline.is_expired(149));
        assert!(deadline.is_expired(150));
        assert_eq!(deadline.remaining(120), 30);
        assert_eq!(deadline.remaining(200), 0);
    }

    #[test]
    fn test_ticker_advances_clock() {
        let clock = Clock::new();
        {
            let _ticker = clock.spawn_ticker(Duration::from_millis(1));
            std::thread::sleep(Duration::from_millis(30));
        }
        let stopped_at = clock.now();
        assert!(stopped_at > 0);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(clock.now(), stopped_at);
    }
}
