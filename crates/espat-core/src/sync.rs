//! Mutual-exclusion guard
//!
//! Wraps an injected lock primitive (an RTOS mutex, a host condvar, or nothing
//! at all for single-context use) with a bounded acquire.

use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::warn;

use crate::protocol::EspError;

/// Failures reported by a lock primitive
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("Lock primitive could not be created: {0}")]
    /// The primitive could not be created
    CreateFailed(String),

    #[error("Timed out after {0:?} waiting for lock")]
    /// Acquire wait expired
    Timeout(Duration),

    #[error("Lock released while not held")]
    /// Released without being held
    NotHeld,

    #[error("Lock primitive has been destroyed")]
    /// Used after destroy
    Destroyed,
}

/// Platform lock primitive
///
/// Mirrors the create/delete/request/release calls an RTOS offers.
pub trait LockPrimitive: Send + Sync {
    /// Allocate the underlying object
    fn create(&mut self) -> Result<(), LockError>;

    /// Free the underlying object
    fn destroy(&mut self) -> Result<(), LockError>;

    /// Take the lock, waiting at most `timeout`
    fn acquire(&self, timeout: Duration) -> Result<(), LockError>;

    /// Give the lock back
    fn release(&self) -> Result<(), LockError>;
}

#[derive(Debug, Default)]
struct LockState {
    created: bool,
    held: bool,
}

/// Host lock built on `Mutex` + `Condvar`
#[derive(Debug, Default)]
pub struct StdLock {
    state: Mutex<LockState>,
    released: Condvar,
}

impl StdLock {
    /// Unlocked primitive
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LockPrimitive for StdLock {
    fn create(&mut self) -> Result<(), LockError> {
        let mut state = self.state();
        state.created = true;
        state.held = false;
        Ok(())
    }

    fn destroy(&mut self) -> Result<(), LockError> {
        let mut state = self.state();
        state.created = false;
        self.released.notify_all();
        Ok(())
    }

    fn acquire(&self, timeout: Duration) -> Result<(), LockError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state();

        loop {
            if !state.created {
                return Err(LockError::Destroyed);
            }
            if !state.held {
                state.held = true;
                return Ok(());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(LockError::Timeout(timeout));
            }
            state = self
                .released
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn release(&self) -> Result<(), LockError> {
        let mut state = self.state();
        if !state.held {
            return Err(LockError::NotHeld);
        }
        state.held = false;
        self.released.notify_one();
        Ok(())
    }
}

/// Primitive for single-context use: every acquire succeeds immediately
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLock;

impl LockPrimitive for NoLock {
    fn create(&mut self) -> Result<(), LockError> {
        Ok(())
    }

    fn destroy(&mut self) -> Result<(), LockError> {
        Ok(())
    }

    fn acquire(&self, _timeout: Duration) -> Result<(), LockError> {
        Ok(())
    }

    fn release(&self) -> Result<(), LockError> {
        Ok(())
    }
}

/// Value protected by a [`LockPrimitive`]
///
/// The inner `Mutex` only provides safe interior access; contention is decided
/// by the primitive, so a failed acquire never touches the value.
pub struct Guard<T> {
    primitive: Box<dyn LockPrimitive>,
    timeout: Duration,
    value: Mutex<T>,
    destroyed: bool,
}

impl<T> Guard<T> {
    /// Create the primitive and wrap `value`
    pub fn create(
        mut primitive: Box<dyn LockPrimitive>,
        timeout: Duration,
        value: T,
    ) -> Result<Self, EspError> {
        primitive.create().map_err(|e| {
            warn!("lock primitive create failed: {e}");
            EspError::LockFailure
        })?;

        Ok(Self {
            primitive,
            timeout,
            value: Mutex::new(value),
            destroyed: false,
        })
    }

    /// Acquire with the configured bounded wait
    pub fn acquire(&self) -> Result<GuardRef<'_, T>, EspError> {
        self.primitive.acquire(self.timeout).map_err(|e| {
            warn!("lock acquire failed: {e}");
            EspError::LockFailure
        })?;

        let value = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(GuardRef { guard: self, value })
    }

    /// Destroy the primitive explicitly, reporting any failure
    pub fn destroy(mut self) -> Result<(), EspError> {
        self.destroyed = true;
        self.primitive.destroy().map_err(|e| {
            warn!("lock primitive destroy failed: {e}");
            EspError::LockFailure
        })
    }
}

impl<T> Drop for Guard<T> {
    fn drop(&mut self) {
        if !self.destroyed {
            let _ = self.primitive.destroy();
        }
    }
}

/// Access to a guarded value; releases the primitive on drop
pub struct GuardRef<'a, T> {
    guard: &'a Guard<T>,
    value: MutexGuard<'a, T>,
}

impl<T> Deref for GuardRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for GuardRef<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T> Drop for GuardRef<'_, T> {
    fn drop(&mut self) {
        // The next holder may briefly wait on the inner mutex until `value` drops.
        if let Err(e) = self.guard.primitive.release() {
            warn!("lock release failed: {e}");
        }
    }
}
