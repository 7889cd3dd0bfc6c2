//! Interruptible single-holder lock that owns the value it protects.
//!
//! The protected value is moved out to the holder on acquire and moved back
//! on release, so holding the guard is the only way to reach it. Waiters can
//! be cancelled through a [`CancelToken`], and the lock can be closed for
//! teardown without blocking on an in-flight holder.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// How often a blocked waiter re-checks its cancel token.
const CANCEL_POLL: Duration = Duration::from_millis(5);

// ── Cancellation ──

/// Shared cancellation flag. Clones observe the same flag.
///
/// A [`child`](CancelToken::child) token is cancelled when either it or its
/// parent is; cancelling the child leaves the parent untouched.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    parent: Option<Box<CancelToken>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&self) -> Self {
        CancelToken {
            flag: Arc::default(),
            parent: Some(Box::new(self.clone())),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }
}

// ── Lock ──

enum Slot<T> {
    /// Unheld; the value is parked here.
    Free(T),
    /// A guard has the value.
    Held,
    /// Closed while held. The guard drops the value instead of returning it.
    Closing,
    /// Closed and empty.
    Closed,
}

/// Why an acquire did not produce a guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    /// The waiter's token was cancelled before the lock came free.
    Cancelled,
    /// The lock was closed.
    Closed,
}

/// Result of [`WriteLock::close`].
pub enum Close<T> {
    /// The lock was free. The caller now owns the value.
    Acquired(T),
    /// A holder is active. The value is dropped when its guard goes away.
    Busy,
    AlreadyClosed,
}

pub struct WriteLock<T> {
    slot: Mutex<Slot<T>>,
    released: Condvar,
}

impl<T> WriteLock<T> {
    pub fn new(value: T) -> Self {
        WriteLock {
            slot: Mutex::new(Slot::Free(value)),
            released: Condvar::new(),
        }
    }

    // The slot mutex is only held for state transitions, never while the
    // value is in use, so a poisoned slot is still consistent.
    fn slot(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until the lock is free or `cancel` fires.
    pub fn lock_interruptible(&self, cancel: &CancelToken) -> Result<WriteGuard<'_, T>, LockError> {
        let mut slot = self.slot();
        loop {
            match std::mem::replace(&mut *slot, Slot::Held) {
                Slot::Free(value) => {
                    return Ok(WriteGuard {
                        lock: self,
                        value: Some(value),
                    });
                }
                other => *slot = other,
            }
            match *slot {
                Slot::Closing | Slot::Closed => return Err(LockError::Closed),
                _ => {}
            }
            if cancel.is_cancelled() {
                return Err(LockError::Cancelled);
            }
            slot = self
                .released
                .wait_timeout(slot, CANCEL_POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Take the lock only if it is free right now.
    pub fn try_lock(&self) -> Option<WriteGuard<'_, T>> {
        let mut slot = self.slot();
        match std::mem::replace(&mut *slot, Slot::Held) {
            Slot::Free(value) => Some(WriteGuard {
                lock: self,
                value: Some(value),
            }),
            other => {
                *slot = other;
                None
            }
        }
    }

    /// Close the lock without waiting. Every later acquire fails with
    /// [`LockError::Closed`] and blocked waiters wake up with the same error.
    pub fn close(&self) -> Close<T> {
        let mut slot = self.slot();
        let outcome = match std::mem::replace(&mut *slot, Slot::Closed) {
            Slot::Free(value) => Close::Acquired(value),
            Slot::Held => {
                *slot = Slot::Closing;
                Close::Busy
            }
            Slot::Closing => {
                *slot = Slot::Closing;
                Close::AlreadyClosed
            }
            Slot::Closed => Close::AlreadyClosed,
        };
        drop(slot);
        self.released.notify_all();
        outcome
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.slot(), Slot::Closing | Slot::Closed)
    }

    /// Wait up to `timeout` for a [`close`](WriteLock::close) to finish, that
    /// is, for the last holder to drop the value. Returns `false` on timeout
    /// or if the lock was never closed.
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot();
        loop {
            if matches!(*slot, Slot::Closed) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            slot = self
                .released
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn release(&self, value: T) {
        let mut slot = self.slot();
        match *slot {
            Slot::Closing => {
                // Drop the value before reporting Closed, so `wait_closed`
                // returns only once it is gone.
                drop(slot);
                drop(value);
                *self.slot() = Slot::Closed;
            }
            _ => {
                *slot = Slot::Free(value);
                drop(slot);
            }
        }
        // Waiters and `wait_closed` share the condvar.
        self.released.notify_all();
    }
}

/// Exclusive access to the locked value. Released on drop, whatever the
/// reason the holder stops.
pub struct WriteGuard<'a, T> {
    lock: &'a WriteLock<T>,
    value: Option<T>,
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value.as_ref().expect("guard holds its value until drop")
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("guard holds its value until drop")
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.lock.release(value);
        }
    }
}
