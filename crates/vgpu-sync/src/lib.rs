//! Cross-thread GPU fence used by guest threads and the render thread.
//!
//! A [`SyncObject`] carries two monotonically increasing timestamps:
//!
//! - `current`: the most recent timestamp the render thread has completed.
//! - `promised`: the highest timestamp any submitted command list has announced it will signal.
//!
//! `current <= promised` always holds. Guest threads block in [`SyncObject::wait`] until the
//! render thread reaches their timestamp; the render thread only ever polls through
//! [`SyncObject::is_ready`] or waits with a bounded timeout.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::{error, trace};

/// Logical fence value. Zero means "nothing has been signaled yet".
pub type Timestamp = u64;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncState {
    pub current: Timestamp,
    pub promised: Timestamp,
}

pub struct SyncObject {
    state: Mutex<SyncState>,
    cond: Condvar,
    /// Mirror of `state.current` so the render thread can poll without taking the lock.
    current: AtomicU64,
}

impl SyncObject {
    /// Creates a sync object with both timestamps zeroed, as the guest's create call does.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SyncState::default()),
            cond: Condvar::new(),
            current: AtomicU64::new(0),
        }
    }

    pub fn current(&self) -> Timestamp {
        self.current.load(Ordering::Acquire)
    }

    pub fn promised(&self) -> Timestamp {
        self.state.lock().unwrap().promised
    }

    pub fn snapshot(&self) -> SyncState {
        *self.state.lock().unwrap()
    }

    /// Raises the promised maximum to at least `timestamp`.
    ///
    /// Called on the submitting thread before the command list that will signal `timestamp` is
    /// queued. Lowering the promise is ignored.
    pub fn promise(&self, timestamp: Timestamp) {
        let mut state = self.state.lock().unwrap();
        state.promised = state.promised.max(timestamp);
    }

    /// Announces the next timestamp and returns it.
    pub fn promise_next(&self) -> Timestamp {
        let mut state = self.state.lock().unwrap();
        state.promised = state.promised.saturating_add(1);
        state.promised
    }

    /// Marks `timestamp` as completed and wakes every waiter.
    ///
    /// Signaling beyond the promised maximum is a protocol violation: debug builds panic, release
    /// builds clamp to the promised value and log the violation. Signaling a value at or below
    /// `current` is a no-op apart from the wakeup.
    pub fn signal(&self, timestamp: Timestamp) {
        let mut state = self.state.lock().unwrap();
        debug_assert!(
            timestamp <= state.promised,
            "sync object signaled with {timestamp} beyond promised {}",
            state.promised
        );
        let target = if timestamp > state.promised {
            error!(
                timestamp,
                promised = state.promised,
                "sync object signaled beyond its promised timestamp; clamping"
            );
            state.promised
        } else {
            timestamp
        };
        if target > state.current {
            state.current = target;
            self.current.store(target, Ordering::Release);
        }
        trace!(current = state.current, "sync object signaled");
        drop(state);
        self.cond.notify_all();
    }

    /// Non-blocking readiness check.
    pub fn is_ready(&self, timestamp: Timestamp) -> bool {
        self.current() >= timestamp
    }

    /// Blocks until `current >= timestamp` or `timeout` elapses.
    ///
    /// `None` waits forever. Returns `true` when the timestamp was reached.
    pub fn wait(&self, timestamp: Timestamp, timeout: Option<Duration>) -> bool {
        if self.is_ready(timestamp) {
            return true;
        }
        // A timeout too large to represent as an instant behaves like an infinite wait.
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));

        let mut state = self.state.lock().unwrap();
        loop {
            if state.current >= timestamp {
                return true;
            }
            match deadline {
                None => state = self.cond.wait(state).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    let (guard, _) = self.cond.wait_timeout(state, deadline - now).unwrap();
                    state = guard;
                }
            }
        }
    }
}

impl Default for SyncObject {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SyncObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.snapshot();
        f.debug_struct("SyncObject")
            .field("current", &state.current)
            .field("promised", &state.promised)
            .finish()
    }
}
