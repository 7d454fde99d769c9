//! Single-slot, latest-wins channel between pipeline stages.
//!
//! `publish` never blocks and replaces whatever is in the slot; `try_take`
//! never blocks and empties it. A slow consumer therefore always sees the
//! newest value and a fast producer is never held back. Safe for one
//! producer and one consumer on different threads.

use crate::shutdown::StopSignal;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct StageQueue<T> {
    slot: Mutex<Option<T>>,
    published: AtomicU64,
    overwritten: AtomicU64,
}

impl<T> Default for StageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> StageQueue<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            published: AtomicU64::new(0),
            overwritten: AtomicU64::new(0),
        }
    }

    /// Store `value`, discarding any unconsumed previous value.
    /// Returns `true` if a value was discarded.
    pub fn publish(&self, value: T) -> bool {
        let previous = self.slot.lock().replace(value);
        self.published.fetch_add(1, Ordering::Relaxed);
        if previous.is_some() {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Take the current value, leaving the slot empty.
    pub fn try_take(&self) -> Option<T> {
        self.slot.lock().take()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock().is_none()
    }

    /// Total values published.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Values replaced before anyone took them.
    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }

    /// Poll until a value arrives, `timeout` passes, or `stop` fires.
    /// Only meant for startup; steady-state loops use [`try_take`].
    ///
    /// [`try_take`]: StageQueue::try_take
    pub fn wait_take(&self, timeout: Duration, poll: Duration, stop: &StopSignal) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(v) = self.try_take() {
                return Some(v);
            }
            if stop.is_stopped() || Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(poll);
        }
    }
}
