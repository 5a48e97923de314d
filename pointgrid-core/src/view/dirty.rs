//! Dirty Tracker
//!
//! Collapses any number of change notifications into one pending recompute.
//! Producers call [`DirtyTracker::mark_dirty`] from any thread; it takes a
//! short lock, sets two flags, and wakes the worker. The worker reads and
//! clears both flags in one step.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// What the worker has to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// Recompute. `structural` is the OR of every notification since the
    /// last wake-up.
    Recompute { structural: bool },
    /// The view is closing.
    Closed,
}

#[derive(Debug, Default)]
struct Signal {
    dirty: bool,
    structure_changed: bool,
    closed: bool,
    /// A recompute was handed out and has not been finished yet.
    in_flight: bool,
}

impl Signal {
    fn take(&mut self) -> Option<Wakeup> {
        if self.closed {
            return Some(Wakeup::Closed);
        }
        if !self.dirty {
            return None;
        }
        let structural = self.structure_changed;
        self.dirty = false;
        self.structure_changed = false;
        self.in_flight = true;
        Some(Wakeup::Recompute { structural })
    }
}

/// Pending-recompute flags plus the condition variable the worker sleeps on.
#[derive(Debug, Default)]
pub struct DirtyTracker {
    signal: Mutex<Signal>,
    wake: Condvar,
}

impl DirtyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a recompute. Never blocks on the worker.
    pub fn mark_dirty(&self, structural: bool) {
        let mut signal = self.signal.lock();
        signal.dirty = true;
        signal.structure_changed |= structural;
        self.wake.notify_one();
    }

    /// Read and clear the flags without waiting.
    pub fn try_take(&self) -> Option<Wakeup> {
        self.signal.lock().take()
    }

    /// Block until there is something to do.
    pub fn wait(&self) -> Wakeup {
        let mut signal = self.signal.lock();
        loop {
            if let Some(wakeup) = signal.take() {
                return wakeup;
            }
            self.wake.wait(&mut signal);
        }
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Wakeup> {
        let mut signal = self.signal.lock();
        if let Some(wakeup) = signal.take() {
            return Some(wakeup);
        }
        self.wake.wait_for(&mut signal, timeout);
        signal.take()
    }

    /// Sleep for `delay` unless the tracker is closed first.
    ///
    /// Returns `false` if it was closed. Pending flags are left alone.
    pub fn sleep_unless_closed(&self, delay: Duration) -> bool {
        let mut signal = self.signal.lock();
        if !signal.closed {
            self.wake.wait_while_for(&mut signal, |s| !s.closed, delay);
        }
        !signal.closed
    }

    /// Whether a recompute is pending.
    pub fn is_dirty(&self) -> bool {
        self.signal.lock().dirty
    }

    /// Called by the worker once it is done with a wake-up.
    pub fn finish_pass(&self) {
        self.signal.lock().in_flight = false;
    }

    /// Nothing pending and nothing in flight.
    pub fn is_settled(&self) -> bool {
        let signal = self.signal.lock();
        !signal.dirty && !signal.in_flight
    }

    /// Wake the worker for good.
    pub fn close(&self) {
        let mut signal = self.signal.lock();
        signal.closed = true;
        self.wake.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.signal.lock().closed
    }
}
