//! Busy-State Indicator
//!
//! Tells the user whether the view is up to date. While a pass is
//! computing, a pulse thread toggles a display intensity so a long pass is
//! visibly alive. The indicator only reports; nothing reads it back to make
//! decisions.

use std::io;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::trace;

/// Intensity shown at rest and on even pulses.
pub const PULSE_HIGH: u8 = 200;
/// Intensity shown on odd pulses.
pub const PULSE_LOW: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BusyState {
    Idle,
    /// The worker is snapshotting or recomputing.
    Computing,
    /// Results were handed to the consumer and are not applied yet.
    Applying,
}

#[derive(Debug)]
struct Status {
    state: BusyState,
    /// Bumped on every transition so the pulse thread can tell a new
    /// computing phase from the one it was timing.
    generation: u64,
    closed: bool,
}

#[derive(Debug)]
struct Inner {
    status: Mutex<Status>,
    changed: Condvar,
    intensity: AtomicU8,
    pulses: AtomicU64,
    interval: Duration,
    initial_delay: Duration,
}

impl Inner {
    fn pulse(&self) {
        let next = match self.intensity.load(Ordering::Relaxed) {
            PULSE_HIGH => PULSE_LOW,
            _ => PULSE_HIGH,
        };
        self.intensity.store(next, Ordering::Relaxed);
        let n = self.pulses.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(pulse = n, intensity = next, "busy pulse");
    }

    fn run_pulse(&self) {
        let mut status = self.status.lock();
        loop {
            if status.closed {
                return;
            }
            if status.state != BusyState::Computing {
                self.changed.wait(&mut status);
                continue;
            }

            let generation = status.generation;
            let mut deadline = Instant::now() + self.initial_delay;
            loop {
                self.changed.wait_until(&mut status, deadline);
                if status.closed || status.generation != generation {
                    break;
                }
                if Instant::now() >= deadline {
                    self.pulse();
                    deadline += self.interval;
                }
            }
        }
    }
}

/// Idle → Computing → Applying → Idle, plus the pulse while computing.
#[derive(Debug)]
pub struct BusyIndicator {
    inner: Arc<Inner>,
    pulse_thread: Mutex<Option<JoinHandle<()>>>,
}

impl BusyIndicator {
    /// Create an indicator. The pulse does not run until
    /// [`spawn_pulse`](Self::spawn_pulse) is called.
    pub fn new(interval: Duration, initial_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                status: Mutex::new(Status {
                    state: BusyState::Idle,
                    generation: 0,
                    closed: false,
                }),
                changed: Condvar::new(),
                intensity: AtomicU8::new(PULSE_HIGH),
                pulses: AtomicU64::new(0),
                interval,
                initial_delay,
            }),
            pulse_thread: Mutex::new(None),
        }
    }

    /// Start the pulse thread.
    pub fn spawn_pulse(&self, name: String) -> io::Result<()> {
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || inner.run_pulse())?;
        *self.pulse_thread.lock() = Some(handle);
        Ok(())
    }

    pub fn set_state(&self, state: BusyState) {
        let mut status = self.inner.status.lock();
        if status.state == state || status.closed {
            return;
        }
        trace!(from = ?status.state, to = ?state, "busy state");
        status.state = state;
        status.generation += 1;
        if state != BusyState::Computing {
            self.inner.intensity.store(PULSE_HIGH, Ordering::Relaxed);
        }
        self.inner.changed.notify_all();
    }

    pub fn state(&self) -> BusyState {
        self.inner.status.lock().state
    }

    /// Current display intensity.
    pub fn intensity(&self) -> u8 {
        self.inner.intensity.load(Ordering::Relaxed)
    }

    /// Number of pulses since creation.
    pub fn pulse_count(&self) -> u64 {
        self.inner.pulses.load(Ordering::Relaxed)
    }

    /// Block until the indicator reaches `state` or `timeout` passes.
    pub fn wait_for_state(&self, state: BusyState, timeout: Duration) -> bool {
        let mut status = self.inner.status.lock();
        let deadline = Instant::now() + timeout;
        while status.state != state {
            if self.inner.changed.wait_until(&mut status, deadline).timed_out() {
                return status.state == state;
            }
        }
        true
    }

    /// Stop the pulse thread. The state is frozen from here on.
    pub fn close(&self) {
        {
            let mut status = self.inner.status.lock();
            status.closed = true;
            self.inner.changed.notify_all();
        }
        let handle = self.pulse_thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for BusyIndicator {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indicator(interval_ms: u64, delay_ms: u64) -> BusyIndicator {
        let busy = BusyIndicator::new(Duration::from_millis(interval_ms), Duration::from_millis(delay_ms));
        busy.spawn_pulse("busy-test".to_string()).unwrap();
        busy
    }

    #[test]
    fn pulses_only_while_computing() {
        let busy = indicator(5, 5);
        thread::sleep(Duration::from_millis(40));
        assert_eq!(busy.pulse_count(), 0);

        busy.set_state(BusyState::Computing);
        thread::sleep(Duration::from_millis(60));
        assert!(busy.pulse_count() > 0);

        busy.set_state(BusyState::Idle);
        assert_eq!(busy.intensity(), PULSE_HIGH);
        let after = busy.pulse_count();
        thread::sleep(Duration::from_millis(40));
        assert_eq!(busy.pulse_count(), after);
    }

    #[test]
    fn initial_delay_holds_back_the_first_pulse() {
        let busy = indicator(5, 10_000);
        busy.set_state(BusyState::Computing);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(busy.pulse_count(), 0);
        busy.close();
    }

    #[test]
    fn closed_indicator_ignores_transitions() {
        let busy = indicator(5, 5);
        busy.close();
        busy.set_state(BusyState::Computing);
        assert_eq!(busy.state(), BusyState::Idle);
    }

    #[test]
    fn wait_for_state_times_out() {
        let busy = BusyIndicator::new(Duration::from_secs(1), Duration::from_secs(1));
        assert!(busy.wait_for_state(BusyState::Idle, Duration::from_millis(1)));
        assert!(!busy.wait_for_state(BusyState::Applying, Duration::from_millis(10)));
    }
}
