//! Silence Counter
//!
//! A recompute pass writes into the same dataset it observes (schema
//! rebuilds, cached results, filter resets). Those writes fire the usual
//! change notifications, which must not turn into new recompute requests.
//!
//! The counter is incremented around every such write. Producer-side
//! handlers check it first and drop the notification while it is non-zero.
//! Nesting is allowed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::trace;

/// Shared reentrancy counter.
#[derive(Debug, Clone, Default)]
pub struct SilenceCounter {
    depth: Arc<AtomicUsize>,
}

/// Guard that leaves the silenced section when dropped.
///
/// The decrement runs even if the silenced closure panics.
#[must_use = "the section is only silenced while the guard is alive"]
pub struct SilenceGuard {
    depth: Arc<AtomicUsize>,
}

impl SilenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a silenced section.
    pub fn enter(&self) -> SilenceGuard {
        self.depth.fetch_add(1, Ordering::SeqCst);
        SilenceGuard {
            depth: Arc::clone(&self.depth),
        }
    }

    /// Run `f` with notifications silenced.
    pub fn with_silence<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.enter();
        f()
    }

    pub fn is_silent(&self) -> bool {
        self.depth() > 0
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Run `f` only if nothing is silenced. Returns whether it ran.
    pub fn gate(&self, what: &'static str, f: impl FnOnce()) -> bool {
        if self.is_silent() {
            trace!(notification = what, "dropped while silenced");
            return false;
        }
        f();
        true
    }
}

impl Drop for SilenceGuard {
    fn drop(&mut self) {
        // Never go below zero.
        let _ = self
            .depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn nested_sections() {
        let silence = SilenceCounter::new();
        assert!(!silence.is_silent());

        silence.with_silence(|| {
            assert_eq!(silence.depth(), 1);
            silence.with_silence(|| assert_eq!(silence.depth(), 2));
            assert_eq!(silence.depth(), 1);
        });

        assert_eq!(silence.depth(), 0);
    }

    #[test]
    fn gate_drops_while_silenced() {
        let silence = SilenceCounter::new();
        let mut calls = 0;
        assert!(silence.gate("test", || calls += 1));
        let ran = silence.with_silence(|| silence.gate("test", || calls += 1));
        assert!(!ran);
        assert_eq!(calls, 1);
    }

    #[test]
    fn panic_still_leaves_the_section() {
        let silence = SilenceCounter::new();
        let result = catch_unwind(AssertUnwindSafe(|| {
            silence.with_silence(|| panic!("boom"));
        }));
        assert!(result.is_err());
        assert!(!silence.is_silent());
    }

    #[test]
    fn clones_share_the_counter() {
        let silence = SilenceCounter::new();
        let other = silence.clone();
        let _guard = silence.enter();
        assert!(other.is_silent());
    }
}
