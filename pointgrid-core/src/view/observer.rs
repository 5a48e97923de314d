//! Producer-side change handling.

use std::sync::Arc;

use tracing::trace;

use super::dirty::DirtyTracker;
use super::silence::SilenceCounter;
use crate::source::ChangeObserver;

/// The observer a view registers with its data source.
///
/// Every notification passes the silence gate first, then turns into a
/// dirty mark. Nothing else happens on the producer's thread.
pub struct ViewObserver {
    tracker: Arc<DirtyTracker>,
    silence: SilenceCounter,
}

impl ViewObserver {
    pub fn new(tracker: Arc<DirtyTracker>, silence: SilenceCounter) -> Self {
        Self { tracker, silence }
    }

    /// The user is dragging a filter slider. Values need recomputing, the
    /// filter ranges themselves do not.
    pub fn filter_adjusted(&self) -> bool {
        self.silence
            .gate("filter_adjusted", || self.tracker.mark_dirty(false))
    }
}

impl ChangeObserver for ViewObserver {
    fn on_value_changed(&self, still_changing: bool) {
        let accepted = self
            .silence
            .gate("value_changed", || self.tracker.mark_dirty(false));
        if accepted {
            trace!(still_changing, "value change queued");
        }
    }

    fn on_structure_changed(&self) {
        self.silence
            .gate("structure_changed", || self.tracker.mark_dirty(true));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::dirty::Wakeup;

    #[test]
    fn notifications_mark_the_tracker() {
        let tracker = Arc::new(DirtyTracker::new());
        let observer = ViewObserver::new(tracker.clone(), SilenceCounter::new());

        observer.on_value_changed(true);
        observer.on_structure_changed();
        assert_eq!(tracker.try_take(), Some(Wakeup::Recompute { structural: true }));

        assert!(observer.filter_adjusted());
        assert_eq!(tracker.try_take(), Some(Wakeup::Recompute { structural: false }));
    }

    #[test]
    fn silenced_notifications_are_dropped() {
        let tracker = Arc::new(DirtyTracker::new());
        let silence = SilenceCounter::new();
        let observer = ViewObserver::new(tracker.clone(), silence.clone());

        silence.with_silence(|| {
            observer.on_value_changed(false);
            observer.on_structure_changed();
            assert!(!observer.filter_adjusted());
        });
        assert_eq!(tracker.try_take(), None);
    }
}
