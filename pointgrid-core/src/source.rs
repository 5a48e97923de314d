//! Row data sources and change observers.
//!
//! A [`RowDataSource`] is the upstream owner of the live dataset. Views
//! subscribe a [`ChangeObserver`] to it when they open and release the
//! subscription when they close; the returned [`Subscription`] handle does
//! the release on drop, so a view can never outlive its registration.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::dataset::{DatasetSnapshot, Revisions};
use crate::error::{DatasetError, SnapshotError};
use crate::table::ComputedTable;

/// Unique identifier for a registered observer.
///
/// Uses an atomic counter to ensure uniqueness across threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Callbacks fired by a data source after it has been mutated.
///
/// Sources call observers after releasing their data lock, on whichever
/// thread performed the mutation.
pub trait ChangeObserver: Send + Sync {
    /// Row values changed. `still_changing` is set while a continuous edit
    /// (e.g. a slider drag) is in progress.
    fn on_value_changed(&self, still_changing: bool);

    /// Columns or rows were added or removed.
    fn on_structure_changed(&self);
}

/// Upstream owner of the live dataset.
pub trait RowDataSource: Send + Sync {
    /// Register an observer. Returns the id needed to remove it.
    fn add_listener(&self, observer: Arc<dyn ChangeObserver>) -> SubscriptionId;

    /// Remove a previously registered observer.
    fn remove_listener(&self, id: SubscriptionId) -> bool;

    /// Copy the current dataset for one recompute pass.
    ///
    /// The copy must not observe any mutation made after this call returns.
    fn snapshot(&self) -> Result<DatasetSnapshot, SnapshotError>;

    /// Number of rows.
    fn size(&self) -> usize;

    /// Current mutation counters.
    fn revisions(&self) -> Revisions;

    /// Replace the formula text of a formula cell.
    fn set_formula(&self, row: usize, col: usize, text: &str) -> Result<(), DatasetError>;

    /// Write computed results back into the live formula cells.
    ///
    /// Cells whose formula changed since the table's snapshot are left
    /// alone. Returns the number of cells written.
    fn store_results(&self, table: &ComputedTable) -> usize;
}

/// An observer registration, released when dropped.
pub struct Subscription {
    source: Arc<dyn RowDataSource>,
    id: Option<SubscriptionId>,
}

impl Subscription {
    /// Register `observer` with `source`.
    pub fn register(source: Arc<dyn RowDataSource>, observer: Arc<dyn ChangeObserver>) -> Self {
        let id = source.add_listener(observer);
        Self {
            source,
            id: Some(id),
        }
    }

    pub fn id(&self) -> Option<SubscriptionId> {
        self.id
    }

    /// Remove the registration now. Further calls are no-ops.
    pub fn release(&mut self) {
        if let Some(id) = self.id.take() {
            self.source.remove_listener(id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::SharedDataset;
    use crate::dataset::{ColumnKind, Schema};
    use std::sync::atomic::AtomicUsize;

    struct Counting(AtomicUsize);

    impl ChangeObserver for Counting {
        fn on_value_changed(&self, _still_changing: bool) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn on_structure_changed(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn subscription_ids_are_unique() {
        assert_ne!(SubscriptionId::new(), SubscriptionId::new());
    }

    #[test]
    fn dropping_subscription_unregisters() {
        let schema = Schema::from_columns([("x", ColumnKind::Native)]).unwrap();
        let source = Arc::new(SharedDataset::new(schema));
        let observer = Arc::new(Counting(AtomicUsize::new(0)));

        let subscription = Subscription::register(source.clone(), observer.clone());
        source.push_row(vec![1.0.into()]).unwrap();
        assert_eq!(observer.0.load(Ordering::SeqCst), 1);
        assert_eq!(source.listener_count(), 1);

        drop(subscription);
        assert_eq!(source.listener_count(), 0);
        source.push_row(vec![2.0.into()]).unwrap();
        assert_eq!(observer.0.load(Ordering::SeqCst), 1);
    }
}
