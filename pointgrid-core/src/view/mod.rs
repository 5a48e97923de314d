//! Live Views
//!
//! A view keeps a computed copy of a [`RowDataSource`](crate::source::RowDataSource)
//! up to date in the background.
//!
//! # Threads
//!
//! - Producers mutate the source from any thread. The view's observer turns
//!   each notification into a dirty mark and returns immediately.
//! - One worker thread per view waits for dirty marks, snapshots the source,
//!   recomputes, and publishes.
//! - The presentation consumer applies published results on its own thread.
//!
//! # Feedback
//!
//! A pass writes back into the dataset it observes, and applying its results
//! may fire more notifications. Those writes run under the view's
//! [`SilenceCounter`], which makes the observer drop the resulting
//! notifications instead of starting another pass.

mod busy;
mod dirty;
mod handle;
mod observer;
mod presentation;
mod silence;
mod worker;

pub use busy::{BusyIndicator, BusyState, PULSE_HIGH, PULSE_LOW};
pub use dirty::{DirtyTracker, Wakeup};
pub use handle::{close_view, open_view, ViewHandle};
pub use observer::ViewObserver;
pub use presentation::{ComputedState, OwnerTask, PresentationConsumer, QueuedConsumer};
pub use silence::{SilenceCounter, SilenceGuard};
pub use worker::{StatsSnapshot, WorkerState, WorkerStats};
