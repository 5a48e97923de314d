//! Presentation consumers.
//!
//! The consumer owns the visible table and only accepts updates on its own
//! thread. The worker never touches it directly: it hands a task to
//! [`PresentationConsumer::schedule_on_owner_thread`] and the task applies
//! the whole result of a pass in one call.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::dataset::Schema;
use crate::error::PublishError;
use crate::filter::FilterRange;
use crate::table::ComputedTable;

/// Work to run on the consumer's thread.
pub type OwnerTask = Box<dyn FnOnce() + Send + 'static>;

/// Everything one pass publishes.
#[derive(Debug, Clone)]
pub struct ComputedState {
    /// New column layout, present only after a structural change.
    pub schema: Option<Arc<Schema>>,
    pub table: Arc<ComputedTable>,
    /// New filter ranges, present only when they were recomputed.
    pub filter_ranges: Option<Arc<Vec<FilterRange>>>,
}

/// Single-threaded owner of the visible table.
pub trait PresentationConsumer: Send + Sync {
    /// Queue `task` to run on the owner thread.
    fn schedule_on_owner_thread(&self, task: OwnerTask) -> Result<(), PublishError>;

    /// Replace the visible state. Only called from the owner thread.
    fn apply_computed_state(&self, state: ComputedState);
}

type ApplyHook = Box<dyn Fn(&ComputedState) + Send + Sync>;

#[derive(Default)]
struct Queue {
    tasks: VecDeque<OwnerTask>,
    shut_down: bool,
}

/// A consumer whose owner thread is whichever thread calls [`pump`](Self::pump).
///
/// Useful for headless hosts and tests: tasks queue up until pumped, and
/// the last applied state can be read back.
#[derive(Default)]
pub struct QueuedConsumer {
    queue: Mutex<Queue>,
    ready: Condvar,
    latest: Mutex<Option<ComputedState>>,
    applied: AtomicUsize,
    on_apply: Option<ApplyHook>,
}

impl QueuedConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `hook` after every applied state, still on the owner thread.
    pub fn with_apply_hook(hook: impl Fn(&ComputedState) + Send + Sync + 'static) -> Self {
        Self {
            on_apply: Some(Box::new(hook)),
            ..Self::default()
        }
    }

    /// Run every queued task on the calling thread. Returns how many ran.
    pub fn pump(&self) -> usize {
        let tasks: Vec<OwnerTask> = self.queue.lock().tasks.drain(..).collect();
        let count = tasks.len();
        for task in tasks {
            task();
        }
        count
    }

    /// Wait up to `timeout` for at least one task, then pump.
    pub fn pump_timeout(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        {
            let mut queue = self.queue.lock();
            while queue.tasks.is_empty() && !queue.shut_down {
                if self.ready.wait_until(&mut queue, deadline).timed_out() {
                    break;
                }
            }
        }
        self.pump()
    }

    /// Pump until `done` holds or `timeout` passes. Returns whether it held.
    pub fn pump_until(&self, timeout: Duration, mut done: impl FnMut(&Self) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if done(self) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.pump_timeout((deadline - now).min(Duration::from_millis(20)));
        }
    }

    /// Refuse further tasks and drop the queued ones.
    pub fn shut_down(&self) {
        let mut queue = self.queue.lock();
        queue.shut_down = true;
        queue.tasks.clear();
        self.ready.notify_all();
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().tasks.len()
    }

    /// Number of states applied so far.
    pub fn applied_count(&self) -> usize {
        self.applied.load(Ordering::SeqCst)
    }

    /// The last applied state.
    pub fn latest(&self) -> Option<ComputedState> {
        self.latest.lock().clone()
    }
}

impl PresentationConsumer for QueuedConsumer {
    fn schedule_on_owner_thread(&self, task: OwnerTask) -> Result<(), PublishError> {
        let mut queue = self.queue.lock();
        if queue.shut_down {
            return Err(PublishError::ConsumerGone);
        }
        queue.tasks.push_back(task);
        self.ready.notify_all();
        Ok(())
    }

    fn apply_computed_state(&self, state: ComputedState) {
        {
            let mut latest = self.latest.lock();
            let previous = latest.take();
            // Keep the last known layout and ranges when this pass did not
            // recompute them.
            let merged = ComputedState {
                schema: state
                    .schema
                    .clone()
                    .or_else(|| previous.as_ref().and_then(|p| p.schema.clone())),
                table: Arc::clone(&state.table),
                filter_ranges: state
                    .filter_ranges
                    .clone()
                    .or_else(|| previous.and_then(|p| p.filter_ranges)),
            };
            *latest = Some(merged);
        }
        self.applied.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = &self.on_apply {
            hook(&state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Revisions;

    fn state(schema: Option<Arc<Schema>>) -> ComputedState {
        ComputedState {
            schema,
            table: Arc::new(ComputedTable::new(Arc::new(Schema::new()), Revisions::default(), true)),
            filter_ranges: None,
        }
    }

    #[test]
    fn tasks_run_only_when_pumped() {
        let consumer = Arc::new(QueuedConsumer::new());
        let ran = Arc::new(AtomicUsize::new(0));
        {
            let ran = ran.clone();
            consumer
                .schedule_on_owner_thread(Box::new(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }
        assert_eq!(consumer.pending(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(consumer.pump(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shut_down_consumer_rejects_tasks() {
        let consumer = QueuedConsumer::new();
        consumer.shut_down();
        let result = consumer.schedule_on_owner_thread(Box::new(|| {}));
        assert_eq!(result, Err(PublishError::ConsumerGone));
    }

    #[test]
    fn latest_keeps_the_last_schema() {
        let consumer = QueuedConsumer::new();
        let schema = Arc::new(Schema::new());
        consumer.apply_computed_state(state(Some(schema.clone())));
        consumer.apply_computed_state(state(None));
        let latest = consumer.latest().unwrap();
        assert!(Arc::ptr_eq(latest.schema.as_ref().unwrap(), &schema));
        assert_eq!(consumer.applied_count(), 2);
    }

    #[test]
    fn pump_timeout_gives_up() {
        let consumer = QueuedConsumer::new();
        assert_eq!(consumer.pump_timeout(Duration::from_millis(5)), 0);
    }
}
