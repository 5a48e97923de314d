//! Recompute Worker
//!
//! One background thread per view. It sleeps on the dirty tracker and, for
//! every wake-up, runs one pass:
//!
//! 1. **Snapshot**: copy the live dataset (constant-time under the data lock)
//! 2. **Rebuild**: on structural change, reset the engine and adopt the new
//!    schema, silenced
//! 3. **Recompute**: push the snapshot into the engine and recalculate
//! 4. **Write back**: store formula results in the live cells, silenced
//! 5. **Publish**: hand the results to the presentation consumer
//!
//! A pass that fails (snapshot error, publish error, panic) is logged and
//! retried after a short back-off. Only closing the view ends the loop. A
//! pass that sees the view closed stops before writing back or publishing.
//!
//! The busy indicator follows the newest pass. Applying an older pass late
//! leaves it alone.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, debug_span, info, warn};

use super::busy::{BusyIndicator, BusyState};
use super::dirty::{DirtyTracker, Wakeup};
use super::presentation::{ComputedState, PresentationConsumer};
use super::silence::SilenceCounter;
use crate::config::ViewConfig;
use crate::dataset::{Revisions, Schema};
use crate::engine::FormulaEngine;
use crate::error::PassError;
use crate::filter::{compute_filter_ranges, FilterRange};
use crate::source::RowDataSource;
use crate::table::ComputedTable;

/// Where the worker is in its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    WaitingForSignal,
    Snapshotting,
    Recomputing,
    Publishing,
    Closed,
}

/// Counters kept by the worker.
#[derive(Debug, Default)]
pub struct WorkerStats {
    wakeups: AtomicU64,
    passes: AtomicU64,
    failures: AtomicU64,
    publications: AtomicU64,
}

/// Point-in-time copy of [`WorkerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Times the worker woke up with work to do.
    pub wakeups: u64,
    /// Passes that ran to completion.
    pub passes: u64,
    /// Passes that failed and were retried.
    pub failures: u64,
    /// Results applied by the presentation consumer.
    pub publications: u64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            wakeups: self.wakeups.load(Ordering::SeqCst),
            passes: self.passes.load(Ordering::SeqCst),
            failures: self.failures.load(Ordering::SeqCst),
            publications: self.publications.load(Ordering::SeqCst),
        }
    }
}

/// State shared between the worker, the view handle, and publish tasks.
pub(crate) struct ViewShared {
    pub source: Arc<dyn RowDataSource>,
    pub consumer: Arc<dyn PresentationConsumer>,
    pub config: ViewConfig,
    pub tracker: Arc<DirtyTracker>,
    pub silence: SilenceCounter,
    pub busy: BusyIndicator,
    pub stats: WorkerStats,
    pub state: Mutex<WorkerState>,
    /// Latest table computed by the worker, readable from any thread.
    pub latest: RwLock<Option<Arc<ComputedTable>>>,
    /// Explicit filter resets requested so far.
    pub filter_resets: AtomicU64,
    /// Pass that currently drives the busy indicator.
    pub busy_owner: Mutex<u64>,
    /// Revisions of the most recent snapshot.
    pub seen: Mutex<Revisions>,
}

impl ViewShared {
    pub fn is_closed(&self) -> bool {
        self.tracker.is_closed()
    }

    fn set_state(&self, state: WorkerState) {
        let mut current = self.state.lock();
        if *current != WorkerState::Closed {
            *current = state;
        }
    }

    /// Ask the next pass to recompute filter ranges.
    pub fn request_filter_reset(&self) {
        self.filter_resets.fetch_add(1, Ordering::SeqCst);
        self.tracker.mark_dirty(false);
    }

    /// Hand the busy indicator to `pass` and show it computing.
    fn begin_busy(&self, pass: u64) {
        let mut owner = self.busy_owner.lock();
        *owner = pass;
        self.busy.set_state(BusyState::Computing);
    }

    /// Move the busy indicator on, unless a newer pass has taken it over.
    fn set_busy(&self, pass: u64, state: BusyState) {
        let owner = self.busy_owner.lock();
        if *owner == pass {
            self.busy.set_state(state);
        }
    }
}

/// The worker's private state. Lives on the worker thread only.
pub(crate) struct Worker {
    shared: Arc<ViewShared>,
    engine: FormulaEngine,
    schema: Option<Arc<Schema>>,
    pass: u64,
    /// Filter resets already honoured by a published pass.
    filter_resets_served: u64,
}

impl Worker {
    pub fn new(shared: Arc<ViewShared>) -> Self {
        Self {
            shared,
            engine: FormulaEngine::new(),
            schema: None,
            pass: 0,
            filter_resets_served: 0,
        }
    }

    /// Run until the view closes.
    pub fn run(mut self) {
        debug!("recompute worker started");
        loop {
            self.shared.set_state(WorkerState::WaitingForSignal);
            let structural = match self.shared.tracker.wait() {
                Wakeup::Closed => break,
                Wakeup::Recompute { structural } => structural,
            };
            self.shared.stats.wakeups.fetch_add(1, Ordering::SeqCst);
            self.pass += 1;

            let span = debug_span!("recompute_pass", pass = self.pass);
            let _enter = span.enter();

            let outcome = catch_unwind(AssertUnwindSafe(|| self.run_pass(structural)));
            match outcome {
                Ok(Ok(())) => {
                    self.shared.stats.passes.fetch_add(1, Ordering::SeqCst);
                }
                Ok(Err(error)) => self.recover(error, structural),
                Err(payload) => {
                    // The engine may be half-updated; rebuild it from scratch.
                    self.engine.reset();
                    self.schema = None;
                    self.recover(PassError::Panicked(panic_message(payload.as_ref())), structural);
                }
            }
            self.shared.tracker.finish_pass();
        }
        self.shared.set_state(WorkerState::Closed);
        debug!(passes = self.pass, "recompute worker stopped");
    }

    fn recover(&self, error: PassError, structural: bool) {
        self.shared.stats.failures.fetch_add(1, Ordering::SeqCst);
        self.shared.set_busy(self.pass, BusyState::Idle);
        if self.shared.is_closed() {
            debug!(%error, "pass failed while closing");
            return;
        }
        warn!(%error, structural, "recompute pass failed, retrying");
        if self
            .shared
            .tracker
            .sleep_unless_closed(self.shared.config.retry_delay())
        {
            self.shared.tracker.mark_dirty(structural);
        }
    }

    fn run_pass(&mut self, structural: bool) -> Result<(), PassError> {
        let shared = Arc::clone(&self.shared);
        let started = Instant::now();

        shared.set_state(WorkerState::Snapshotting);
        shared.begin_busy(self.pass);
        let snapshot = shared.source.snapshot()?;
        *shared.seen.lock() = snapshot.revisions();
        if shared.is_closed() {
            return Ok(());
        }

        shared.set_state(WorkerState::Recomputing);

        let schema_changed = self
            .schema
            .as_ref()
            .map_or(true, |s| !Arc::ptr_eq(s, snapshot.schema()));
        let rebuild = structural || schema_changed;
        if rebuild {
            debug!(
                rows = snapshot.len(),
                columns = snapshot.schema().len(),
                "rebuilding table structure"
            );
            shared.silence.with_silence(|| {
                self.engine.reset();
                self.schema = Some(Arc::clone(snapshot.schema()));
            });
        }

        let (table, stats) = self
            .engine
            .run_pass(&snapshot, shared.config.formula_row_ceiling);
        let table = Arc::new(table);

        let filter_resets = shared.filter_resets.load(Ordering::SeqCst);
        let filter_ranges = if rebuild || filter_resets != self.filter_resets_served {
            Some(Arc::new(self.filter_ranges(&table)))
        } else {
            None
        };

        // Closing while recomputing: nothing reaches the source or the consumer.
        if shared.is_closed() {
            return Ok(());
        }
        if table.formulas_evaluated() {
            let written = shared
                .silence
                .with_silence(|| shared.source.store_results(&table));
            debug!(written, "cached results stored");
        }

        *shared.latest.write() = Some(Arc::clone(&table));

        shared.set_state(WorkerState::Publishing);
        if shared.is_closed() {
            return Ok(());
        }
        shared.set_busy(self.pass, BusyState::Applying);
        let state = ComputedState {
            schema: rebuild.then(|| Arc::clone(snapshot.schema())),
            table,
            filter_ranges,
        };
        self.publish(state)?;
        self.filter_resets_served = filter_resets;

        self.check_for_missed_updates(snapshot.revisions());
        debug!(
            structural = rebuild,
            rows = snapshot.len(),
            evaluated = stats.map(|s| s.evaluated),
            elapsed_us = started.elapsed().as_micros() as u64,
            "recompute pass finished"
        );
        Ok(())
    }

    fn filter_ranges(&self, table: &ComputedTable) -> Vec<FilterRange> {
        let config = &self.shared.config;
        match config.filter_row_ceiling {
            Some(ceiling) if table.len() > ceiling => {
                info!(rows = table.len(), ceiling, "not updating filter ranges because there are too many rows");
                Vec::new()
            }
            _ => compute_filter_ranges(table, config.histogram_buckets),
        }
    }

    fn publish(&self, state: ComputedState) -> Result<(), PassError> {
        let shared = Arc::clone(&self.shared);
        let pass = self.pass;
        let task = Box::new(move || {
            if shared.is_closed() {
                return;
            }
            shared
                .silence
                .with_silence(|| shared.consumer.apply_computed_state(state));
            shared.stats.publications.fetch_add(1, Ordering::SeqCst);
            shared.set_busy(pass, BusyState::Idle);
            // Edits made while the consumer was silenced were dropped.
            let seen = *shared.seen.lock();
            let live = shared.source.revisions();
            if live != seen {
                shared.tracker.mark_dirty(live.structure != seen.structure);
            }
        });

        match self.shared.consumer.schedule_on_owner_thread(task) {
            Ok(()) => Ok(()),
            Err(e) if self.shared.is_closed() => {
                debug!(error = %e, "publish skipped, view is closing");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Re-mark the view dirty if the dataset moved on since the snapshot.
    ///
    /// Producer notifications that arrived while this pass was silenced
    /// were dropped; the revision counters still record them.
    fn check_for_missed_updates(&self, seen: Revisions) {
        let live = self.shared.source.revisions();
        if live != seen {
            debug!(?seen, ?live, "dataset changed during pass");
            self.shared
                .tracker
                .mark_dirty(live.structure != seen.structure);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_messages_are_extracted() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[test]
    fn stats_snapshot_reads_counters() {
        let stats = WorkerStats::default();
        stats.passes.fetch_add(2, Ordering::SeqCst);
        stats.failures.fetch_add(1, Ordering::SeqCst);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.passes, 2);
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.wakeups, 0);
    }
}
