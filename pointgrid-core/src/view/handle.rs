//! Opening, driving, and closing a view.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use super::busy::{BusyIndicator, BusyState};
use super::dirty::DirtyTracker;
use super::observer::ViewObserver;
use super::presentation::PresentationConsumer;
use super::silence::SilenceCounter;
use super::worker::{StatsSnapshot, ViewShared, Worker, WorkerState, WorkerStats};
use crate::config::ViewConfig;
use crate::dataset::{CellContent, Revisions};
use crate::error::{DatasetError, ViewError};
use crate::formula::{shift_formula, CellResult, Value};
use crate::source::{RowDataSource, Subscription};

/// Open a live view over `source`.
///
/// Subscribes to the source, starts the recompute worker and the busy
/// pulse, and schedules an initial structural pass.
pub fn open_view(
    source: Arc<dyn RowDataSource>,
    consumer: Arc<dyn PresentationConsumer>,
    config: ViewConfig,
) -> Result<ViewHandle, ViewError> {
    config.validate()?;

    let tracker = Arc::new(DirtyTracker::new());
    let silence = SilenceCounter::new();
    let busy = BusyIndicator::new(config.pulse_interval(), config.pulse_initial_delay());
    busy.spawn_pulse(format!("{}-pulse", config.worker_thread_name))?;

    let shared = Arc::new(ViewShared {
        source: Arc::clone(&source),
        consumer,
        config,
        tracker: Arc::clone(&tracker),
        silence: silence.clone(),
        busy,
        stats: WorkerStats::default(),
        state: Mutex::new(WorkerState::WaitingForSignal),
        latest: RwLock::new(None),
        filter_resets: AtomicU64::new(0),
        busy_owner: Mutex::new(0),
        seen: Mutex::new(Revisions::default()),
    });

    let observer = Arc::new(ViewObserver::new(tracker, silence));
    let subscription = Subscription::register(source, observer.clone());

    let worker = Worker::new(Arc::clone(&shared));
    let thread = match thread::Builder::new()
        .name(shared.config.worker_thread_name.clone())
        .spawn(move || worker.run())
    {
        Ok(thread) => thread,
        Err(e) => {
            shared.busy.close();
            return Err(ViewError::Spawn(e));
        }
    };

    shared.tracker.mark_dirty(true);
    info!(thread = %shared.config.worker_thread_name, "view opened");

    Ok(ViewHandle {
        shared,
        observer,
        subscription: Mutex::new(Some(subscription)),
        thread: Mutex::new(Some(thread)),
    })
}

/// A live view. Closing it (explicitly or by dropping) stops the worker
/// and unsubscribes from the source.
pub struct ViewHandle {
    shared: Arc<ViewShared>,
    observer: Arc<ViewObserver>,
    subscription: Mutex<Option<Subscription>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ViewHandle {
    /// Stop the worker and release the subscription.
    ///
    /// A pass in flight is abandoned at its next checkpoint and nothing is
    /// published after this returns. Safe to call more than once, and from
    /// the worker or consumer thread.
    pub fn close(&self) {
        if !self.shared.is_closed() {
            debug!("closing view");
        }
        self.shared.tracker.close();
        if let Some(mut subscription) = self.subscription.lock().take() {
            subscription.release();
        }
        let thread = self.thread.lock().take();
        if let Some(thread) = thread {
            if thread.thread().id() != thread::current().id() {
                let _ = thread.join();
            }
        }
        self.shared.busy.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// No pass is running and none is pending. Results of the last pass
    /// may still be queued at the consumer.
    pub fn is_settled(&self) -> bool {
        self.shared.tracker.is_settled()
    }

    /// Ask for a recompute, as if the dataset had notified a change.
    pub fn request_recompute(&self, structural: bool) -> Result<(), ViewError> {
        self.ensure_open()?;
        self.shared.tracker.mark_dirty(structural);
        Ok(())
    }

    /// Replace the formula of a cell. The recompute follows from the
    /// source's change notification.
    pub fn set_formula(&self, row: usize, col: usize, text: &str) -> Result<(), ViewError> {
        self.ensure_open()?;
        self.shared.source.set_formula(row, col, text)?;
        Ok(())
    }

    /// Latest computed value of a cell.
    ///
    /// Cells outside the last computed table, and formula cells that have
    /// not been computed yet, read as `Empty`.
    pub fn evaluation_result(&self, row: usize, col: usize) -> CellResult {
        self.shared
            .latest
            .read()
            .as_ref()
            .and_then(|table| table.get(row, col).cloned())
            .unwrap_or(Ok(Value::Empty))
    }

    /// Copy the formula at `(source_row, col)` to every other row of the
    /// column, shifting relative row references by the row distance.
    ///
    /// Returns the number of rows written.
    pub fn extend_formula_to_column(&self, source_row: usize, col: usize) -> Result<usize, ViewError> {
        self.ensure_open()?;
        let snapshot = self.shared.source.snapshot()?;
        let text = match snapshot.cell(source_row, col) {
            Some(CellContent::Formula(Some(cell))) => match cell.formula() {
                Some(text) => text.to_string(),
                None => return Ok(0),
            },
            Some(CellContent::Formula(None)) => return Ok(0),
            Some(CellContent::Native(_)) => {
                let name = snapshot.schema().name(col).unwrap_or_default().to_string();
                return Err(DatasetError::NotFormulaColumn(name).into());
            }
            None => {
                return Err(DatasetError::RowOutOfRange {
                    row: source_row,
                    len: snapshot.len(),
                }
                .into())
            }
        };

        let written = self.shared.silence.with_silence(|| {
            let mut written = 0;
            for row in (0..snapshot.len()).filter(|&r| r != source_row) {
                let distance = row as i64 - source_row as i64;
                // Unparsable formulas are copied as they are.
                let shifted = shift_formula(&text, distance, 0).unwrap_or_else(|_| text.clone());
                self.shared.source.set_formula(row, col, &shifted)?;
                written += 1;
            }
            Ok::<_, DatasetError>(written)
        })?;

        self.shared.request_filter_reset();
        debug!(col, source_row, written, "formula extended to column");
        Ok(written)
    }

    /// Recompute the filter ranges from scratch on the next pass.
    pub fn reset_filter_ranges(&self) -> Result<(), ViewError> {
        self.ensure_open()?;
        self.shared.request_filter_reset();
        Ok(())
    }

    /// The user is adjusting a filter. Dropped while silenced.
    pub fn filter_adjusted(&self) -> bool {
        self.observer.filter_adjusted()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn worker_state(&self) -> WorkerState {
        *self.shared.state.lock()
    }

    pub fn busy_state(&self) -> BusyState {
        self.shared.busy.state()
    }

    pub fn busy(&self) -> &BusyIndicator {
        &self.shared.busy
    }

    pub fn silence(&self) -> &SilenceCounter {
        &self.shared.silence
    }

    pub fn config(&self) -> &ViewConfig {
        &self.shared.config
    }

    fn ensure_open(&self) -> Result<(), ViewError> {
        if self.shared.is_closed() {
            Err(ViewError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Drop for ViewHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Close a view. Same as [`ViewHandle::close`] followed by a drop.
pub fn close_view(handle: ViewHandle) {
    handle.close();
}
