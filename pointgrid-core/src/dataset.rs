//! Live dataset, rows, and snapshots.
//!
//! Rows are stored as `Arc<Vec<Arc<Row>>>` and mutated copy-on-write. Taking
//! a [`DatasetSnapshot`] clones two `Arc`s, so the data lock is held for a
//! constant time no matter how many rows there are, and any later mutation
//! of the live dataset copies the affected row (and the row vector) instead
//! of touching what the snapshot sees.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{DatasetError, SnapshotError};
use crate::formula::{CellResult, Value};
use crate::source::{ChangeObserver, RowDataSource, SubscriptionId};
use crate::table::ComputedTable;

/// Stable identity of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId(u64);

impl RowId {
    /// Generate a new unique row ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RowId {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a column holds native fields or user formulas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Native,
    Formula,
}

/// Ordered column metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    columns: IndexMap<String, ColumnKind>,
    /// For each column, its position among the native fields.
    native_slots: Vec<Option<usize>>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_columns<I, S>(columns: I) -> Result<Self, DatasetError>
    where
        I: IntoIterator<Item = (S, ColumnKind)>,
        S: Into<String>,
    {
        let mut schema = Self::new();
        for (name, kind) in columns {
            schema.push(name, kind)?;
        }
        Ok(schema)
    }

    /// Append a column. Returns its index.
    pub fn push(&mut self, name: impl Into<String>, kind: ColumnKind) -> Result<usize, DatasetError> {
        let name = name.into();
        if self.columns.contains_key(&name) {
            return Err(DatasetError::DuplicateColumn(name));
        }
        let slot = match kind {
            ColumnKind::Native => Some(self.native_count()),
            ColumnKind::Formula => None,
        };
        self.columns.insert(name, kind);
        self.native_slots.push(slot);
        Ok(self.columns.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn name(&self, col: usize) -> Option<&str> {
        self.columns.get_index(col).map(|(name, _)| name.as_str())
    }

    pub fn kind(&self, col: usize) -> Option<ColumnKind> {
        self.columns.get_index(col).map(|(_, kind)| *kind)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.get_index_of(name)
    }

    /// Index of a column by name, as a `DatasetError` when missing.
    pub fn require(&self, name: &str) -> Result<usize, DatasetError> {
        self.index_of(name)
            .ok_or_else(|| DatasetError::UnknownColumn(name.to_string()))
    }

    /// Position of a native column within each row's native fields.
    pub fn native_slot(&self, col: usize) -> Option<usize> {
        self.native_slots.get(col).copied().flatten()
    }

    pub fn native_count(&self) -> usize {
        self.native_slots.iter().filter(|s| s.is_some()).count()
    }

    /// Indices of the formula-bearing columns.
    pub fn formula_columns(&self) -> impl Iterator<Item = usize> + '_ {
        self.columns
            .values()
            .enumerate()
            .filter(|(_, kind)| **kind == ColumnKind::Formula)
            .map(|(i, _)| i)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, ColumnKind)> + '_ {
        self.columns.iter().map(|(name, kind)| (name.as_str(), *kind))
    }

    fn check_column(&self, col: usize) -> Result<ColumnKind, DatasetError> {
        self.kind(col).ok_or(DatasetError::ColumnOutOfRange {
            col,
            len: self.len(),
        })
    }
}

/// A user formula plus its last evaluation result.
///
/// The cached result is only trustworthy right after a recompute pass that
/// covered the cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormulaCell {
    formula: Option<String>,
    cached_result: Option<CellResult>,
}

impl FormulaCell {
    pub fn new(formula: impl Into<String>) -> Self {
        Self {
            formula: Some(formula.into()),
            cached_result: None,
        }
    }

    pub fn formula(&self) -> Option<&str> {
        self.formula.as_deref()
    }

    pub fn cached_result(&self) -> Option<&CellResult> {
        self.cached_result.as_ref()
    }

    pub fn set_formula(&mut self, formula: Option<String>) {
        self.formula = formula;
    }

    pub fn set_cached_result(&mut self, result: Option<CellResult>) {
        self.cached_result = result;
    }
}

/// One row of the dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    id: RowId,
    native: Vec<Value>,
    formulas: BTreeMap<usize, FormulaCell>,
}

/// Borrowed view of one cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CellContent<'a> {
    Native(&'a Value),
    Formula(Option<&'a FormulaCell>),
}

impl Row {
    pub fn new(native: Vec<Value>) -> Self {
        Self {
            id: RowId::new(),
            native,
            formulas: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> RowId {
        self.id
    }

    pub fn native(&self) -> &[Value] {
        &self.native
    }

    pub fn formula_cell(&self, col: usize) -> Option<&FormulaCell> {
        self.formulas.get(&col)
    }

    pub fn formula_cells(&self) -> impl Iterator<Item = (usize, &FormulaCell)> + '_ {
        self.formulas.iter().map(|(col, cell)| (*col, cell))
    }

    /// Look up a cell through the schema.
    pub fn cell<'a>(&'a self, schema: &Schema, col: usize) -> Option<CellContent<'a>> {
        match schema.kind(col)? {
            ColumnKind::Native => schema
                .native_slot(col)
                .and_then(|slot| self.native.get(slot))
                .map(CellContent::Native),
            ColumnKind::Formula => Some(CellContent::Formula(self.formulas.get(&col))),
        }
    }
}

/// Mutation counters of a dataset.
///
/// `values` moves on every producer edit, `structure` on every column or
/// row insertion/removal. Writing back computed results moves neither.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Revisions {
    pub values: u64,
    pub structure: u64,
}

/// Rows plus column metadata.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    schema: Arc<Schema>,
    rows: Arc<Vec<Arc<Row>>>,
    revisions: Revisions,
}

impl Dataset {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema: Arc::new(schema),
            rows: Arc::new(Vec::new()),
            revisions: Revisions::default(),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<&Row> {
        self.rows.get(index).map(|r| r.as_ref())
    }

    pub fn revisions(&self) -> Revisions {
        self.revisions
    }

    /// Copy for a recompute pass. Constant time.
    pub fn snapshot(&self) -> DatasetSnapshot {
        DatasetSnapshot {
            schema: Arc::clone(&self.schema),
            rows: Arc::clone(&self.rows),
            revisions: self.revisions,
        }
    }

    fn row_mut(&mut self, index: usize) -> Result<&mut Row, DatasetError> {
        let len = self.rows.len();
        let rows = Arc::make_mut(&mut self.rows);
        rows.get_mut(index)
            .map(Arc::make_mut)
            .ok_or(DatasetError::RowOutOfRange { row: index, len })
    }

    /// Append a row with the given native fields.
    pub fn push_row(&mut self, native: Vec<Value>) -> Result<RowId, DatasetError> {
        let expected = self.schema.native_count();
        if native.len() != expected {
            return Err(DatasetError::FieldCount {
                got: native.len(),
                expected,
            });
        }
        let row = Row::new(native);
        let id = row.id;
        Arc::make_mut(&mut self.rows).push(Arc::new(row));
        self.revisions.structure += 1;
        Ok(id)
    }

    pub fn remove_row(&mut self, index: usize) -> Result<RowId, DatasetError> {
        if index >= self.rows.len() {
            return Err(DatasetError::RowOutOfRange {
                row: index,
                len: self.rows.len(),
            });
        }
        let removed = Arc::make_mut(&mut self.rows).remove(index);
        self.revisions.structure += 1;
        Ok(removed.id)
    }

    /// Append a column. Existing rows get an empty field if it is native.
    pub fn add_column(&mut self, name: impl Into<String>, kind: ColumnKind) -> Result<usize, DatasetError> {
        let col = Arc::make_mut(&mut self.schema).push(name, kind)?;
        if kind == ColumnKind::Native {
            for row in Arc::make_mut(&mut self.rows).iter_mut() {
                Arc::make_mut(row).native.push(Value::Empty);
            }
        }
        self.revisions.structure += 1;
        Ok(col)
    }

    /// Set a native field.
    pub fn set_value(&mut self, row: usize, col: usize, value: Value) -> Result<(), DatasetError> {
        let slot = match self.schema.check_column(col)? {
            ColumnKind::Native => self.schema.native_slot(col),
            ColumnKind::Formula => None,
        }
        .ok_or_else(|| DatasetError::NotNativeColumn(self.column_name(col)))?;
        let target = self.row_mut(row)?;
        if target.native[slot] != value {
            target.native[slot] = value;
            self.revisions.values += 1;
        }
        Ok(())
    }

    /// Set the formula text of a formula cell, creating the cell if needed.
    pub fn set_formula(&mut self, row: usize, col: usize, text: &str) -> Result<(), DatasetError> {
        if self.schema.check_column(col)? != ColumnKind::Formula {
            return Err(DatasetError::NotFormulaColumn(self.column_name(col)));
        }
        let target = self.row_mut(row)?;
        let cell = target.formulas.entry(col).or_default();
        if cell.formula() != Some(text) {
            cell.set_formula(Some(text.to_string()));
            self.revisions.values += 1;
        }
        Ok(())
    }

    /// Remove the formula from a cell.
    pub fn clear_formula(&mut self, row: usize, col: usize) -> Result<(), DatasetError> {
        if self.schema.check_column(col)? != ColumnKind::Formula {
            return Err(DatasetError::NotFormulaColumn(self.column_name(col)));
        }
        let target = self.row_mut(row)?;
        if target.formulas.remove(&col).is_some() {
            self.revisions.values += 1;
        }
        Ok(())
    }

    /// Write computed results into formula cells of rows untouched since
    /// the table's snapshot.
    pub fn store_results(&mut self, table: &ComputedTable) -> usize {
        if !Arc::ptr_eq(&self.schema, table.schema()) {
            return 0;
        }
        let mut written = 0;
        for (index, computed) in table.rows().iter().enumerate() {
            let unchanged = self
                .rows
                .get(index)
                .is_some_and(|live| Arc::ptr_eq(live, computed.source()));
            if !unchanged {
                continue;
            }
            let stale: Vec<(usize, CellResult)> = self.schema
                .formula_columns()
                .filter_map(|col| {
                    let result = computed.cell(col)?;
                    let cell = computed.source().formula_cell(col)?;
                    (cell.cached_result() != Some(result)).then(|| (col, result.clone()))
                })
                .collect();
            if stale.is_empty() {
                continue;
            }
            let rows = Arc::make_mut(&mut self.rows);
            let row = Arc::make_mut(&mut rows[index]);
            for (col, result) in stale {
                if let Some(cell) = row.formulas.get_mut(&col) {
                    cell.set_cached_result(Some(result));
                    written += 1;
                }
            }
        }
        written
    }

    fn column_name(&self, col: usize) -> String {
        self.schema.name(col).unwrap_or_default().to_string()
    }
}

/// Immutable point-in-time copy of a dataset.
#[derive(Debug, Clone)]
pub struct DatasetSnapshot {
    schema: Arc<Schema>,
    rows: Arc<Vec<Arc<Row>>>,
    revisions: Revisions,
}

impl DatasetSnapshot {
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn rows(&self) -> &[Arc<Row>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn revisions(&self) -> Revisions {
        self.revisions
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<CellContent<'_>> {
        self.rows.get(row)?.cell(&self.schema, col)
    }
}

/// What a mutation did, used to pick the notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    None,
    Values,
    Structure,
}

/// A thread-safe dataset that notifies observers after each mutation.
///
/// This is the stock [`RowDataSource`]: producers on any thread mutate it,
/// views subscribe to it.
pub struct SharedDataset {
    data: RwLock<Dataset>,
    listeners: RwLock<Vec<(SubscriptionId, Arc<dyn ChangeObserver>)>>,
}

impl SharedDataset {
    pub fn new(schema: Schema) -> Self {
        Self {
            data: RwLock::new(Dataset::new(schema)),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Read the live dataset under the data lock.
    pub fn read<R>(&self, f: impl FnOnce(&Dataset) -> R) -> R {
        f(&self.data.read())
    }

    /// Apply several mutations under one lock acquisition.
    ///
    /// Observers get a single notification afterwards: structural if the
    /// schema or row set changed, otherwise a value change if anything
    /// changed at all.
    pub fn batch<R>(&self, f: impl FnOnce(&mut Dataset) -> R) -> R {
        let (result, change) = {
            let mut data = self.data.write();
            let before = data.revisions();
            let result = f(&mut data);
            let after = data.revisions();
            let change = if after.structure != before.structure {
                Change::Structure
            } else if after.values != before.values {
                Change::Values
            } else {
                Change::None
            };
            (result, change)
        };
        self.notify(change);
        result
    }

    pub fn push_row(&self, native: Vec<Value>) -> Result<RowId, DatasetError> {
        self.batch(|d| d.push_row(native))
    }

    pub fn remove_row(&self, index: usize) -> Result<RowId, DatasetError> {
        self.batch(|d| d.remove_row(index))
    }

    pub fn add_column(&self, name: impl Into<String>, kind: ColumnKind) -> Result<usize, DatasetError> {
        self.batch(|d| d.add_column(name, kind))
    }

    pub fn set_value(&self, row: usize, col: usize, value: Value) -> Result<(), DatasetError> {
        self.batch(|d| d.set_value(row, col, value))
    }

    /// Set a native field addressed by column name.
    pub fn set_value_named(&self, row: usize, column: &str, value: Value) -> Result<(), DatasetError> {
        self.batch(|d| {
            let col = d.schema().require(column)?;
            d.set_value(row, col, value)
        })
    }

    /// Set a formula addressed by column name.
    pub fn set_formula_named(&self, row: usize, column: &str, text: &str) -> Result<(), DatasetError> {
        self.batch(|d| {
            let col = d.schema().require(column)?;
            d.set_formula(row, col, text)
        })
    }

    pub fn clear_formula(&self, row: usize, col: usize) -> Result<(), DatasetError> {
        self.batch(|d| d.clear_formula(row, col))
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Tell observers that values changed without going through a mutator.
    pub fn fire_value_changed(&self) {
        self.notify(Change::Values);
    }

    /// Tell observers that the table layout may have changed.
    pub fn fire_structure_changed(&self) {
        self.notify(Change::Structure);
    }

    fn notify(&self, change: Change) {
        if change == Change::None {
            return;
        }
        // Never call out while holding the listener lock.
        let listeners: Vec<Arc<dyn ChangeObserver>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        trace!(?change, listeners = listeners.len(), "dataset changed");
        for observer in listeners {
            match change {
                Change::Structure => observer.on_structure_changed(),
                Change::Values => observer.on_value_changed(false),
                Change::None => {}
            }
        }
    }
}

impl RowDataSource for SharedDataset {
    fn add_listener(&self, observer: Arc<dyn ChangeObserver>) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.listeners.write().push((id, observer));
        id
    }

    fn remove_listener(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn snapshot(&self) -> Result<DatasetSnapshot, SnapshotError> {
        Ok(self.data.read().snapshot())
    }

    fn size(&self) -> usize {
        self.len()
    }

    fn revisions(&self) -> Revisions {
        self.data.read().revisions()
    }

    fn set_formula(&self, row: usize, col: usize, text: &str) -> Result<(), DatasetError> {
        self.batch(|d| d.set_formula(row, col, text))
    }

    fn store_results(&self, table: &ComputedTable) -> usize {
        let written = self.data.write().store_results(table);
        if written > 0 {
            self.notify(Change::Values);
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::from_columns([
            ("x", ColumnKind::Native),
            ("userCell1", ColumnKind::Formula),
            ("score", ColumnKind::Native),
        ])
        .unwrap()
    }

    #[test]
    fn schema_tracks_native_slots() {
        let schema = schema();
        assert_eq!(schema.native_slot(0), Some(0));
        assert_eq!(schema.native_slot(1), None);
        assert_eq!(schema.native_slot(2), Some(1));
        assert_eq!(schema.formula_columns().collect::<Vec<_>>(), vec![1]);
        assert_eq!(schema.index_of("score"), Some(2));
        assert!(matches!(
            Schema::from_columns([("a", ColumnKind::Native), ("a", ColumnKind::Formula)]),
            Err(DatasetError::DuplicateColumn(_))
        ));
    }

    #[test]
    fn snapshot_is_isolated_from_later_edits() {
        let mut data = Dataset::new(schema());
        data.push_row(vec![1.0.into(), 2.0.into()]).unwrap();
        data.set_formula(0, 1, "=A1+1").unwrap();

        let snapshot = data.snapshot();
        data.set_value(0, 0, 10.0.into()).unwrap();
        data.set_formula(0, 1, "=A1*2").unwrap();
        data.push_row(vec![3.0.into(), 4.0.into()]).unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.cell(0, 0), Some(CellContent::Native(&Value::Number(1.0))));
        match snapshot.cell(0, 1) {
            Some(CellContent::Formula(Some(cell))) => assert_eq!(cell.formula(), Some("=A1+1")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(data.len(), 2);
        assert_eq!(data.row(0).unwrap().native()[0], Value::Number(10.0));
    }

    #[test]
    fn revisions_separate_values_and_structure() {
        let mut data = Dataset::new(schema());
        data.push_row(vec![1.0.into(), 2.0.into()]).unwrap();
        let after_push = data.revisions();
        assert_eq!(after_push.structure, 1);

        data.set_value(0, 2, 5.0.into()).unwrap();
        assert_eq!(data.revisions().values, after_push.values + 1);

        // Writing the same value again is not a change.
        data.set_value(0, 2, 5.0.into()).unwrap();
        assert_eq!(data.revisions().values, after_push.values + 1);
        assert_eq!(data.revisions().structure, 1);
    }

    #[test]
    fn column_kind_is_enforced() {
        let mut data = Dataset::new(schema());
        data.push_row(vec![1.0.into(), 2.0.into()]).unwrap();
        assert!(matches!(data.set_formula(0, 0, "=1"), Err(DatasetError::NotFormulaColumn(_))));
        assert!(matches!(data.set_value(0, 1, 1.0.into()), Err(DatasetError::NotNativeColumn(_))));
        assert!(matches!(data.set_value(3, 0, 1.0.into()), Err(DatasetError::RowOutOfRange { .. })));
        assert!(matches!(data.set_value(0, 9, 1.0.into()), Err(DatasetError::ColumnOutOfRange { .. })));
        assert!(matches!(data.push_row(vec![]), Err(DatasetError::FieldCount { .. })));
    }

    #[test]
    fn add_native_column_extends_rows() {
        let mut data = Dataset::new(schema());
        data.push_row(vec![1.0.into(), 2.0.into()]).unwrap();
        let col = data.add_column("z", ColumnKind::Native).unwrap();
        assert_eq!(col, 3);
        assert_eq!(data.row(0).unwrap().native().len(), 3);
        assert_eq!(data.row(0).unwrap().cell(data.schema(), 3), Some(CellContent::Native(&Value::Empty)));
    }

    #[test]
    fn batch_fires_one_notification() {
        use std::sync::atomic::AtomicUsize;

        struct Counter {
            values: AtomicUsize,
            structure: AtomicUsize,
        }
        impl ChangeObserver for Counter {
            fn on_value_changed(&self, _still_changing: bool) {
                self.values.fetch_add(1, Ordering::SeqCst);
            }
            fn on_structure_changed(&self) {
                self.structure.fetch_add(1, Ordering::SeqCst);
            }
        }

        let shared = SharedDataset::new(schema());
        let counter = Arc::new(Counter {
            values: AtomicUsize::new(0),
            structure: AtomicUsize::new(0),
        });
        shared.add_listener(counter.clone());

        shared.batch(|d| {
            d.push_row(vec![1.0.into(), 2.0.into()]).unwrap();
            d.push_row(vec![3.0.into(), 4.0.into()]).unwrap();
        });
        assert_eq!(counter.structure.load(Ordering::SeqCst), 1);

        shared.batch(|d| {
            d.set_value(0, 0, 7.0.into()).unwrap();
            d.set_formula(1, 1, "=A1").unwrap();
        });
        assert_eq!(counter.values.load(Ordering::SeqCst), 1);

        // No-op edit: no notification.
        shared.set_value(0, 0, 7.0.into()).unwrap();
        assert_eq!(counter.values.load(Ordering::SeqCst), 1);
    }
}
