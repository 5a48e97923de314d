//! Results of one recompute pass.

use std::sync::Arc;

use crate::dataset::{Revisions, Row, RowId, Schema};
use crate::formula::{CellResult, Value};

/// One computed row: the snapshot row it came from plus a result per column.
#[derive(Debug, Clone)]
pub struct ComputedRow {
    source: Arc<Row>,
    cells: Vec<CellResult>,
}

impl ComputedRow {
    pub fn new(source: Arc<Row>, cells: Vec<CellResult>) -> Self {
        Self { source, cells }
    }

    pub fn id(&self) -> RowId {
        self.source.id()
    }

    /// The snapshot row these results were computed from.
    pub fn source(&self) -> &Arc<Row> {
        &self.source
    }

    pub fn cell(&self, col: usize) -> Option<&CellResult> {
        self.cells.get(col)
    }

    pub fn cells(&self) -> &[CellResult] {
        &self.cells
    }
}

/// Every visible value of a snapshot, with formula cells evaluated.
///
/// Tables are immutable once built and published behind an `Arc`, so a
/// consumer always sees one pass's results as a whole.
#[derive(Debug, Clone, Default)]
pub struct ComputedTable {
    schema: Arc<Schema>,
    rows: Vec<ComputedRow>,
    revisions: Revisions,
    formulas_evaluated: bool,
}

impl ComputedTable {
    pub fn new(schema: Arc<Schema>, revisions: Revisions, formulas_evaluated: bool) -> Self {
        Self {
            schema,
            rows: Vec::new(),
            revisions,
            formulas_evaluated,
        }
    }

    pub fn with_capacity(
        schema: Arc<Schema>,
        revisions: Revisions,
        formulas_evaluated: bool,
        rows: usize,
    ) -> Self {
        Self {
            rows: Vec::with_capacity(rows),
            ..Self::new(schema, revisions, formulas_evaluated)
        }
    }

    pub fn push_row(&mut self, row: ComputedRow) {
        self.rows.push(row);
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn rows(&self) -> &[ComputedRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Revisions of the snapshot this table was computed from.
    pub fn revisions(&self) -> Revisions {
        self.revisions
    }

    /// False when the pass skipped formula evaluation; formula cells then
    /// hold whatever result was cached in the snapshot.
    pub fn formulas_evaluated(&self) -> bool {
        self.formulas_evaluated
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&CellResult> {
        self.rows.get(row)?.cell(col)
    }

    /// Values of one column; errors read as `None`.
    pub fn column(&self, col: usize) -> impl Iterator<Item = Option<&Value>> + '_ {
        self.rows
            .iter()
            .map(move |row| row.cell(col).and_then(|cell| cell.as_ref().ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ColumnKind;
    use crate::formula::EvalError;

    #[test]
    fn lookup_by_row_and_column() {
        let schema = Arc::new(
            Schema::from_columns([("x", ColumnKind::Native), ("f", ColumnKind::Formula)]).unwrap(),
        );
        let mut table = ComputedTable::new(schema, Revisions::default(), true);
        let row = Arc::new(Row::new(vec![1.0.into()]));
        table.push_row(ComputedRow::new(row.clone(), vec![Ok(1.0.into()), Err(EvalError::DivZero)]));

        assert_eq!(table.len(), 1);
        assert_eq!(table.get(0, 0), Some(&Ok(Value::Number(1.0))));
        assert_eq!(table.get(0, 1), Some(&Err(EvalError::DivZero)));
        assert_eq!(table.get(1, 0), None);
        assert_eq!(table.rows()[0].id(), row.id());
        assert_eq!(table.column(1).collect::<Vec<_>>(), vec![None]);
    }
}
