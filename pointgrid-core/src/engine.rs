//! Formula Engine
//!
//! Coordinate-addressed evaluator sitting on top of the dependency graph.
//! Every cell of the view gets pushed in (raw value or formula text) and
//! results get pulled out by coordinate.
//!
//! Pushing is idempotent: re-syncing a cell with the same content is a
//! no-op, so a pass that pushes every cell of an unchanged dataset
//! evaluates nothing. Failures are values: a formula that does not parse,
//! divides by zero, or sits on a reference cycle gets an error result and
//! nothing else is affected.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use tracing::{debug, info};

use crate::dataset::{CellContent, DatasetSnapshot};
use crate::formula::{evaluate, is_formula, parse, CellRef, CellResult, EvalContext, EvalError, Expr, Value};
use crate::graph::{CellRole, Freshness, UpdateScheduler};
use crate::table::{ComputedRow, ComputedTable};

/// Largest range a single formula may reference.
pub const MAX_RANGE_CELLS: usize = 1 << 20;

/// What was pushed into a cell.
#[derive(Debug, Clone)]
enum CellInput {
    Literal(Value),
    Formula {
        text: String,
        parsed: Result<Expr, EvalError>,
    },
}

/// Counters for one [`FormulaEngine::recalculate`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecalcStats {
    /// Formulas evaluated.
    pub evaluated: usize,
    /// Formulas reached by propagation whose inputs turned out unchanged.
    pub skipped: usize,
    /// Formulas on or behind a reference cycle.
    pub cyclic: usize,
}

/// Read-only view of the grid handed to the evaluator.
struct Grid<'a> {
    inputs: &'a HashMap<CellRef, CellInput>,
    results: &'a HashMap<CellRef, CellResult>,
    row_count: usize,
}

impl EvalContext for Grid<'_> {
    fn cell_value(&self, cell: CellRef) -> CellResult {
        match self.inputs.get(&cell) {
            Some(CellInput::Literal(value)) => Ok(value.clone()),
            Some(CellInput::Formula { .. }) => self
                .results
                .get(&cell)
                .cloned()
                .unwrap_or(Ok(Value::Empty)),
            None => Ok(Value::Empty),
        }
    }

    fn row_count(&self) -> usize {
        self.row_count
    }
}

/// Incremental spreadsheet evaluator.
#[derive(Debug, Default)]
pub struct FormulaEngine {
    inputs: HashMap<CellRef, CellInput>,
    results: HashMap<CellRef, CellResult>,
    scheduler: UpdateScheduler,
    /// Cells changed since the last recalculation.
    pending: Vec<CellRef>,
    row_count: usize,
    /// Formulas reading the row-count variable.
    row_count_readers: HashSet<CellRef>,
}

fn cell_ref(row: usize, col: usize) -> Option<CellRef> {
    Some(CellRef::new(u32::try_from(row).ok()?, u32::try_from(col).ok()?))
}

impl FormulaEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push raw cell text. Text starting with `=` is a formula.
    pub fn sync_cell(&mut self, row: usize, col: usize, text: &str) {
        if !is_formula(text) {
            self.sync_value(row, col, Value::parse_literal(text));
            return;
        }
        let Some(cell) = cell_ref(row, col) else {
            return;
        };
        if let Some(CellInput::Formula { text: current, .. }) = self.inputs.get(&cell) {
            if current == text {
                return;
            }
        }

        let parsed = parse(text);
        let (parsed, deps) = match parsed {
            Ok(expr) => match expr.references(MAX_RANGE_CELLS) {
                Ok(deps) => (Ok(expr), deps),
                Err(e) => (Err(e), Default::default()),
            },
            Err(e) => (Err(e), Default::default()),
        };

        if parsed.as_ref().is_ok_and(Expr::uses_row_count) {
            self.row_count_readers.insert(cell);
        } else {
            self.row_count_readers.remove(&cell);
        }
        self.scheduler.set_precedents(cell, CellRole::Formula, &deps);
        self.inputs.insert(
            cell,
            CellInput::Formula {
                text: text.to_string(),
                parsed,
            },
        );
        self.pending.push(cell);
    }

    /// Push a raw value.
    pub fn sync_value(&mut self, row: usize, col: usize, value: Value) {
        let Some(cell) = cell_ref(row, col) else {
            return;
        };
        match self.inputs.get(&cell) {
            Some(CellInput::Literal(current)) if *current == value => return,
            Some(CellInput::Formula { .. }) => self.demote(cell),
            _ => {}
        }
        self.inputs.insert(cell, CellInput::Literal(value));
        self.pending.push(cell);
    }

    /// Remove whatever was pushed into a cell.
    pub fn clear_cell(&mut self, row: usize, col: usize) {
        let Some(cell) = cell_ref(row, col) else {
            return;
        };
        let Some(previous) = self.inputs.remove(&cell) else {
            return;
        };
        if matches!(previous, CellInput::Formula { .. }) {
            self.demote(cell);
        }
        self.pending.push(cell);
        self.scheduler.prune(cell);
    }

    /// Turn a formula cell back into a plain node.
    fn demote(&mut self, cell: CellRef) {
        self.results.remove(&cell);
        self.row_count_readers.remove(&cell);
        self.scheduler.set_precedents(cell, CellRole::Input, &[]);
    }

    /// Set the value of the row-count variable.
    pub fn set_row_count(&mut self, rows: usize) {
        if self.row_count != rows {
            self.row_count = rows;
            self.pending.extend(self.row_count_readers.iter().copied());
        }
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Forget every cell.
    pub fn reset(&mut self) {
        self.inputs.clear();
        self.results.clear();
        self.scheduler.clear();
        self.pending.clear();
        self.row_count = 0;
        self.row_count_readers.clear();
    }

    /// Number of cells currently pushed in.
    pub fn cell_count(&self) -> usize {
        self.inputs.len()
    }

    /// Evaluate everything affected by the cells pushed since the last call.
    pub fn recalculate(&mut self) -> RecalcStats {
        let mut stats = RecalcStats::default();
        let mut roots = std::mem::take(&mut self.pending);
        roots.sort_unstable();
        roots.dedup();
        if roots.is_empty() {
            return stats;
        }

        let schedule = self.scheduler.mark_changed(&roots);
        // Formula roots only count as changed once their result differs.
        let mut changed: HashSet<CellRef> = roots
            .iter()
            .copied()
            .filter(|cell| !matches!(self.inputs.get(cell), Some(CellInput::Formula { .. })))
            .collect();

        for cell in schedule.order {
            let is_formula = matches!(self.inputs.get(&cell), Some(CellInput::Formula { .. }));
            let needs_eval = is_formula
                && match self.scheduler.freshness(cell) {
                    Freshness::Stale => true,
                    Freshness::Suspect => self
                        .scheduler
                        .node(cell)
                        .is_some_and(|node| node.precedents().iter().any(|d| changed.contains(d))),
                    Freshness::Fresh => false,
                };

            if needs_eval {
                let result = self.evaluate_formula(cell);
                if self.results.get(&cell) != Some(&result) {
                    changed.insert(cell);
                }
                self.results.insert(cell, result);
                stats.evaluated += 1;
            } else if is_formula {
                stats.skipped += 1;
            }
            self.scheduler.set_fresh(cell);
        }

        for cell in schedule.cyclic {
            if matches!(self.inputs.get(&cell), Some(CellInput::Formula { .. })) {
                self.results.insert(cell, Err(EvalError::Circular));
                stats.cyclic += 1;
            }
            self.scheduler.set_fresh(cell);
        }

        stats
    }

    fn evaluate_formula(&self, cell: CellRef) -> CellResult {
        let Some(CellInput::Formula { parsed, .. }) = self.inputs.get(&cell) else {
            return Ok(Value::Empty);
        };
        let expr = parsed.as_ref().map_err(Clone::clone)?;
        let grid = Grid {
            inputs: &self.inputs,
            results: &self.results,
            row_count: self.row_count,
        };
        evaluate(expr, &grid).map(Value::normalize_result)
    }

    /// Last evaluated value of a cell.
    ///
    /// Literal cells return their value, formula cells their last result,
    /// and untouched cells `Empty` (no result).
    pub fn evaluate(&self, row: usize, col: usize) -> CellResult {
        let Some(cell) = cell_ref(row, col) else {
            return Ok(Value::Empty);
        };
        Grid {
            inputs: &self.inputs,
            results: &self.results,
            row_count: self.row_count,
        }
        .cell_value(cell)
    }

    /// Formula text pushed into a cell, if it holds one.
    pub fn formula(&self, row: usize, col: usize) -> Option<&str> {
        match self.inputs.get(&cell_ref(row, col)?) {
            Some(CellInput::Formula { text, .. }) => Some(text),
            _ => None,
        }
    }

    /// Push every cell of a snapshot.
    pub fn sync_snapshot(&mut self, snapshot: &DatasetSnapshot) {
        let schema = snapshot.schema();
        for (row_index, row) in snapshot.rows().iter().enumerate() {
            for col in 0..schema.len() {
                match row.cell(schema, col) {
                    Some(CellContent::Native(value)) => self.sync_value(row_index, col, value.clone()),
                    Some(CellContent::Formula(Some(cell))) => match cell.formula() {
                        Some(text) => self.sync_cell(row_index, col, text),
                        None => self.clear_cell(row_index, col),
                    },
                    Some(CellContent::Formula(None)) | None => self.clear_cell(row_index, col),
                }
            }
        }
        self.set_row_count(snapshot.len());
    }

    /// Recompute a snapshot and build its result table.
    ///
    /// Snapshots with more rows than `row_ceiling` skip the engine
    /// entirely: native values are still reported, formula cells keep the
    /// result cached in the snapshot.
    pub fn run_pass(
        &mut self,
        snapshot: &DatasetSnapshot,
        row_ceiling: Option<usize>,
    ) -> (ComputedTable, Option<RecalcStats>) {
        if let Some(ceiling) = row_ceiling.filter(|&c| snapshot.len() > c) {
            info!(
                rows = snapshot.len(),
                ceiling, "not updating formulas because there are too many rows"
            );
            return (self.table(snapshot, false), None);
        }

        let started = Instant::now();
        self.sync_snapshot(snapshot);
        let stats = self.recalculate();
        debug!(
            evaluated = stats.evaluated,
            skipped = stats.skipped,
            cyclic = stats.cyclic,
            elapsed_us = started.elapsed().as_micros() as u64,
            "formulas recalculated"
        );
        (self.table(snapshot, true), Some(stats))
    }

    fn table(&self, snapshot: &DatasetSnapshot, formulas_evaluated: bool) -> ComputedTable {
        let schema = snapshot.schema();
        let mut table = ComputedTable::with_capacity(
            schema.clone(),
            snapshot.revisions(),
            formulas_evaluated,
            snapshot.len(),
        );
        for (row_index, row) in snapshot.rows().iter().enumerate() {
            let cells = (0..schema.len())
                .map(|col| match row.cell(schema, col) {
                    Some(CellContent::Native(value)) => Ok(value.clone()),
                    Some(CellContent::Formula(Some(cell))) if cell.formula().is_some() => {
                        if formulas_evaluated {
                            self.evaluate(row_index, col)
                        } else {
                            cell.cached_result().cloned().unwrap_or(Ok(Value::Empty))
                        }
                    }
                    _ => Ok(Value::Empty),
                })
                .collect();
            table.push_row(ComputedRow::new(row.clone(), cells));
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{ColumnKind, Dataset, Schema};

    #[test]
    fn literal_and_formula_cells() {
        let mut engine = FormulaEngine::new();
        engine.sync_cell(0, 0, "2");
        engine.sync_cell(0, 1, "=A1*3");
        engine.recalculate();
        assert_eq!(engine.evaluate(0, 0), Ok(Value::Number(2.0)));
        assert_eq!(engine.evaluate(0, 1), Ok(Value::Number(6.0)));
        assert_eq!(engine.evaluate(5, 5), Ok(Value::Empty));
        assert_eq!(engine.formula(0, 1), Some("=A1*3"));
    }

    #[test]
    fn deeply_nested_formula_is_a_cell_error() {
        let mut engine = FormulaEngine::new();
        engine.sync_cell(0, 0, "1");
        engine.sync_cell(0, 1, &format!("={}A1{}", "(".repeat(1_000), ")".repeat(1_000)));
        engine.sync_cell(0, 2, &format!("={}A1", "-".repeat(200_000)));
        engine.sync_cell(0, 3, "=A1+1");
        engine.recalculate();
        assert!(matches!(engine.evaluate(0, 1), Err(EvalError::Parse(_))));
        assert!(matches!(engine.evaluate(0, 2), Err(EvalError::Parse(_))));
        assert_eq!(engine.evaluate(0, 3), Ok(Value::Number(2.0)));
    }

    #[test]
    fn changes_propagate_through_chains() {
        let mut engine = FormulaEngine::new();
        engine.sync_cell(0, 0, "1");
        engine.sync_cell(0, 1, "=A1+1");
        engine.sync_cell(0, 2, "=B1+1");
        engine.recalculate();
        assert_eq!(engine.evaluate(0, 2), Ok(Value::Number(3.0)));

        engine.sync_cell(0, 0, "10");
        let stats = engine.recalculate();
        assert_eq!(stats.evaluated, 2);
        assert_eq!(engine.evaluate(0, 2), Ok(Value::Number(12.0)));
    }

    #[test]
    fn unchanged_intermediate_stops_propagation() {
        let mut engine = FormulaEngine::new();
        engine.sync_cell(0, 0, "4");
        engine.sync_cell(0, 1, "=A1>0");
        engine.sync_cell(0, 2, "=IF(B1,1,2)");
        engine.recalculate();

        engine.sync_cell(0, 0, "5");
        let stats = engine.recalculate();
        // B1 is still TRUE, so C1 is skipped.
        assert_eq!(stats.evaluated, 1);
        assert_eq!(stats.skipped, 1);
    }

    #[test]
    fn resync_with_same_content_is_a_no_op() {
        let mut engine = FormulaEngine::new();
        engine.sync_cell(0, 0, "1");
        engine.sync_cell(0, 1, "=A1+1");
        engine.recalculate();

        engine.sync_cell(0, 0, "1");
        engine.sync_cell(0, 1, "=A1+1");
        assert_eq!(engine.recalculate(), RecalcStats::default());
    }

    #[test]
    fn failures_stay_in_their_cell() {
        let mut engine = FormulaEngine::new();
        engine.sync_cell(0, 0, "=1/0");
        engine.sync_cell(0, 1, "=1+");
        engine.sync_cell(0, 2, "=UNKNOWN(1)");
        engine.sync_cell(0, 3, "=2+2");
        engine.recalculate();

        assert_eq!(engine.evaluate(0, 0), Err(EvalError::DivZero));
        assert!(matches!(engine.evaluate(0, 1), Err(EvalError::Parse(_))));
        assert!(matches!(engine.evaluate(0, 2), Err(EvalError::Name(_))));
        assert_eq!(engine.evaluate(0, 3), Ok(Value::Number(4.0)));
    }

    #[test]
    fn cycles_are_marked_and_recover() {
        let mut engine = FormulaEngine::new();
        engine.sync_cell(0, 0, "=B1");
        engine.sync_cell(0, 1, "=A1");
        engine.sync_cell(1, 0, "=5");
        let stats = engine.recalculate();
        assert_eq!(stats.cyclic, 2);
        assert_eq!(engine.evaluate(0, 0), Err(EvalError::Circular));
        assert_eq!(engine.evaluate(1, 0), Ok(Value::Number(5.0)));

        engine.sync_cell(0, 1, "7");
        engine.recalculate();
        assert_eq!(engine.evaluate(0, 0), Ok(Value::Number(7.0)));
    }

    #[test]
    fn text_results_are_coerced_to_numbers() {
        let mut engine = FormulaEngine::new();
        engine.sync_cell(0, 0, "=\"4\"&\"2\"");
        engine.sync_cell(0, 1, "=\"\"");
        engine.recalculate();
        assert_eq!(engine.evaluate(0, 0), Ok(Value::Number(42.0)));
        // An empty string is a result, not the absence of one.
        assert_eq!(engine.evaluate(0, 1), Ok(Value::Text(String::new())));
    }

    #[test]
    fn row_count_variable_follows_set_row_count() {
        let mut engine = FormulaEngine::new();
        engine.set_row_count(3);
        engine.sync_cell(0, 0, "=NCELLS*2");
        engine.recalculate();
        assert_eq!(engine.evaluate(0, 0), Ok(Value::Number(6.0)));

        engine.set_row_count(4);
        engine.recalculate();
        assert_eq!(engine.evaluate(0, 0), Ok(Value::Number(8.0)));
    }

    #[test]
    fn replacing_a_formula_with_a_value_drops_its_edges() {
        let mut engine = FormulaEngine::new();
        engine.sync_cell(0, 0, "1");
        engine.sync_cell(0, 1, "=A1");
        engine.sync_cell(0, 2, "=B1*2");
        engine.recalculate();

        engine.sync_cell(0, 1, "9");
        engine.recalculate();
        assert_eq!(engine.evaluate(0, 2), Ok(Value::Number(18.0)));

        // A1 no longer feeds anything.
        engine.sync_cell(0, 0, "100");
        engine.recalculate();
        assert_eq!(engine.evaluate(0, 2), Ok(Value::Number(18.0)));
    }

    #[test]
    fn cleared_cells_read_as_empty() {
        let mut engine = FormulaEngine::new();
        engine.sync_cell(0, 0, "=3");
        engine.sync_cell(0, 1, "=A1+1");
        engine.recalculate();

        engine.clear_cell(0, 0);
        engine.recalculate();
        assert_eq!(engine.evaluate(0, 0), Ok(Value::Empty));
        assert_eq!(engine.evaluate(0, 1), Ok(Value::Number(1.0)));
    }

    fn dataset(rows: usize) -> Dataset {
        let schema = Schema::from_columns([("x", ColumnKind::Native), ("f", ColumnKind::Formula)]).unwrap();
        let mut data = Dataset::new(schema);
        for i in 0..rows {
            data.push_row(vec![(i as f64).into()]).unwrap();
            data.set_formula(i, 1, "=A1+NCELLS").unwrap();
        }
        data
    }

    #[test]
    fn run_pass_builds_a_full_table() {
        let data = dataset(3);
        let mut engine = FormulaEngine::new();
        let (table, stats) = engine.run_pass(&data.snapshot(), Some(5000));
        assert!(table.formulas_evaluated());
        assert_eq!(stats.map(|s| s.evaluated), Some(3));
        assert_eq!(table.get(2, 0), Some(&Ok(Value::Number(2.0))));
        // Every row reads A1, the first row.
        assert_eq!(table.get(2, 1), Some(&Ok(Value::Number(3.0))));
    }

    #[test]
    fn run_pass_above_ceiling_skips_formulas() {
        let data = dataset(4);
        let mut engine = FormulaEngine::new();
        let (table, stats) = engine.run_pass(&data.snapshot(), Some(3));
        assert!(stats.is_none());
        assert!(!table.formulas_evaluated());
        assert_eq!(table.get(3, 0), Some(&Ok(Value::Number(3.0))));
        assert_eq!(table.get(3, 1), Some(&Ok(Value::Empty)));
        assert_eq!(engine.cell_count(), 0);
    }
}
