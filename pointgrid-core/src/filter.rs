//! Per-column filter ranges.
//!
//! For each numeric column the filter UI needs the value range, the current
//! selection inside it, and a histogram to draw behind the range slider.
//! Ranges are recomputed on structural change or on explicit reset only;
//! plain value edits leave them alone.

use serde::Serialize;

use crate::dataset::ColumnKind;
use crate::formula::Value;
use crate::table::ComputedTable;

/// Range and histogram of one numeric column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterRange {
    pub column: usize,
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub selected_low: f64,
    pub selected_high: f64,
    /// Relative frequency per bucket; sums to 1 for a non-empty column.
    pub histogram: Vec<f64>,
}

impl FilterRange {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.selected_low && value <= self.selected_high
    }
}

/// Compute the filter range of every numeric column of `table`.
///
/// A column is numeric if it holds formulas or if its first row holds a
/// number. Non-numeric values inside a numeric column count as 0.
pub fn compute_filter_ranges(table: &ComputedTable, buckets: usize) -> Vec<FilterRange> {
    let schema = table.schema();
    let mut ranges = Vec::new();
    for (col, (name, kind)) in schema.columns().enumerate() {
        let numeric = match kind {
            ColumnKind::Formula => true,
            ColumnKind::Native => matches!(table.get(0, col), Some(Ok(Value::Number(_)))),
        };
        if !numeric || table.is_empty() {
            continue;
        }
        let values: Vec<f64> = table
            .column(col)
            .map(|value| {
                let v = value.map_or(f64::NAN, Value::as_f64_lossy);
                if v.is_nan() {
                    0.0
                } else {
                    v
                }
            })
            .collect();
        ranges.push(range_of(col, name, &values, buckets));
    }
    ranges
}

fn range_of(column: usize, name: &str, values: &[f64], buckets: usize) -> FilterRange {
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    FilterRange {
        column,
        name: name.to_string(),
        min,
        max,
        selected_low: min,
        selected_high: max,
        histogram: histogram(values, min, max, buckets),
    }
}

/// Relative-frequency histogram with `buckets` equal-width bins over
/// `[min, max]`. The maximum falls in the last bin.
pub fn histogram(values: &[f64], min: f64, max: f64, buckets: usize) -> Vec<f64> {
    let mut bins = vec![0.0; buckets];
    if buckets == 0 || values.is_empty() {
        return bins;
    }
    let width = (max - min) / buckets as f64;
    let share = 1.0 / values.len() as f64;
    for &v in values {
        let index = if width > 0.0 && width.is_finite() {
            (((v - min) / width) as usize).min(buckets - 1)
        } else {
            0
        };
        bins[index] += share;
    }
    bins
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Revisions, Row, Schema};
    use crate::formula::EvalError;
    use crate::table::ComputedRow;
    use std::sync::Arc;

    fn table(rows: Vec<Vec<crate::formula::CellResult>>) -> ComputedTable {
        let schema = Arc::new(
            Schema::from_columns([
                ("x", ColumnKind::Native),
                ("label", ColumnKind::Native),
                ("f", ColumnKind::Formula),
            ])
            .unwrap(),
        );
        let mut table = ComputedTable::new(schema, Revisions::default(), true);
        for cells in rows {
            table.push_row(ComputedRow::new(Arc::new(Row::new(vec![])), cells));
        }
        table
    }

    #[test]
    fn numeric_columns_get_ranges() {
        let t = table(vec![
            vec![Ok(1.0.into()), Ok("a".into()), Ok(10.0.into())],
            vec![Ok(4.0.into()), Ok("b".into()), Err(EvalError::DivZero)],
            vec![Ok(2.0.into()), Ok("c".into()), Ok((-5.0).into())],
        ]);
        let ranges = compute_filter_ranges(&t, 15);
        assert_eq!(ranges.len(), 2);

        let x = &ranges[0];
        assert_eq!((x.column, x.min, x.max), (0, 1.0, 4.0));
        assert_eq!((x.selected_low, x.selected_high), (1.0, 4.0));
        assert_eq!(x.histogram.len(), 15);
        assert!((x.histogram.iter().sum::<f64>() - 1.0).abs() < 1e-9);

        // The error cell counts as 0.
        let f = &ranges[1];
        assert_eq!((f.column, f.min, f.max), (2, -5.0, 10.0));
    }

    #[test]
    fn constant_column_lands_in_first_bucket() {
        let bins = histogram(&[3.0, 3.0], 3.0, 3.0, 4);
        assert_eq!(bins, vec![1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn maximum_falls_in_last_bucket() {
        let bins = histogram(&[0.0, 10.0], 0.0, 10.0, 5);
        assert_eq!(bins, vec![0.5, 0.0, 0.0, 0.0, 0.5]);
    }

    #[test]
    fn empty_table_has_no_ranges() {
        assert!(compute_filter_ranges(&table(vec![]), 15).is_empty());
    }
}
