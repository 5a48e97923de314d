//! Cell Formula Language
//!
//! A small spreadsheet expression language: A1-style references (with `$`
//! anchors), ranges, arithmetic, comparison, text concatenation, a handful
//! of functions, and the `NCELLS` pseudo-variable holding the number of
//! rows in the view.
//!
//! Text starting with `=` is a formula; anything else entered in a cell is
//! a literal.

mod ast;
mod eval;
mod parser;
mod value;

pub use ast::{column_index, column_letters, BinaryOp, CellAddr, CellRef, Expr, ROW_COUNT_VARIABLE};
pub use eval::{evaluate, EvalContext};
pub use parser::{is_formula, parse, MAX_NESTING};
pub use value::{CellResult, EvalError, Value};

/// Copy a formula to another cell, shifting relative references.
///
/// `rows`/`cols` is the distance from the source cell to the destination.
/// The returned text includes the leading `=`.
pub fn shift_formula(text: &str, rows: i64, cols: i64) -> Result<String, EvalError> {
    let expr = parse(text)?;
    Ok(format!("={}", expr.offset(rows, cols)))
}
