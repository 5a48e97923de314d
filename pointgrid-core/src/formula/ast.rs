//! Formula Syntax Tree
//!
//! Parsed representation of a cell formula, plus the two structural
//! operations the view needs: listing the cells a formula reads, and
//! shifting relative references when a formula is filled down a column.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::value::{EvalError, Value};

/// Name of the pseudo-variable holding the current row count.
pub const ROW_COUNT_VARIABLE: &str = "NCELLS";

/// Zero-based cell coordinate in the view's grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_letters(self.col), self.row + 1)
    }
}

/// A reference as written in a formula, with its `$` anchors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellAddr {
    pub cell: CellRef,
    pub row_fixed: bool,
    pub col_fixed: bool,
}

impl CellAddr {
    /// Shift the non-anchored parts of the address.
    ///
    /// Returns `None` when the result falls off the top or left of the grid.
    pub fn offset(&self, rows: i64, cols: i64) -> Option<Self> {
        let shift = |base: u32, by: i64, fixed: bool| -> Option<u32> {
            if fixed {
                return Some(base);
            }
            u32::try_from(i64::from(base) + by).ok()
        };
        Some(Self {
            cell: CellRef {
                row: shift(self.cell.row, rows, self.row_fixed)?,
                col: shift(self.cell.col, cols, self.col_fixed)?,
            },
            ..*self
        })
    }
}

impl fmt::Display for CellAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.col_fixed {
            f.write_str("$")?;
        }
        f.write_str(&column_letters(self.cell.col))?;
        if self.row_fixed {
            f.write_str("$")?;
        }
        write!(f, "{}", self.cell.row + 1)
    }
}

/// Binary operators, in the order of their precedence groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryOp {
    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    // Text
    Concat,

    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    /// Binding power used by the parser. Higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge => 1,
            Self::Concat => 2,
            Self::Add | Self::Sub => 3,
            Self::Mul | Self::Div => 4,
            Self::Pow => 5,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Concat => "&",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Pow => "^",
        }
    }
}

/// A formula expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Number, text or boolean literal.
    Literal(Value),
    /// Error literal such as `#REF!`.
    Error(EvalError),
    /// Single cell reference.
    Ref(CellAddr),
    /// Rectangular range; only meaningful as a function argument.
    Range(CellAddr, CellAddr),
    /// The row-count pseudo-variable.
    RowCount,
    /// Any other bare identifier. Evaluates to `#NAME?`.
    Name(String),
    /// Unary minus.
    Neg(Box<Expr>),
    /// Binary operation.
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// Function call; the name is stored upper-cased.
    Call(String, Vec<Expr>),
}

impl Expr {
    /// Collect every cell this expression reads.
    ///
    /// Ranges are expanded cell by cell. Fails with `#REF!` when a range
    /// expands past `max_cells`.
    pub fn references(&self, max_cells: usize) -> Result<SmallVec<[CellRef; 4]>, EvalError> {
        let mut out = SmallVec::new();
        self.collect_references(&mut out, max_cells)?;
        Ok(out)
    }

    fn collect_references(
        &self,
        out: &mut SmallVec<[CellRef; 4]>,
        max_cells: usize,
    ) -> Result<(), EvalError> {
        match self {
            Self::Ref(addr) => out.push(addr.cell),
            Self::Range(a, b) => {
                let (top, bottom) = ordered(a.cell.row, b.cell.row);
                let (left, right) = ordered(a.cell.col, b.cell.col);
                let count = (u64::from(bottom - top) + 1) * (u64::from(right - left) + 1);
                if count as usize + out.len() > max_cells {
                    return Err(EvalError::Ref);
                }
                for row in top..=bottom {
                    for col in left..=right {
                        out.push(CellRef::new(row, col));
                    }
                }
            }
            Self::Neg(inner) => inner.collect_references(out, max_cells)?,
            Self::Binary(_, lhs, rhs) => {
                lhs.collect_references(out, max_cells)?;
                rhs.collect_references(out, max_cells)?;
            }
            Self::Call(_, args) => {
                for arg in args {
                    arg.collect_references(out, max_cells)?;
                }
            }
            Self::Literal(_) | Self::Error(_) | Self::RowCount | Self::Name(_) => {}
        }
        Ok(())
    }

    /// Check whether the expression reads the row-count variable.
    pub fn uses_row_count(&self) -> bool {
        match self {
            Self::RowCount => true,
            Self::Neg(inner) => inner.uses_row_count(),
            Self::Binary(_, lhs, rhs) => lhs.uses_row_count() || rhs.uses_row_count(),
            Self::Call(_, args) => args.iter().any(Expr::uses_row_count),
            _ => false,
        }
    }

    /// Shift every relative reference by the given distance.
    ///
    /// References pushed off the grid become `#REF!` literals.
    pub fn offset(&self, rows: i64, cols: i64) -> Self {
        match self {
            Self::Ref(addr) => match addr.offset(rows, cols) {
                Some(shifted) => Self::Ref(shifted),
                None => Self::Error(EvalError::Ref),
            },
            Self::Range(a, b) => match (a.offset(rows, cols), b.offset(rows, cols)) {
                (Some(a), Some(b)) => Self::Range(a, b),
                _ => Self::Error(EvalError::Ref),
            },
            Self::Neg(inner) => Self::Neg(Box::new(inner.offset(rows, cols))),
            Self::Binary(op, lhs, rhs) => Self::Binary(
                *op,
                Box::new(lhs.offset(rows, cols)),
                Box::new(rhs.offset(rows, cols)),
            ),
            Self::Call(name, args) => Self::Call(
                name.clone(),
                args.iter().map(|a| a.offset(rows, cols)).collect(),
            ),
            other => other.clone(),
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Self::Binary(op, _, _) => op.precedence(),
            Self::Neg(_) => 6,
            _ => u8::MAX,
        }
    }
}

fn ordered(a: u32, b: u32) -> (u32, u32) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(Value::Text(s)) => write!(f, "\"{}\"", s.replace('"', "\"\"")),
            Self::Literal(Value::Empty) => f.write_str("\"\""),
            Self::Literal(v) => write!(f, "{v}"),
            Self::Error(e) => write!(f, "{e}"),
            Self::Ref(addr) => write!(f, "{addr}"),
            Self::Range(a, b) => write!(f, "{a}:{b}"),
            Self::RowCount => f.write_str(ROW_COUNT_VARIABLE),
            Self::Name(name) => f.write_str(name),
            Self::Neg(inner) => {
                if inner.precedence() < self.precedence() {
                    write!(f, "-({inner})")
                } else {
                    write!(f, "-{inner}")
                }
            }
            Self::Binary(op, lhs, rhs) => {
                let prec = op.precedence();
                // All operators are left-associative.
                if lhs.precedence() < prec {
                    write!(f, "({lhs})")?;
                } else {
                    write!(f, "{lhs}")?;
                }
                f.write_str(op.symbol())?;
                if rhs.precedence() <= prec {
                    write!(f, "({rhs})")
                } else {
                    write!(f, "{rhs}")
                }
            }
            Self::Call(name, args) => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Convert a zero-based column index to spreadsheet letters (0 -> `A`).
pub fn column_letters(col: u32) -> String {
    let mut n = u64::from(col) + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = ((n - 1) % 26) as u8;
        letters.push(b'A' + rem);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Convert spreadsheet letters to a zero-based column index (`A` -> 0).
pub fn column_index(letters: &str) -> Option<u32> {
    if letters.is_empty() || !letters.bytes().all(|b| b.is_ascii_alphabetic()) {
        return None;
    }
    let mut n: u64 = 0;
    for b in letters.bytes() {
        n = n * 26 + u64::from(b.to_ascii_uppercase() - b'A' + 1);
        if n > u64::from(u32::MAX) {
            return None;
        }
    }
    u32::try_from(n - 1).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(row: u32, col: u32) -> CellAddr {
        CellAddr {
            cell: CellRef::new(row, col),
            row_fixed: false,
            col_fixed: false,
        }
    }

    #[test]
    fn column_letters_round_trip() {
        assert_eq!(column_letters(0), "A");
        assert_eq!(column_letters(25), "Z");
        assert_eq!(column_letters(26), "AA");
        assert_eq!(column_letters(27), "AB");
        assert_eq!(column_index("AB"), Some(27));
        assert_eq!(column_index("a"), Some(0));
        assert_eq!(column_index("A1"), None);
    }

    #[test]
    fn range_references_expand() {
        let expr = Expr::Range(addr(0, 0), addr(2, 1));
        let refs = expr.references(100).unwrap();
        assert_eq!(refs.len(), 6);
        assert!(refs.contains(&CellRef::new(2, 1)));
    }

    #[test]
    fn oversized_range_is_ref_error() {
        let expr = Expr::Range(addr(0, 0), addr(999, 9));
        assert_eq!(expr.references(100), Err(EvalError::Ref));
    }

    #[test]
    fn offset_respects_anchors() {
        let fixed_row = CellAddr {
            row_fixed: true,
            ..addr(0, 0)
        };
        let shifted = fixed_row.offset(5, 2).unwrap();
        assert_eq!(shifted.cell, CellRef::new(0, 2));

        assert!(addr(1, 0).offset(-2, 0).is_none());
        assert_eq!(Expr::Ref(addr(1, 0)).offset(-2, 0), Expr::Error(EvalError::Ref));
    }

    #[test]
    fn display_keeps_grouping() {
        let sum = Expr::Binary(
            BinaryOp::Add,
            Box::new(Expr::Ref(addr(0, 0))),
            Box::new(Expr::Literal(Value::Number(1.0))),
        );
        let product = Expr::Binary(
            BinaryOp::Mul,
            Box::new(sum),
            Box::new(Expr::Literal(Value::Number(2.0))),
        );
        assert_eq!(product.to_string(), "(A1+1)*2");
    }
}
