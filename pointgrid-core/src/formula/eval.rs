//! Formula Evaluation
//!
//! Tree-walking evaluator. Cell lookups go through [`EvalContext`], so the
//! evaluator itself knows nothing about the dependency graph or the order
//! in which cells are computed.

use std::cmp::Ordering;

use super::ast::{BinaryOp, CellRef, Expr};
use super::value::{CellResult, EvalError, Value};

/// Read access to the grid while a formula is being evaluated.
pub trait EvalContext {
    /// Current value of a cell. Cells with nothing in them are `Empty`.
    fn cell_value(&self, cell: CellRef) -> CellResult;

    /// Value of the row-count pseudo-variable.
    fn row_count(&self) -> usize;
}

/// Evaluate an expression to a single value.
pub fn evaluate(expr: &Expr, ctx: &dyn EvalContext) -> CellResult {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Error(e) => Err(e.clone()),
        Expr::Ref(addr) => ctx.cell_value(addr.cell),
        // A bare range has no single value.
        Expr::Range(_, _) => Err(EvalError::Value),
        Expr::RowCount => Ok(Value::Number(ctx.row_count() as f64)),
        Expr::Name(name) => Err(EvalError::Name(name.clone())),
        Expr::Neg(inner) => {
            let n = evaluate(inner, ctx)?.as_number()?;
            Ok(Value::Number(-n))
        }
        Expr::Binary(op, lhs, rhs) => {
            let a = evaluate(lhs, ctx)?;
            let b = evaluate(rhs, ctx)?;
            binary(*op, &a, &b)
        }
        Expr::Call(name, args) => call(name, args, ctx),
    }
}

fn finite(n: f64) -> CellResult {
    if n.is_finite() {
        Ok(Value::Number(n))
    } else {
        Err(EvalError::Num)
    }
}

fn binary(op: BinaryOp, a: &Value, b: &Value) -> CellResult {
    let ordering = || a.compare(b);
    match op {
        BinaryOp::Add => finite(a.as_number()? + b.as_number()?),
        BinaryOp::Sub => finite(a.as_number()? - b.as_number()?),
        BinaryOp::Mul => finite(a.as_number()? * b.as_number()?),
        BinaryOp::Div => {
            let divisor = b.as_number()?;
            let dividend = a.as_number()?;
            if divisor == 0.0 {
                return Err(EvalError::DivZero);
            }
            finite(dividend / divisor)
        }
        BinaryOp::Pow => finite(a.as_number()?.powf(b.as_number()?)),
        BinaryOp::Concat => Ok(Value::Text(a.as_text() + &b.as_text())),
        BinaryOp::Eq => Ok(Value::Bool(ordering() == Ordering::Equal)),
        BinaryOp::Ne => Ok(Value::Bool(ordering() != Ordering::Equal)),
        BinaryOp::Lt => Ok(Value::Bool(ordering() == Ordering::Less)),
        BinaryOp::Le => Ok(Value::Bool(ordering() != Ordering::Greater)),
        BinaryOp::Gt => Ok(Value::Bool(ordering() == Ordering::Greater)),
        BinaryOp::Ge => Ok(Value::Bool(ordering() != Ordering::Less)),
    }
}

/// One function argument after range expansion.
enum Arg {
    /// Written directly in the call.
    Direct(Value),
    /// Came out of a range.
    FromRange(Value),
}

fn expand_args(args: &[Expr], ctx: &dyn EvalContext) -> Result<Vec<Arg>, EvalError> {
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            Expr::Range(_, _) => {
                for cell in arg.references(usize::MAX)? {
                    out.push(Arg::FromRange(ctx.cell_value(cell)?));
                }
            }
            other => out.push(Arg::Direct(evaluate(other, ctx)?)),
        }
    }
    Ok(out)
}

/// Numbers for aggregate functions.
///
/// Text and blanks inside ranges are skipped; text passed directly must be
/// numeric.
fn numbers(args: &[Expr], ctx: &dyn EvalContext) -> Result<Vec<f64>, EvalError> {
    let mut out = Vec::new();
    for arg in expand_args(args, ctx)? {
        match arg {
            Arg::FromRange(Value::Number(n)) => out.push(n),
            Arg::FromRange(_) => {}
            Arg::Direct(Value::Empty) => {}
            Arg::Direct(v) => out.push(v.as_number()?),
        }
    }
    Ok(out)
}

fn arity(args: &[Expr], min: usize, max: usize) -> Result<(), EvalError> {
    if args.len() < min || args.len() > max {
        Err(EvalError::Value)
    } else {
        Ok(())
    }
}

fn call(name: &str, args: &[Expr], ctx: &dyn EvalContext) -> CellResult {
    match name {
        "SUM" => finite(numbers(args, ctx)?.iter().sum()),
        "AVERAGE" => {
            let values = numbers(args, ctx)?;
            if values.is_empty() {
                return Err(EvalError::DivZero);
            }
            finite(values.iter().sum::<f64>() / values.len() as f64)
        }
        "MIN" => {
            let values = numbers(args, ctx)?;
            Ok(Value::Number(values.into_iter().reduce(f64::min).unwrap_or(0.0)))
        }
        "MAX" => {
            let values = numbers(args, ctx)?;
            Ok(Value::Number(values.into_iter().reduce(f64::max).unwrap_or(0.0)))
        }
        "COUNT" => {
            let mut count = 0usize;
            for arg in args {
                let cells: Vec<CellResult> = match arg {
                    Expr::Range(_, _) => arg
                        .references(usize::MAX)?
                        .into_iter()
                        .map(|c| ctx.cell_value(c))
                        .collect(),
                    other => vec![evaluate(other, ctx)],
                };
                count += cells
                    .iter()
                    .filter(|v| matches!(v, Ok(Value::Number(_))))
                    .count();
            }
            Ok(Value::Number(count as f64))
        }
        "ABS" => {
            arity(args, 1, 1)?;
            Ok(Value::Number(evaluate(&args[0], ctx)?.as_number()?.abs()))
        }
        "SQRT" => {
            arity(args, 1, 1)?;
            let n = evaluate(&args[0], ctx)?.as_number()?;
            if n < 0.0 {
                return Err(EvalError::Num);
            }
            Ok(Value::Number(n.sqrt()))
        }
        "ROUND" => {
            arity(args, 1, 2)?;
            let n = evaluate(&args[0], ctx)?.as_number()?;
            let digits = match args.get(1) {
                Some(d) => evaluate(d, ctx)?.as_number()?.trunc() as i32,
                None => 0,
            };
            let scale = 10f64.powi(digits);
            finite((n * scale).round() / scale)
        }
        "IF" => {
            arity(args, 2, 3)?;
            if evaluate(&args[0], ctx)?.as_bool()? {
                evaluate(&args[1], ctx)
            } else {
                match args.get(2) {
                    Some(otherwise) => evaluate(otherwise, ctx),
                    None => Ok(Value::Bool(false)),
                }
            }
        }
        "AND" | "OR" => {
            let mut flags = Vec::new();
            for arg in expand_args(args, ctx)? {
                match arg {
                    Arg::FromRange(Value::Empty) | Arg::Direct(Value::Empty) => {}
                    Arg::FromRange(v) | Arg::Direct(v) => flags.push(v.as_bool()?),
                }
            }
            if flags.is_empty() {
                return Err(EvalError::Value);
            }
            let result = if name == "AND" {
                flags.iter().all(|f| *f)
            } else {
                flags.iter().any(|f| *f)
            };
            Ok(Value::Bool(result))
        }
        "NOT" => {
            arity(args, 1, 1)?;
            Ok(Value::Bool(!evaluate(&args[0], ctx)?.as_bool()?))
        }
        "LEN" => {
            arity(args, 1, 1)?;
            Ok(Value::Number(evaluate(&args[0], ctx)?.as_text().chars().count() as f64))
        }
        "CONCATENATE" => {
            let mut text = String::new();
            for arg in expand_args(args, ctx)? {
                let (Arg::Direct(v) | Arg::FromRange(v)) = arg;
                text.push_str(&v.as_text());
            }
            Ok(Value::Text(text))
        }
        other => Err(EvalError::Name(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::parser::parse;
    use std::collections::HashMap;

    struct Grid {
        cells: HashMap<CellRef, CellResult>,
        rows: usize,
    }

    impl EvalContext for Grid {
        fn cell_value(&self, cell: CellRef) -> CellResult {
            self.cells.get(&cell).cloned().unwrap_or(Ok(Value::Empty))
        }

        fn row_count(&self) -> usize {
            self.rows
        }
    }

    fn grid() -> Grid {
        let mut cells = HashMap::new();
        cells.insert(CellRef::new(0, 0), Ok(Value::Number(1.0)));
        cells.insert(CellRef::new(1, 0), Ok(Value::Number(2.0)));
        cells.insert(CellRef::new(2, 0), Ok(Value::Text("x".into())));
        cells.insert(CellRef::new(0, 1), Err(EvalError::DivZero));
        Grid { cells, rows: 3 }
    }

    fn eval(src: &str) -> CellResult {
        evaluate(&parse(src).unwrap(), &grid())
    }

    #[test]
    fn arithmetic() {
        assert_eq!(eval("=A1+1"), Ok(Value::Number(2.0)));
        assert_eq!(eval("=2^3*2"), Ok(Value::Number(16.0)));
        assert_eq!(eval("=-A2"), Ok(Value::Number(-2.0)));
        assert_eq!(eval("=A9+1"), Ok(Value::Number(1.0)));
    }

    #[test]
    fn arithmetic_errors() {
        assert_eq!(eval("=1/0"), Err(EvalError::DivZero));
        assert_eq!(eval("=A3+1"), Err(EvalError::Value));
        assert_eq!(eval("=SQRT(-1)"), Err(EvalError::Num));
        assert_eq!(eval("=B1+1"), Err(EvalError::DivZero));
        assert_eq!(eval("=nope+1"), Err(EvalError::Name("nope".into())));
        assert_eq!(eval("=FOO(1)"), Err(EvalError::Name("FOO".into())));
    }

    #[test]
    fn aggregates_skip_text_in_ranges() {
        assert_eq!(eval("=SUM(A1:A3)"), Ok(Value::Number(3.0)));
        assert_eq!(eval("=AVERAGE(A1:A3)"), Ok(Value::Number(1.5)));
        assert_eq!(eval("=MAX(A1:A3, 7)"), Ok(Value::Number(7.0)));
        assert_eq!(eval("=MIN(A1:A3)"), Ok(Value::Number(1.0)));
        assert_eq!(eval("=COUNT(A1:A5)"), Ok(Value::Number(2.0)));
        assert_eq!(eval("=SUM(A1:B1)"), Err(EvalError::DivZero));
    }

    #[test]
    fn logic_and_text() {
        assert_eq!(eval("=IF(A1>0, \"pos\", \"neg\")"), Ok(Value::Text("pos".into())));
        assert_eq!(eval("=IF(A1>5, 1)"), Ok(Value::Bool(false)));
        // The branch not taken is never evaluated.
        assert_eq!(eval("=IF(TRUE, 1, 1/0)"), Ok(Value::Number(1.0)));
        assert_eq!(eval("=AND(A1=1, A2=2)"), Ok(Value::Bool(true)));
        assert_eq!(eval("=OR(FALSE, NOT(TRUE))"), Ok(Value::Bool(false)));
        assert_eq!(eval("=A1&\"-\"&A3"), Ok(Value::Text("1-x".into())));
        assert_eq!(eval("=LEN(\"abc\")"), Ok(Value::Number(3.0)));
        assert_eq!(eval("=CONCATENATE(A1:A3)"), Ok(Value::Text("12x".into())));
        assert_eq!(eval("=\"\""), Ok(Value::Text(String::new())));
    }

    #[test]
    fn row_count_variable() {
        assert_eq!(eval("=NCELLS*10"), Ok(Value::Number(30.0)));
    }

    #[test]
    fn rounding() {
        assert_eq!(eval("=ROUND(2.567, 2)"), Ok(Value::Number(2.57)));
        assert_eq!(eval("=ROUND(2.5)"), Ok(Value::Number(3.0)));
    }
}
