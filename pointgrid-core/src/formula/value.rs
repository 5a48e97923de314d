//! Cell Values
//!
//! Values flowing through the formula engine and the published table.
//!
//! `Value::Empty` means "no result": a cell that was never evaluated, or a
//! reference to a cell with nothing in it. It is deliberately distinct from
//! `Value::Text(String::new())`, which is a formula that evaluated to the
//! empty string.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A per-cell evaluation failure.
///
/// `Display` renders the marker shown in the cell.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum EvalError {
    /// The formula text could not be parsed.
    #[error("#PARSE!")]
    Parse(String),

    /// An operand had the wrong type (e.g. arithmetic on text).
    #[error("#VALUE!")]
    Value,

    /// Division by zero.
    #[error("#DIV/0!")]
    DivZero,

    /// Numeric failure (non-finite result, square root of a negative).
    #[error("#NUM!")]
    Num,

    /// Unknown function or variable name.
    #[error("#NAME?")]
    Name(String),

    /// Reference outside the grid.
    #[error("#REF!")]
    Ref,

    /// Value not available.
    #[error("#N/A")]
    Na,

    /// The cell participates in (or depends on) a reference cycle.
    #[error("#CIRC!")]
    Circular,
}

impl EvalError {
    /// Parse an error literal as written in a formula (`#REF!`, `#DIV/0!`...).
    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker.to_ascii_uppercase().as_str() {
            "#VALUE!" => Some(Self::Value),
            "#DIV/0!" => Some(Self::DivZero),
            "#NUM!" => Some(Self::Num),
            "#NAME?" => Some(Self::Name(String::new())),
            "#REF!" => Some(Self::Ref),
            "#N/A" => Some(Self::Na),
            "#CIRC!" => Some(Self::Circular),
            _ => None,
        }
    }

    /// Human readable detail, where the marker alone is not enough.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Parse(msg) => Some(msg),
            Self::Name(name) if !name.is_empty() => Some(name),
            _ => None,
        }
    }
}

/// Result of evaluating one cell.
pub type CellResult = Result<Value, EvalError>;

/// A scalar cell value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    /// No value.
    #[default]
    Empty,
    /// A number. Integers are stored as floats.
    Number(f64),
    /// Text, possibly empty.
    Text(String),
    /// A boolean.
    Bool(bool),
}

impl Value {
    /// Interpret a raw (non-formula) cell entry.
    ///
    /// Empty input is `Empty`, `TRUE`/`FALSE` are booleans, anything that
    /// parses as a number is a number, everything else is text.
    pub fn parse_literal(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Self::Empty;
        }
        if trimmed.eq_ignore_ascii_case("TRUE") {
            return Self::Bool(true);
        }
        if trimmed.eq_ignore_ascii_case("FALSE") {
            return Self::Bool(false);
        }
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => Self::Number(n),
            _ => Self::Text(text.to_string()),
        }
    }

    /// Check whether this is the "no value" marker.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Coerce to a number for arithmetic.
    ///
    /// Empty is zero, booleans are 0/1, text must parse as a number.
    pub fn as_number(&self) -> Result<f64, EvalError> {
        match self {
            Self::Empty => Ok(0.0),
            Self::Number(n) => Ok(*n),
            Self::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Self::Text(s) => s.trim().parse::<f64>().map_err(|_| EvalError::Value),
        }
    }

    /// Coerce to a boolean for logical functions.
    pub fn as_bool(&self) -> Result<bool, EvalError> {
        match self {
            Self::Empty => Ok(false),
            Self::Bool(b) => Ok(*b),
            Self::Number(n) => Ok(*n != 0.0),
            Self::Text(s) if s.eq_ignore_ascii_case("TRUE") => Ok(true),
            Self::Text(s) if s.eq_ignore_ascii_case("FALSE") => Ok(false),
            Self::Text(_) => Err(EvalError::Value),
        }
    }

    /// Coerce to text for concatenation.
    pub fn as_text(&self) -> String {
        match self {
            Self::Empty => String::new(),
            other => other.to_string(),
        }
    }

    /// Numeric view used by filter ranges: anything non-numeric is NaN.
    pub fn as_f64_lossy(&self) -> f64 {
        match self {
            Self::Number(n) => *n,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Text(s) => s.trim().parse().unwrap_or(f64::NAN),
            Self::Empty => f64::NAN,
        }
    }

    /// Promote a text result that reads as a number to that number.
    ///
    /// Empty strings stay empty strings.
    pub fn normalize_result(self) -> Self {
        match self {
            Self::Text(s) if !s.trim().is_empty() => match s.trim().parse::<f64>() {
                Ok(n) if n.is_finite() => Self::Number(n),
                _ => Self::Text(s),
            },
            other => other,
        }
    }

    /// Ordering used by comparison operators.
    ///
    /// Numbers sort before text, text before booleans. Empty compares as
    /// zero against numbers and as the empty string against text.
    pub fn compare(&self, other: &Self) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Empty | Value::Number(_) => 0,
                Value::Text(_) => 1,
                Value::Bool(_) => 2,
            }
        }
        match (self, other) {
            (Self::Text(a), Self::Empty) => a.as_str().cmp(""),
            (Self::Empty, Self::Text(b)) => "".cmp(b.as_str()),
            (Self::Text(a), Self::Text(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (a, b) if rank(a) == 0 && rank(b) == 0 => {
                let x = a.as_number().unwrap_or(0.0);
                let y = b.as_number().unwrap_or(0.0);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{n}")
                }
            }
            Self::Text(s) => f.write_str(s),
            Self::Bool(true) => f.write_str("TRUE"),
            Self::Bool(false) => f.write_str("FALSE"),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}
