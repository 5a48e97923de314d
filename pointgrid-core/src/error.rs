//! Error types.
//!
//! Per-cell formula failures ([`EvalError`]) never surface here: they are
//! values stored in the cell. Everything in this module is either a caller
//! mistake (`DatasetError`, `ConfigError`) or a failed recompute pass that the
//! worker recovers from by retrying (`SnapshotError`, `PublishError`).

use thiserror::Error;

pub use crate::formula::EvalError;

/// Invalid access to the live dataset.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatasetError {
    #[error("row {row} out of range (dataset has {len} rows)")]
    RowOutOfRange { row: usize, len: usize },

    #[error("column {col} out of range (schema has {len} columns)")]
    ColumnOutOfRange { col: usize, len: usize },

    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    #[error("column '{0}' already exists")]
    DuplicateColumn(String),

    #[error("column '{0}' does not hold formulas")]
    NotFormulaColumn(String),

    #[error("column '{0}' holds formulas, not native values")]
    NotNativeColumn(String),

    #[error("row has {got} native fields, schema expects {expected}")]
    FieldCount { got: usize, expected: usize },
}

/// The live dataset could not be copied for a pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("data source is in an inconsistent state: {0}")]
    Inconsistent(String),

    #[error("data source is no longer available")]
    Detached,
}

/// Results could not be handed to the presentation consumer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("presentation consumer has been torn down")]
    ConsumerGone,

    #[error("presentation consumer rejected the update: {0}")]
    Rejected(String),
}

/// Invalid view configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failure inside one recompute pass. Always recovered by a retry.
#[derive(Debug, Error)]
pub enum PassError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("recompute panicked: {0}")]
    Panicked(String),
}

/// Opening or driving a view failed.
#[derive(Debug, Error)]
pub enum ViewError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("failed to spawn recompute worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("view is closed")]
    Closed,
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    View(#[from] ViewError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_readable() {
        let err = DatasetError::RowOutOfRange { row: 9, len: 3 };
        assert_eq!(err.to_string(), "row 9 out of range (dataset has 3 rows)");

        let err: Error = PublishError::ConsumerGone.into();
        assert_eq!(err.to_string(), "presentation consumer has been torn down");
    }

    #[test]
    fn pass_errors_wrap_sources() {
        let err: PassError = SnapshotError::Detached.into();
        assert!(matches!(err, PassError::Snapshot(SnapshotError::Detached)));
    }
}
