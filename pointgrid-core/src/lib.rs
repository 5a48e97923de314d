//! Pointgrid Core
//!
//! Live recomputation for tables of points with user formula columns.
//! It implements:
//!
//! - A small spreadsheet formula language with per-cell error values
//! - An incremental, dependency-tracked formula engine
//! - Copy-on-write datasets with constant-time snapshots
//! - Background views that coalesce change notifications into recompute
//!   passes and publish results to a single-threaded consumer
//!
//! # Architecture
//!
//! - `formula`: parsing, evaluation, values and error markers
//! - `graph`: per-cell dependency graph, dirty propagation, ordering
//! - `engine`: coordinate-addressed engine over the graph
//! - `dataset`: rows, schema, snapshots, and a shared observable dataset
//! - `filter`: per-column filter ranges and histograms
//! - `view`: dirty tracking, the recompute worker, and view handles
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pointgrid_core::{open_view, ColumnKind, QueuedConsumer, Schema, SharedDataset, ViewConfig};
//!
//! let schema = Schema::from_columns([("x", ColumnKind::Native), ("userCell1", ColumnKind::Formula)])?;
//! let data = Arc::new(SharedDataset::new(schema));
//! data.push_row(vec![2.0.into()])?;
//! data.set_formula_named(0, "userCell1", "=A1*10")?;
//!
//! let consumer = Arc::new(QueuedConsumer::new());
//! let view = open_view(data.clone(), consumer.clone(), ViewConfig::default())?;
//!
//! // On the presentation thread:
//! consumer.pump();
//! ```

pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod filter;
pub mod formula;
pub mod graph;
pub mod source;
pub mod table;
pub mod view;

pub use config::ViewConfig;
pub use dataset::{ColumnKind, Dataset, DatasetSnapshot, FormulaCell, Revisions, Row, RowId, Schema, SharedDataset};
pub use engine::{FormulaEngine, RecalcStats};
pub use error::{Error, Result};
pub use filter::FilterRange;
pub use formula::{CellResult, EvalError, Value};
pub use source::{ChangeObserver, RowDataSource, Subscription, SubscriptionId};
pub use table::{ComputedRow, ComputedTable};
pub use view::{close_view, open_view, BusyState, ComputedState, PresentationConsumer, QueuedConsumer, ViewHandle, WorkerState};
