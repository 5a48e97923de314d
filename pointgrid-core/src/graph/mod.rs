//! Cell Dependency Graph
//!
//! Directed graph over cell coordinates used by the formula engine. An edge
//! runs from a cell to every formula that references it, so walking
//! dependents from an edited cell finds everything its edit can affect.
//!
//! Only cells that take part in a reference have a node. Input cells that
//! lose their last reader are pruned.
//!
//! Reference cycles are accepted when a formula is entered. The scheduler
//! reports the cells it cannot order and the engine marks them with a
//! circular-reference error.

mod node;
mod scheduler;

pub use node::{CellNode, CellRole, Freshness};
pub use scheduler::{Schedule, UpdateScheduler};
