//! Cell nodes
//!
//! One node per cell that takes part in a reference. Edges are stored on
//! both ends: a node knows the cells it reads (its precedents) and the
//! cells that read it (its dependents).

use std::collections::HashSet;

use crate::formula::CellRef;

/// Role of a cell in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellRole {
    /// Holds a value, or is only ever referenced. Never has precedents.
    Input,
    /// Holds a formula.
    Formula,
}

/// How far a cell's last result can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    /// A precedent is being recomputed. The cell needs work only if that
    /// precedent ends up with a different result.
    Suspect,
    /// Edited directly. Must be recomputed.
    Stale,
}

#[derive(Debug)]
pub struct CellNode {
    cell: CellRef,
    role: CellRole,
    freshness: Freshness,
    precedents: HashSet<CellRef>,
    dependents: HashSet<CellRef>,
}

impl CellNode {
    /// New formula nodes start stale so their first pass evaluates them.
    pub fn new(cell: CellRef, role: CellRole) -> Self {
        let freshness = if role == CellRole::Formula {
            Freshness::Stale
        } else {
            Freshness::Fresh
        };
        Self {
            cell,
            role,
            freshness,
            precedents: HashSet::new(),
            dependents: HashSet::new(),
        }
    }

    pub fn cell(&self) -> CellRef {
        self.cell
    }

    pub fn role(&self) -> CellRole {
        self.role
    }

    pub fn set_role(&mut self, role: CellRole) {
        self.role = role;
    }

    pub fn freshness(&self) -> Freshness {
        self.freshness
    }

    pub fn set_fresh(&mut self) {
        self.freshness = Freshness::Fresh;
    }

    pub fn set_stale(&mut self) {
        self.freshness = Freshness::Stale;
    }

    /// Only downgrades fresh cells; a stale cell stays stale.
    pub fn suspect(&mut self) {
        if self.freshness == Freshness::Fresh {
            self.freshness = Freshness::Suspect;
        }
    }

    pub fn precedents(&self) -> &HashSet<CellRef> {
        &self.precedents
    }

    pub fn dependents(&self) -> &HashSet<CellRef> {
        &self.dependents
    }

    pub(super) fn link_precedent(&mut self, cell: CellRef) {
        self.precedents.insert(cell);
    }

    pub(super) fn unlink_precedent(&mut self, cell: CellRef) {
        self.precedents.remove(&cell);
    }

    pub(super) fn link_dependent(&mut self, cell: CellRef) {
        self.dependents.insert(cell);
    }

    pub(super) fn unlink_dependent(&mut self, cell: CellRef) {
        self.dependents.remove(&cell);
    }

    pub(super) fn drain_precedents(&mut self) -> HashSet<CellRef> {
        std::mem::take(&mut self.precedents)
    }

    /// An input cell with no edges left carries no information.
    pub fn is_detached(&self) -> bool {
        self.role == CellRole::Input && self.precedents.is_empty() && self.dependents.is_empty()
    }
}
