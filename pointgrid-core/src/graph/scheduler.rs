//! Update Scheduler
//!
//! Owns the cell graph and decides the order in which edited cells and
//! everything downstream of them are re-evaluated.
//!
//! # Algorithm
//!
//! 1. Edited cells are marked stale
//! 2. Everything reachable through dependents is marked suspect (BFS)
//! 3. The marked cells are ordered with Kahn's algorithm, precedents first
//! 4. Whatever the sort cannot release sits on, or below, a reference cycle
//!
//! The engine walks the order: stale formulas are always evaluated, suspect
//! ones only when a precedent produced a new result.

use std::collections::{HashMap, HashSet, VecDeque};

use super::node::{CellNode, CellRole, Freshness};
use crate::formula::CellRef;

/// Evaluation order for one pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Schedule {
    /// Cells with every precedent ahead of them.
    pub order: Vec<CellRef>,
    /// Cells on or below a reference cycle, sorted.
    pub cyclic: Vec<CellRef>,
}

#[derive(Debug, Default)]
pub struct UpdateScheduler {
    nodes: HashMap<CellRef, CellNode>,
}

impl UpdateScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, cell: CellRef) -> &mut CellNode {
        self.nodes
            .entry(cell)
            .or_insert_with(|| CellNode::new(cell, CellRole::Input))
    }

    pub fn node(&self, cell: CellRef) -> Option<&CellNode> {
        self.nodes.get(&cell)
    }

    /// Give `cell` a new role and a new set of precedents.
    ///
    /// Precedents that end up with no edges are dropped from the graph.
    pub fn set_precedents(&mut self, cell: CellRef, role: CellRole, precedents: &[CellRef]) {
        let old = {
            let node = self.entry(cell);
            node.set_role(role);
            node.drain_precedents()
        };
        for precedent in old {
            if let Some(node) = self.nodes.get_mut(&precedent) {
                node.unlink_dependent(cell);
            }
            self.prune(precedent);
        }
        for &precedent in precedents {
            self.link(precedent, cell);
        }
    }

    /// Record that `reader` reads `cell`.
    pub fn link(&mut self, cell: CellRef, reader: CellRef) {
        self.entry(cell).link_dependent(reader);
        self.entry(reader).link_precedent(cell);
    }

    pub fn unlink(&mut self, cell: CellRef, reader: CellRef) {
        if let Some(node) = self.nodes.get_mut(&cell) {
            node.unlink_dependent(reader);
        }
        if let Some(node) = self.nodes.get_mut(&reader) {
            node.unlink_precedent(cell);
        }
    }

    /// Drop `cell` if nothing links to it any more.
    pub fn prune(&mut self, cell: CellRef) {
        if self.nodes.get(&cell).is_some_and(CellNode::is_detached) {
            self.nodes.remove(&cell);
        }
    }

    /// Mark `edited` stale, mark everything downstream suspect, and return
    /// the evaluation order.
    pub fn mark_changed(&mut self, edited: &[CellRef]) -> Schedule {
        let mut queue: VecDeque<CellRef> = VecDeque::new();
        for &cell in edited {
            if let Some(node) = self.nodes.get_mut(&cell) {
                node.set_stale();
                queue.push_back(cell);
            }
        }

        let mut reached = Vec::new();
        let mut seen = HashSet::new();
        while let Some(cell) = queue.pop_front() {
            if !seen.insert(cell) {
                continue;
            }
            let Some(node) = self.nodes.get_mut(&cell) else {
                continue;
            };
            node.suspect();
            reached.push(cell);
            queue.extend(node.dependents().iter().copied());
        }

        self.order(reached)
    }

    fn order(&self, cells: Vec<CellRef>) -> Schedule {
        let members: HashSet<CellRef> = cells.iter().copied().collect();

        // Pending precedents per cell, counted inside `members` only.
        let mut waiting: HashMap<CellRef, usize> = HashMap::with_capacity(cells.len());
        let mut ready = VecDeque::new();
        for &cell in &cells {
            let Some(node) = self.nodes.get(&cell) else {
                continue;
            };
            let count = node.precedents().iter().filter(|p| members.contains(p)).count();
            if count == 0 {
                ready.push_back(cell);
            }
            waiting.insert(cell, count);
        }

        let mut order = Vec::with_capacity(cells.len());
        while let Some(cell) = ready.pop_front() {
            order.push(cell);
            let Some(node) = self.nodes.get(&cell) else {
                continue;
            };
            for reader in node.dependents() {
                if let Some(count) = waiting.get_mut(reader) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        ready.push_back(*reader);
                    }
                }
            }
        }

        let released: HashSet<CellRef> = order.iter().copied().collect();
        let mut cyclic: Vec<CellRef> = cells.into_iter().filter(|c| !released.contains(c)).collect();
        cyclic.sort_unstable();

        Schedule { order, cyclic }
    }

    pub fn set_fresh(&mut self, cell: CellRef) {
        if let Some(node) = self.nodes.get_mut(&cell) {
            node.set_fresh();
        }
    }

    /// Cells outside the graph count as fresh.
    pub fn freshness(&self, cell: CellRef) -> Freshness {
        self.nodes
            .get(&cell)
            .map_or(Freshness::Fresh, CellNode::freshness)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(row: u32, col: u32) -> CellRef {
        CellRef::new(row, col)
    }

    #[test]
    fn new_precedents_replace_old_ones() {
        let mut scheduler = UpdateScheduler::new();
        let target = c(0, 2);

        scheduler.set_precedents(target, CellRole::Formula, &[c(0, 0), c(0, 1)]);
        assert_eq!(scheduler.node_count(), 3);
        assert!(scheduler.node(c(0, 0)).unwrap().dependents().contains(&target));

        scheduler.set_precedents(target, CellRole::Formula, &[c(0, 1)]);
        assert!(scheduler.node(c(0, 0)).is_none());
        assert_eq!(scheduler.node(target).unwrap().precedents().len(), 1);
    }

    #[test]
    fn link_and_unlink_touch_both_ends() {
        let mut scheduler = UpdateScheduler::new();
        let x = c(0, 0);
        let y = c(1, 0);

        scheduler.link(x, y);
        assert!(scheduler.node(x).unwrap().dependents().contains(&y));
        assert!(scheduler.node(y).unwrap().precedents().contains(&x));

        scheduler.unlink(x, y);
        assert!(scheduler.node(x).unwrap().dependents().is_empty());
        assert!(scheduler.node(y).unwrap().precedents().is_empty());
    }

    #[test]
    fn chain_is_ordered_precedents_first() {
        let mut scheduler = UpdateScheduler::new();
        let (a, b, d) = (c(0, 0), c(0, 1), c(0, 2));
        scheduler.set_precedents(b, CellRole::Formula, &[a]);
        scheduler.set_precedents(d, CellRole::Formula, &[b]);
        scheduler.set_fresh(b);
        scheduler.set_fresh(d);

        let schedule = scheduler.mark_changed(&[a]);
        assert_eq!(schedule.order, vec![a, b, d]);
        assert!(schedule.cyclic.is_empty());
        assert_eq!(scheduler.freshness(a), Freshness::Stale);
        assert_eq!(scheduler.freshness(d), Freshness::Suspect);
    }

    #[test]
    fn diamond_waits_for_both_sides() {
        let mut scheduler = UpdateScheduler::new();
        let (top, left, right, bottom) = (c(0, 0), c(1, 0), c(1, 1), c(2, 0));
        scheduler.set_precedents(left, CellRole::Formula, &[top]);
        scheduler.set_precedents(right, CellRole::Formula, &[top]);
        scheduler.set_precedents(bottom, CellRole::Formula, &[left, right]);

        let schedule = scheduler.mark_changed(&[top]);
        assert_eq!(schedule.order.first(), Some(&top));
        assert_eq!(schedule.order.last(), Some(&bottom));
        assert_eq!(schedule.order.len(), 4);
    }

    #[test]
    fn cycles_and_their_readers_are_reported() {
        let mut scheduler = UpdateScheduler::new();
        let (a, b, d) = (c(0, 0), c(0, 1), c(0, 2));
        scheduler.set_precedents(a, CellRole::Formula, &[b]);
        scheduler.set_precedents(b, CellRole::Formula, &[a]);
        scheduler.set_precedents(d, CellRole::Formula, &[b]);

        let schedule = scheduler.mark_changed(&[a]);
        assert!(schedule.order.is_empty());
        assert_eq!(schedule.cyclic, vec![a, b, d]);
    }

    #[test]
    fn self_reference_is_cyclic() {
        let mut scheduler = UpdateScheduler::new();
        let a = c(0, 0);
        scheduler.set_precedents(a, CellRole::Formula, &[a]);
        assert_eq!(scheduler.mark_changed(&[a]).cyclic, vec![a]);
    }

    #[test]
    fn unknown_cells_are_ignored() {
        let mut scheduler = UpdateScheduler::new();
        assert_eq!(scheduler.mark_changed(&[c(9, 9)]), Schedule::default());
        assert_eq!(scheduler.freshness(c(9, 9)), Freshness::Fresh);
    }
}
