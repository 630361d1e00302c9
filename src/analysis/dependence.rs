//! Dependence analysis between the kernel calls of an invoke.
//!
//! Two calls depend on each other when they touch the same logical
//! argument (compared by normalised actual text) and at least one of
//! them writes it. Edges connect the outermost loops of the two calls
//! and always point forwards in source order:
//! - Flow: the earlier call writes, the later one reads
//! - Anti: the earlier call reads, the later one writes
//! - Output: both write

use crate::analysis::access::{call_accesses, subtree_accesses, Access};
use crate::ir::kernel::AccessMode;
use crate::ir::tree::{CallTree, DependencyEdge, DependencyKind, NodeId};
use log::debug;

fn classify(earlier: &Access, later: &Access) -> Option<DependencyKind> {
    if earlier.writes() && later.reads() {
        Some(DependencyKind::Flow)
    } else if earlier.reads() && later.writes() {
        Some(DependencyKind::Anti)
    } else if earlier.writes() && later.writes() {
        Some(DependencyKind::Output)
    } else {
        None
    }
}

/// Dependence analyzer for call trees.
#[derive(Debug, Clone, Default)]
pub struct DependenceAnalysis;

impl DependenceAnalysis {
    pub fn new() -> Self {
        Self
    }

    /// Pairwise comparison of every call with every later call.
    pub fn analyze(&self, tree: &CallTree) -> Vec<DependencyEdge> {
        let calls = tree.kernel_calls();
        let mut edges = Vec::new();

        for i in 0..calls.len() {
            let Some(a) = tree.as_call(calls[i]) else { continue };
            let from = tree.outermost_loop_of(calls[i]).unwrap_or(calls[i]);
            let acc_a = call_accesses(&a.invocation);
            for &later in &calls[i + 1..] {
                let Some(b) = tree.as_call(later) else { continue };
                let to = tree.outermost_loop_of(later).unwrap_or(later);
                if from == to {
                    continue;
                }
                let acc_b = call_accesses(&b.invocation);
                let mut seen: Vec<&str> = Vec::new();
                for x in &acc_a {
                    if seen.contains(&x.key.as_str()) {
                        continue;
                    }
                    let kind = acc_b
                        .iter()
                        .filter(|y| y.key == x.key)
                        .filter_map(|y| classify(x, y))
                        .min_by_key(|k| *k as u8);
                    if let Some(kind) = kind {
                        seen.push(&x.key);
                        edges.push(DependencyEdge { from, to, field: x.key.clone(), kind });
                    }
                }
            }
        }
        debug!("{} dependency edge(s)", edges.len());
        edges
    }

    /// Whether moving `node` to sit directly before or after `anchor`
    /// (siblings) preserves every edge. Any edge between `node` and a
    /// sibling it would jump over forbids the move.
    pub fn is_move_legal(&self, tree: &CallTree, edges: &[DependencyEdge], node: NodeId, crossed: &[NodeId]) -> bool {
        let inside = tree.walk(node);
        let crossed_nodes: Vec<NodeId> = crossed.iter().flat_map(|c| tree.walk(*c)).collect();
        !edges.iter().any(|e| {
            (inside.contains(&e.from) && crossed_nodes.contains(&e.to))
                || (inside.contains(&e.to) && crossed_nodes.contains(&e.from))
        })
    }

    /// Whether fusing the bodies of loops `first` and `second` keeps every
    /// dependency between them iteration-local.
    pub fn is_fusion_legal(&self, tree: &CallTree, first: NodeId, second: NodeId) -> Result<(), String> {
        let cell_columns = tree.as_loop(first).map(|l| l.space.is_cell_column()).unwrap_or(false);
        let a = subtree_accesses(tree, first);
        let b = subtree_accesses(tree, second);
        for x in &a {
            for y in b.iter().filter(|y| y.key == x.key) {
                if x.mode == AccessMode::Sum || y.mode == AccessMode::Sum {
                    return Err(format!("{} is reduced by one loop and accessed by the other", x.key));
                }
                if x.writes() && y.stencil {
                    return Err(format!("second loop reads {} through a stencil after the first writes it", x.key));
                }
                if y.writes() && x.stencil {
                    return Err(format!("second loop writes {} which the first reads through a stencil", x.key));
                }
                if x.is_shared_increment() || y.is_shared_increment() {
                    return Err(format!("{} is incremented on a continuous space by one loop and accessed by the other", x.key));
                }
                // Neighbouring columns share dofs on continuous spaces. Only a
                // plain write followed by a read sees the same values fused.
                let shared = x.is_continuous() || y.is_continuous();
                if cell_columns && shared && (x.writes() || y.writes()) {
                    let write_then_read = x.mode == AccessMode::Write && !y.writes();
                    if !write_then_read {
                        return Err(format!(
                            "{} lives on a continuous space and is written by one loop and accessed by the other",
                            x.key
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Dependencies of `tree` in source order.
pub fn analyze_dependencies(tree: &CallTree) -> Vec<DependencyEdge> {
    DependenceAnalysis::new().analyze(tree)
}
