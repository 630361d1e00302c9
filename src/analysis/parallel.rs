//! Parallel-safety of loops.
//!
//! A loop is safe to run with its iterations in parallel when no
//! iteration can observe or overwrite another iteration's data. This is
//! a correctness gate: anything not provably safe is reported.

use crate::analysis::access::subtree_accesses;
use crate::ir::kernel::{AccessMode, IterationSpace};
use crate::ir::tree::{CallTree, NodeId};
use std::fmt;

/// Reason a loop's iterations are not independent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hazard {
    /// Whole-domain kernels run once; there is nothing to distribute
    SerialSpace,
    /// Colours must execute one after another
    ColourLoop,
    /// Neighbouring cells increment shared dofs of this field
    SharedIncrement(String),
    /// A field is written by one argument and read on a continuous space
    /// by another, so neighbouring cells race on shared dofs
    SharedReadWrite(String),
    /// A field read through a stencil is written in the same loop
    StencilAfterWrite(String),
    /// Iterations accumulate into this scalar
    Reduction(String),
}

impl Hazard {
    /// Reductions can be made safe by the parallelising transformation.
    pub fn is_reduction(&self) -> bool {
        matches!(self, Hazard::Reduction(_))
    }
}

impl fmt::Display for Hazard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hazard::SerialSpace => write!(f, "the loop iterates over the whole domain in a single trip"),
            Hazard::ColourLoop => write!(f, "iterations over colours must run in sequence"),
            Hazard::SharedIncrement(k) => write!(
                f,
                "uncoloured loop increments '{}' on a continuous space (race on shared dofs); apply colour first",
                k
            ),
            Hazard::SharedReadWrite(k) => write!(
                f,
                "uncoloured loop writes '{}' and reads it on a continuous space through another argument; apply colour first",
                k
            ),
            Hazard::StencilAfterWrite(k) => write!(
                f,
                "'{}' is read through a stencil and written in the same loop (cross-iteration read-after-write)",
                k
            ),
            Hazard::Reduction(k) => write!(f, "iterations reduce into '{}'", k),
        }
    }
}

/// Every hazard that prevents running the iterations of `loop_id` in
/// parallel, in a fixed order.
pub fn loop_hazards(tree: &CallTree, loop_id: NodeId) -> Vec<Hazard> {
    let Some(l) = tree.as_loop(loop_id) else {
        return Vec::new();
    };
    let mut hazards = Vec::new();
    if l.space == IterationSpace::Domain {
        hazards.push(Hazard::SerialSpace);
    }
    if l.is_colour_loop() {
        hazards.push(Hazard::ColourLoop);
    }

    let accesses = subtree_accesses(tree, loop_id);
    if l.space.is_cell_column() && !l.is_coloured() && !l.is_colour_loop() {
        for a in accesses.iter().filter(|a| a.is_shared_increment()) {
            let h = Hazard::SharedIncrement(a.key.clone());
            if !hazards.contains(&h) {
                hazards.push(h);
            }
        }
        for (i, r) in accesses.iter().enumerate().filter(|(_, a)| a.reads() && a.is_continuous()) {
            let written = accesses.iter().enumerate().any(|(j, w)| j != i && w.key == r.key && w.writes());
            let h = Hazard::SharedReadWrite(r.key.clone());
            if written && !hazards.contains(&h) {
                hazards.push(h);
            }
        }
    }
    for a in accesses.iter().filter(|a| a.stencil) {
        if accesses.iter().any(|w| w.key == a.key && w.writes()) {
            let h = Hazard::StencilAfterWrite(a.key.clone());
            if !hazards.contains(&h) {
                hazards.push(h);
            }
        }
    }
    for a in accesses.iter().filter(|a| a.mode == AccessMode::Sum) {
        let h = Hazard::Reduction(a.key.clone());
        if !hazards.contains(&h) {
            hazards.push(h);
        }
    }
    hazards
}

/// Reduction variables (normalised keys) updated under `id`.
pub fn reduction_keys(tree: &CallTree, id: NodeId) -> Vec<String> {
    loop_hazards(tree, id)
        .into_iter()
        .filter_map(|h| match h {
            Hazard::Reduction(k) => Some(k),
            _ => None,
        })
        .collect()
}
