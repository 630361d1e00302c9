//! Loop colouring.
//!
//! Cells of one colour share no degrees of freedom on continuous spaces,
//! so the cells of a colour may be updated in parallel even when the
//! kernel increments shared dofs.
//!
//! ```text
//! Before:                         After:
//! do cell = 1, loop0_stop         do colour = 1, ncolour
//!   call k_code(...)                do cell = 1, last_cell_all_colours(colour)
//! end do                              call k_code(...)
//!                                   end do
//!                                 end do
//! ```

use crate::config::Config;
use crate::ir::tree::{LoopNode, NodeId, NodeKind, Schedule, UpperBound};
use crate::transform::Transform;
use crate::utils::errors::PsyResult;

/// The outer loop keeps the original node id so dependency edges stay valid.
#[derive(Debug, Clone, Default)]
pub struct Colour;

impl Colour {
    pub fn new() -> Self {
        Self
    }
}

impl Transform for Colour {
    fn name(&self) -> &str {
        "colour"
    }

    fn validate(&self, schedule: &Schedule, node: NodeId, _config: &Config) -> PsyResult<()> {
        let tree = &schedule.tree;
        let Some(l) = tree.as_loop(node) else {
            return Err(self
                .inapplicable(schedule, node, format!("target is a {}, not a Loop", tree.kind(node).name()))
                .into());
        };
        if l.is_colour_loop() || l.is_coloured() {
            return Err(self.already_applied(schedule, node).into());
        }
        if !l.space.is_cell_column() {
            return Err(self
                .inapplicable(schedule, node, format!("only cell-column loops can be coloured, this one is over {}", l.space))
                .into());
        }
        if !tree.enclosing_directives(node).is_empty() {
            return Err(self.inapplicable(schedule, node, "loop is already inside a directive region").into());
        }
        Ok(())
    }

    fn apply(&self, schedule: &mut Schedule, node: NodeId, _config: &Config) -> PsyResult<()> {
        let tree = &mut schedule.tree;
        let Some(original) = tree.as_loop(node).cloned() else {
            return Ok(());
        };
        let halo = match &original.upper {
            UpperBound::HaloCells(d) => Some(d.clone()),
            _ => None,
        };
        let inner = tree.add_node(NodeKind::Loop(LoopNode {
            space: original.space,
            variable: original.variable.clone(),
            upper: UpperBound::CellsOfColour(halo),
        }));
        let body: Vec<NodeId> = tree.children(node).to_vec();
        for child in body {
            tree.append_child(inner, child);
        }
        tree.append_child(node, inner);
        *tree.kind_mut(node) = NodeKind::Loop(LoopNode {
            space: original.space,
            variable: "colour".to_string(),
            upper: UpperBound::Colours,
        });
        Ok(())
    }
}
