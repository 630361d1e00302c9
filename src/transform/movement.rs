//! Reordering of sibling nodes.

use crate::analysis::access::{subtree_accesses, touches_key};
use crate::analysis::dependence::DependenceAnalysis;
use crate::config::Config;
use crate::ir::tree::{CallTree, NodeId, NodeKind, Schedule};
use crate::transform::{Target, TransformOptions, Transform};
use crate::utils::errors::{PsyResult, ScriptError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Before,
    After,
}

/// Move a node directly before or after one of its siblings.
#[derive(Debug, Clone, PartialEq)]
pub struct Move {
    pub placement: Placement,
    pub anchor: Target,
}

impl Move {
    pub fn new(placement: Placement, anchor: Target) -> Self {
        Self { placement, anchor }
    }

    pub fn from_options(options: &TransformOptions) -> PsyResult<Self> {
        match (options.string("before")?, options.string("after")?) {
            (Some(t), None) => Ok(Self::new(Placement::Before, t.parse()?)),
            (None, Some(t)) => Ok(Self::new(Placement::After, t.parse()?)),
            _ => Err(ScriptError::new("move needs exactly one of 'before' or 'after'").into()),
        }
    }

    /// Siblings jumped over and the index `node` ends up at once it has
    /// been detached.
    fn plan(&self, schedule: &Schedule, node: NodeId) -> PsyResult<(Vec<NodeId>, usize)> {
        let tree = &schedule.tree;
        let Some(parent) = tree.parent(node) else {
            return Err(self.inapplicable(schedule, node, "the schedule root cannot be moved").into());
        };
        let anchor = self.anchor.resolve_one(schedule)?;
        if anchor == node {
            return Err(self.inapplicable(schedule, node, "a node cannot be moved relative to itself").into());
        }
        if tree.parent(anchor) != Some(parent) {
            return Err(self
                .inapplicable(schedule, node, format!("{} is not a sibling", tree.describe(anchor)))
                .into());
        }
        let siblings = tree.children(parent);
        let from = siblings.iter().position(|c| *c == node).unwrap_or(0);
        let to = siblings.iter().position(|c| *c == anchor).unwrap_or(0);
        let (crossed, dest) = match (self.placement, to > from) {
            (Placement::Before, true) => (siblings[from + 1..to].to_vec(), to - 1),
            (Placement::Before, false) => (siblings[to..from].to_vec(), to),
            (Placement::After, true) => (siblings[from + 1..=to].to_vec(), to),
            (Placement::After, false) => (siblings[to + 1..from].to_vec(), to + 1),
        };
        Ok((crossed, dest))
    }
}

/// Halo-exchanged fields in the subtree at `id`.
fn exchanged_keys(tree: &CallTree, id: NodeId) -> Vec<(String, String)> {
    tree.walk(id)
        .into_iter()
        .filter_map(|n| match tree.kind(n) {
            NodeKind::HaloExchange(h) => Some((h.key(), h.field.clone())),
            _ => None,
        })
        .collect()
}

impl Transform for Move {
    fn name(&self) -> &str {
        "move"
    }

    fn validate(&self, schedule: &Schedule, node: NodeId, _config: &Config) -> PsyResult<()> {
        let (crossed, _) = self.plan(schedule, node)?;
        let tree = &schedule.tree;

        if !DependenceAnalysis::new().is_move_legal(tree, &schedule.dependencies, node, &crossed) {
            let edge = schedule
                .edges_touching(node)
                .into_iter()
                .find(|e| crossed.iter().any(|c| tree.walk(*c).iter().any(|n| *n == e.from || *n == e.to)))
                .map(|e| format!(" ({:?} dependency on {})", e.kind, e.field))
                .unwrap_or_default();
            return Err(self
                .inapplicable(schedule, node, format!("the move would cross a dependency edge{}", edge))
                .into());
        }

        let moved = subtree_accesses(tree, node);
        let moved_exchanges = exchanged_keys(tree, node);
        for &c in &crossed {
            for (key, field) in exchanged_keys(tree, c) {
                if touches_key(&moved, &key) {
                    return Err(self
                        .inapplicable(schedule, node, format!("the move would cross the halo exchange of {}", field))
                        .into());
                }
            }
            let crossed_accesses = subtree_accesses(tree, c);
            for (key, field) in &moved_exchanges {
                if touches_key(&crossed_accesses, key) {
                    return Err(self
                        .inapplicable(
                            schedule,
                            node,
                            format!("{} accesses {} whose halo exchange is being moved", tree.describe(c), field),
                        )
                        .into());
                }
            }
        }
        Ok(())
    }

    fn apply(&self, schedule: &mut Schedule, node: NodeId, _config: &Config) -> PsyResult<()> {
        let (_, dest) = self.plan(schedule, node)?;
        let Some(parent) = schedule.tree.parent(node) else {
            return Ok(());
        };
        schedule.tree.detach(node);
        schedule.tree.insert_child(parent, dest, node);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::invoke::{ActualArg, InvokeCall, KernelInvocation};
    use crate::ir::kernel::*;
    use crate::ir::IrBuilder;
    use crate::utils::location::Span;

    fn v(s: &str) -> ActualArg {
        ActualArg::Variable(s.to_string())
    }

    fn build(config: &Config, calls: Vec<KernelInvocation>) -> Schedule {
        let inv = InvokeCall {
            name: "invoke_0".into(),
            label: None,
            index: 0,
            calls,
            span: Span::dummy(),
            unit: 0,
        };
        IrBuilder::new(config).build(&inv)
    }

    fn setval(f: &str) -> KernelInvocation {
        KernelInvocation::bind(Kernel::builtin(BuiltinOp::SetvalC), vec![v(f), ActualArg::Literal("1.0".into())], Span::dummy())
    }

    fn mv(key: &str, target: &str) -> Move {
        Move::from_options(&TransformOptions::new().with(key, target)).unwrap()
    }

    #[test]
    fn test_independent_move() {
        let config = Config::default();
        let mut s = build(&config, vec![setval("a"), setval("b"), setval("c")]);
        let loops = s.tree.outermost_loops();
        let t = mv("before", "0");
        t.validate(&s, loops[2], &config).unwrap();
        t.apply(&mut s, loops[2], &config).unwrap();
        assert_eq!(s.tree.children(s.root()), &[loops[2], loops[0], loops[1]]);

        let t = mv("after", "2");
        t.validate(&s, loops[2], &config).unwrap();
        t.apply(&mut s, loops[2], &config).unwrap();
        assert_eq!(s.tree.children(s.root()), &[loops[0], loops[1], loops[2]]);
    }

    #[test]
    fn test_move_across_dependency_rejected() {
        let config = Config::default();
        let copy = KernelInvocation::bind(Kernel::builtin(BuiltinOp::SetvalX), vec![v("b"), v("a")], Span::dummy());
        let s = build(&config, vec![setval("a"), setval("c"), copy]);
        let loops = s.tree.outermost_loops();
        let err = mv("before", "0").validate(&s, loops[2], &config).unwrap_err();
        assert!(err.to_string().contains("dependency"));
        mv("before", "1").validate(&s, loops[2], &config).unwrap();
    }

    #[test]
    fn test_move_options() {
        assert!(Move::from_options(&TransformOptions::new()).is_err());
        let both = TransformOptions::new().with("before", "0").with("after", "1");
        assert!(Move::from_options(&both).is_err());
        let config = Config::default();
        let s = build(&config, vec![setval("a"), setval("b")]);
        let l = s.tree.outermost_loops()[0];
        assert!(mv("after", "0").validate(&s, l, &config).is_err());
        assert!(mv("after", "0").validate(&s, s.root(), &config).is_err());
    }
}
