//! Loop fusion.
//!
//! ```text
//! Before:                         After:
//! do df = 1, loop0_stop           do df = 1, loop0_stop
//!   f1_data(df) = 0.0               f1_data(df) = 0.0
//! end do                            f2_data(df) = f1_data(df)
//! do df = 1, loop1_stop           end do
//!   f2_data(df) = f1_data(df)
//! end do
//! ```
//!
//! The body of the second loop moves to the end of the first. Within one
//! iteration the original order is kept, so only dependencies that reach
//! into other iterations block fusion: stencils, dofs shared between
//! neighbouring columns, and reductions that are complete only after the
//! whole first loop.

use crate::analysis::dependence::DependenceAnalysis;
use crate::config::Config;
use crate::ir::kernel::IterationSpace;
use crate::ir::tree::{NodeId, NodeKind, Schedule};
use crate::transform::{Target, TransformOptions, Transform};
use crate::utils::errors::{PsyResult, ScriptError};
use log::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct LoopFuse {
    /// The loop immediately following the target
    pub with: Target,
}

impl LoopFuse {
    pub fn new(with: Target) -> Self {
        Self { with }
    }

    pub fn from_options(options: &TransformOptions) -> PsyResult<Self> {
        let with = options
            .string("with")?
            .ok_or_else(|| ScriptError::new("loop_fuse needs a 'with' target"))?;
        Ok(Self::new(with.parse()?))
    }

    fn check_loop(&self, schedule: &Schedule, target: NodeId, node: NodeId) -> PsyResult<()> {
        let tree = &schedule.tree;
        let Some(l) = tree.as_loop(node) else {
            return Err(self
                .inapplicable(schedule, target, format!("{} is not a Loop", tree.describe(node)))
                .into());
        };
        if l.is_colour_loop() || l.is_coloured() {
            return Err(self
                .inapplicable(schedule, target, format!("{} is coloured", tree.describe(node)))
                .into());
        }
        let directed = tree
            .walk(node)
            .into_iter()
            .any(|n| matches!(tree.kind(n), NodeKind::Directive(_)));
        if directed {
            return Err(self
                .inapplicable(schedule, target, format!("{} contains a directive", tree.describe(node)))
                .into());
        }
        Ok(())
    }

    fn partner(&self, schedule: &Schedule, node: NodeId) -> PsyResult<NodeId> {
        let tree = &schedule.tree;
        let second = self.with.resolve_one(schedule)?;
        let next = tree
            .parent(node)
            .and_then(|p| tree.index_in_parent(node).and_then(|i| tree.children(p).get(i + 1).copied()));
        if next != Some(second) {
            return Err(self
                .inapplicable(
                    schedule,
                    node,
                    format!("{} does not immediately follow the target loop", tree.describe(second)),
                )
                .into());
        }
        Ok(second)
    }
}

impl Transform for LoopFuse {
    fn name(&self) -> &str {
        "loop_fuse"
    }

    fn validate(&self, schedule: &Schedule, node: NodeId, _config: &Config) -> PsyResult<()> {
        let tree = &schedule.tree;
        self.check_loop(schedule, node, node)?;
        let second = self.partner(schedule, node)?;
        self.check_loop(schedule, node, second)?;

        let (Some(a), Some(b)) = (tree.as_loop(node), tree.as_loop(second)) else {
            return Ok(());
        };
        if a.space != b.space {
            return Err(self
                .inapplicable(schedule, node, format!("iteration spaces differ ({} vs {})", a.space, b.space))
                .into());
        }
        if a.upper != b.upper {
            return Err(self
                .inapplicable(schedule, node, format!("loop bounds differ ({} vs {})", a.upper, b.upper))
                .into());
        }
        if a.space == IterationSpace::Dof {
            let space_of = |id: NodeId| {
                tree.calls_under(id)
                    .iter()
                    .flat_map(|c| c.invocation.fields().filter_map(|f| f.descriptor.space).collect::<Vec<_>>())
                    .next()
            };
            if let (Some(sa), Some(sb)) = (space_of(node), space_of(second)) {
                if sa != sb {
                    return Err(self
                        .inapplicable(schedule, node, format!("dof loops over different function spaces ({} vs {})", sa, sb))
                        .into());
                }
            }
        }
        if let Err(reason) = DependenceAnalysis::new().is_fusion_legal(tree, node, second) {
            return Err(self.inapplicable(schedule, node, reason).into());
        }
        Ok(())
    }

    fn apply(&self, schedule: &mut Schedule, node: NodeId, _config: &Config) -> PsyResult<()> {
        let second = self.partner(schedule, node)?;
        let body: Vec<NodeId> = schedule.tree.children(second).to_vec();
        for child in body {
            schedule.tree.append_child(node, child);
        }
        schedule.tree.detach(second);

        let mut rewired = Vec::with_capacity(schedule.dependencies.len());
        for mut edge in schedule.dependencies.drain(..) {
            if edge.from == second {
                edge.from = node;
            }
            if edge.to == second {
                edge.to = node;
            }
            if edge.from != edge.to && !rewired.contains(&edge) {
                rewired.push(edge);
            }
        }
        debug!("fused loops; {} dependency edge(s) remain", rewired.len());
        schedule.dependencies = rewired;
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

    fn build(calls: Vec<KernelInvocation>) -> Schedule {
        let inv = InvokeCall {
            name: "invoke_0".into(),
            label: None,
            index: 0,
            calls,
            span: Span::dummy(),
            unit: 0,
        };
        IrBuilder::new(&Config::default()).build(&inv)
    }

    fn with(path: &str) -> LoopFuse {
        LoopFuse::from_options(&TransformOptions::new().with("with", path)).unwrap()
    }

    #[test]
    fn test_fuse_dof_loops() {
        let config = Config::default();
        let mut s = build(vec![
            KernelInvocation::bind(Kernel::builtin(BuiltinOp::SetvalC), vec![v("f1"), ActualArg::Literal("0.0".into())], Span::dummy()),
            KernelInvocation::bind(Kernel::builtin(BuiltinOp::SetvalX), vec![v("f2"), v("f1")], Span::dummy()),
            KernelInvocation::bind(Kernel::builtin(BuiltinOp::SetvalX), vec![v("f3"), v("f2")], Span::dummy()),
        ]);
        let loops = s.tree.outermost_loops();
        assert_eq!(s.dependencies.len(), 2);
        let t = with("1");
        t.validate(&s, loops[0], &config).unwrap();
        t.apply(&mut s, loops[0], &config).unwrap();
        assert_eq!(s.tree.outermost_loops(), vec![loops[0], loops[2]]);
        assert_eq!(s.tree.calls_under(loops[0]).len(), 2);
        assert_eq!(s.dependencies.len(), 1);
        assert_eq!(s.dependencies[0].from, loops[0]);
        assert_eq!(s.dependencies[0].to, loops[2]);
    }

    #[test]
    fn test_fuse_needs_adjacent_loop() {
        let config = Config::default();
        let s = build(vec![
            KernelInvocation::bind(Kernel::builtin(BuiltinOp::SetvalC), vec![v("f1"), v("a")], Span::dummy()),
            KernelInvocation::bind(Kernel::builtin(BuiltinOp::SetvalC), vec![v("f2"), v("a")], Span::dummy()),
            KernelInvocation::bind(Kernel::builtin(BuiltinOp::SetvalC), vec![v("f3"), v("a")], Span::dummy()),
        ]);
        let loops = s.tree.outermost_loops();
        let err = with("2").validate(&s, loops[0], &config).unwrap_err();
        assert!(err.to_string().contains("immediately follow"));
        assert!(LoopFuse::from_options(&TransformOptions::new()).is_err());
    }

    #[test]
    fn test_fuse_rejects_shared_increment() {
        let config = Config::default().distributed_memory(false);
        let inc = Kernel::Standard(KernelSignature {
            name: "inc_type".into(),
            module: "inc_mod".into(),
            procedure: "inc_code".into(),
            args: vec![
                ArgumentDescriptor::field(DataType::Real, AccessMode::Inc, FunctionSpace::W1),
                ArgumentDescriptor::field(DataType::Real, AccessMode::Read, FunctionSpace::W1),
            ],
            iteration_space: IterationSpace::CellColumn,
            code_source: None,
        });
        let inv = InvokeCall {
            name: "invoke_0".into(),
            label: None,
            index: 0,
            calls: vec![
                KernelInvocation::bind(inc.clone(), vec![v("a"), v("b")], Span::dummy()),
                KernelInvocation::bind(inc, vec![v("b"), v("a")], Span::dummy()),
            ],
            span: Span::dummy(),
            unit: 0,
        };
        let s = IrBuilder::new(&config).build(&inv);
        let loops = s.tree.outermost_loops();
        let err = with("1").validate(&s, loops[0], &config).unwrap_err();
        assert!(err.to_string().contains("incremented"));
    }

    #[test]
    fn test_fuse_rejects_reduction_used_by_second_loop() {
        let config = Config::default();
        let s = build(vec![
            KernelInvocation::bind(Kernel::builtin(BuiltinOp::XInnerproductY), vec![v("asum"), v("f1"), v("f2")], Span::dummy()),
            KernelInvocation::bind(Kernel::builtin(BuiltinOp::IncATimesX), vec![v("asum"), v("f1")], Span::dummy()),
        ]);
        let loops = s.tree.outermost_loops();
        let err = with("1").validate(&s, loops[0], &config).unwrap_err();
        assert!(err.to_string().contains("asum is reduced"), "{}", err);
    }

    fn cell_kernel(name: &str, args: Vec<ArgumentDescriptor>) -> Kernel {
        Kernel::Standard(KernelSignature {
            name: format!("{}_type", name),
            module: format!("{}_mod", name),
            procedure: format!("{}_code", name),
            args,
            iteration_space: IterationSpace::CellColumn,
            code_source: None,
        })
    }

    #[test]
    fn test_fuse_continuous_field_only_write_then_read() {
        let config = Config::default().distributed_memory(false);
        let read_w0 = cell_kernel(
            "read_w0",
            vec![
                ArgumentDescriptor::field(DataType::Real, AccessMode::Write, FunctionSpace::W3),
                ArgumentDescriptor::field(DataType::Real, AccessMode::Read, FunctionSpace::W0),
            ],
        );
        let write_w0 = cell_kernel(
            "write_w0",
            vec![ArgumentDescriptor::field(DataType::Real, AccessMode::Write, FunctionSpace::W0)],
        );
        let schedule_of = |calls: Vec<KernelInvocation>| {
            let inv = InvokeCall {
                name: "invoke_0".into(),
                label: None,
                index: 0,
                calls,
                span: Span::dummy(),
                unit: 0,
            };
            IrBuilder::new(&config).build(&inv)
        };

        let read_first = schedule_of(vec![
            KernelInvocation::bind(read_w0.clone(), vec![v("g"), v("f")], Span::dummy()),
            KernelInvocation::bind(write_w0.clone(), vec![v("f")], Span::dummy()),
        ]);
        let loops = read_first.tree.outermost_loops();
        let err = with("1").validate(&read_first, loops[0], &config).unwrap_err();
        assert!(err.to_string().contains("continuous space"), "{}", err);

        let write_first = schedule_of(vec![
            KernelInvocation::bind(write_w0, vec![v("f")], Span::dummy()),
            KernelInvocation::bind(read_w0, vec![v("g"), v("f")], Span::dummy()),
        ]);
        let loops = write_first.tree.outermost_loops();
        with("1").validate(&write_first, loops[0], &config).unwrap();
    }
}
