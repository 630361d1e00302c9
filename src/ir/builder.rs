//! Build a [`Schedule`] from a resolved invoke.
//!
//! Each kernel call gets its own loop over the kernel's iteration space,
//! in source order. With distributed memory, halo exchanges are placed
//! immediately before the loop that needs them:
//!
//! - a field read through a stencil needs its halo to the stencil extent
//! - every field read by a loop that runs into the halo needs that depth
//! - the exchange is guarded by a dirty check unless an earlier loop in
//!   the same invoke wrote the field, in which case it is unconditional

use crate::analysis::dependence::analyze_dependencies;
use crate::config::Config;
use crate::ir::invoke::{InvokeCall, KernelInvocation};
use crate::ir::kernel::{AccessMode, IterationSpace};
use crate::ir::tree::*;
use log::{debug, info};
use std::collections::HashSet;

pub struct IrBuilder<'c> {
    config: &'c Config,
}

/// A pending exchange for one field before one loop.
struct Exchange {
    key: String,
    field: String,
    depth: String,
}

impl<'c> IrBuilder<'c> {
    pub fn new(config: &'c Config) -> Self {
        Self { config }
    }

    pub fn build_all(&self, invokes: &[InvokeCall]) -> Vec<Schedule> {
        invokes.iter().map(|i| self.build(i)).collect()
    }

    pub fn build(&self, invoke: &InvokeCall) -> Schedule {
        let mut tree = CallTree::new(&invoke.name);
        let root = tree.root();
        let mut written: HashSet<String> = HashSet::new();

        for call in &invoke.calls {
            let lp = self.loop_for(call);
            if self.config.distributed_memory {
                for ex in self.exchanges_for(call, &lp) {
                    let conditional = !written.contains(&ex.key);
                    let id = tree.add_node(NodeKind::HaloExchange(HaloExchangeNode {
                        field: ex.field,
                        depth: ex.depth,
                        conditional,
                    }));
                    tree.append_child(root, id);
                }
            }
            let loop_id = tree.add_node(NodeKind::Loop(lp));
            tree.append_child(root, loop_id);
            let call_id = tree.add_node(NodeKind::KernelCall(KernelCallNode {
                invocation: call.clone(),
                module_inline: false,
            }));
            tree.append_child(loop_id, call_id);

            for arg in call.fields().filter(|a| a.access().writes()) {
                written.insert(arg.key());
            }
        }

        let dependencies = analyze_dependencies(&tree);
        info!(
            "built {}: {} loop(s), {} dependency edge(s)",
            invoke.name,
            invoke.calls.len(),
            dependencies.len()
        );
        Schedule {
            name: invoke.name.clone(),
            invoke: invoke.clone(),
            tree,
            arguments: invoke.arguments(),
            dependencies,
        }
    }

    fn loop_for(&self, call: &KernelInvocation) -> LoopNode {
        let space = call.kernel.signature().iteration_space;
        let dm = self.config.distributed_memory;
        let upper = match space {
            IterationSpace::CellColumn => {
                let shared_inc = call.fields().any(|a| {
                    a.access() == AccessMode::Inc
                        && a.descriptor.space.map(|s| s.is_continuous()).unwrap_or(false)
                });
                if dm && shared_inc {
                    UpperBound::HaloCells("1".to_string())
                } else {
                    UpperBound::OwnedCells
                }
            }
            IterationSpace::OwnedAndHaloCellColumn => match (&call.halo_depth, dm) {
                (Some(depth), true) => UpperBound::HaloCells(depth.text().to_string()),
                _ => UpperBound::OwnedCells,
            },
            IterationSpace::Dof => UpperBound::OwnedDofs,
            IterationSpace::Domain => UpperBound::Single,
        };
        LoopNode {
            space,
            variable: space.loop_variable().to_string(),
            upper,
        }
    }

    fn exchanges_for(&self, call: &KernelInvocation, lp: &LoopNode) -> Vec<Exchange> {
        let halo_depth = match &lp.upper {
            UpperBound::HaloCells(d) => Some(d.clone()),
            _ => None,
        };
        let mut out: Vec<Exchange> = Vec::new();
        for arg in call.fields().filter(|a| a.access().reads()) {
            let mut depths: Vec<String> = Vec::new();
            if let Some(extent) = &arg.stencil_extent {
                depths.push(extent.text().to_string());
            }
            if let Some(d) = &halo_depth {
                depths.push(d.clone());
            }
            for depth in depths {
                let key = arg.key();
                match out.iter_mut().find(|e| e.key == key) {
                    Some(existing) => existing.depth = merge_depth(&existing.depth, &depth),
                    None => out.push(Exchange {
                        key,
                        field: arg.actual.text().to_string(),
                        depth,
                    }),
                }
            }
        }
        for ex in &out {
            debug!("halo exchange of {} to depth {} before {}", ex.field, ex.depth, call.name());
        }
        out
    }
}

/// Greater of two literal depths; a variable depth seen first wins.
fn merge_depth(current: &str, new: &str) -> String {
    match (current.parse::<u32>(), new.parse::<u32>()) {
        (Ok(a), Ok(b)) => a.max(b).to_string(),
        (Ok(_), Err(_)) => new.to_string(),
        _ => current.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::invoke::ActualArg;
    use crate::ir::kernel::*;
    use crate::utils::location::Span;

    fn var(s: &str) -> ActualArg {
        ActualArg::Variable(s.to_string())
    }

    fn kernel(name: &str, args: Vec<ArgumentDescriptor>, space: IterationSpace) -> Kernel {
        Kernel::Standard(KernelSignature {
            name: name.into(),
            module: "m".into(),
            procedure: "p".into(),
            args,
            iteration_space: space,
            code_source: None,
        })
    }

    fn invoke(calls: Vec<KernelInvocation>) -> InvokeCall {
        InvokeCall {
            name: "invoke_0".into(),
            label: None,
            index: 0,
            calls,
            span: Span::dummy(),
            unit: 0,
        }
    }

    fn inc_kernel() -> Kernel {
        kernel(
            "inc_type",
            vec![
                ArgumentDescriptor::field(DataType::Real, AccessMode::Inc, FunctionSpace::W1),
                ArgumentDescriptor::field(DataType::Real, AccessMode::Read, FunctionSpace::W3),
            ],
            IterationSpace::CellColumn,
        )
    }

    #[test]
    fn test_one_loop_per_call() {
        let k = inc_kernel();
        let inv = invoke(vec![
            KernelInvocation::bind(k.clone(), vec![var("a"), var("b")], Span::dummy()),
            KernelInvocation::bind(k, vec![var("c"), var("d")], Span::dummy()),
        ]);
        let config = Config::default().distributed_memory(false);
        let s = IrBuilder::new(&config).build(&inv);
        assert_eq!(s.tree.loops().len(), 2);
        assert_eq!(s.tree.children(s.root()).len(), 2);
        for l in s.tree.loops() {
            assert_eq!(s.tree.as_loop(l).unwrap().space, IterationSpace::CellColumn);
            assert_eq!(s.tree.as_loop(l).unwrap().upper, UpperBound::OwnedCells);
        }
        assert!(s.dependencies.is_empty());
    }

    #[test]
    fn test_inc_loop_runs_into_halo_and_exchanges() {
        let k = inc_kernel();
        let inv = invoke(vec![
            KernelInvocation::bind(k.clone(), vec![var("a"), var("b")], Span::dummy()),
            KernelInvocation::bind(k, vec![var("a"), var("b")], Span::dummy()),
        ]);
        let config = Config::default();
        let s = IrBuilder::new(&config).build(&inv);
        let kinds: Vec<&str> = s.tree.children(s.root()).iter().map(|c| s.tree.kind(*c).name()).collect();
        assert_eq!(
            kinds,
            vec!["HaloExchange", "HaloExchange", "Loop", "HaloExchange", "HaloExchange", "Loop"]
        );
        let first = s.tree.children(s.root())[0];
        match s.tree.kind(first) {
            NodeKind::HaloExchange(h) => {
                assert_eq!(h.field, "a");
                assert_eq!(h.depth, "1");
                assert!(h.conditional);
            }
            other => panic!("unexpected {:?}", other),
        }
        let third = s.tree.children(s.root())[3];
        match s.tree.kind(third) {
            NodeKind::HaloExchange(h) => assert!(!h.conditional, "a was written by the first loop"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(s.dependencies.len(), 1);
        assert_eq!(s.dependencies[0].kind, DependencyKind::Flow);
    }

    #[test]
    fn test_stencil_exchange_depth_is_extent() {
        let k = kernel(
            "st_type",
            vec![
                ArgumentDescriptor::field(DataType::Real, AccessMode::Write, FunctionSpace::W3),
                ArgumentDescriptor::field(DataType::Real, AccessMode::Read, FunctionSpace::W3)
                    .with_stencil(StencilShape::Cross),
            ],
            IterationSpace::CellColumn,
        );
        let inv = invoke(vec![KernelInvocation::bind(k, vec![var("a"), var("b"), var("ext")], Span::dummy())]);
        let config = Config::default();
        let s = IrBuilder::new(&config).build(&inv);
        let first = s.tree.children(s.root())[0];
        match s.tree.kind(first) {
            NodeKind::HaloExchange(h) => {
                assert_eq!(h.field, "b");
                assert_eq!(h.depth, "ext");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_merge_depth() {
        assert_eq!(merge_depth("1", "2"), "2");
        assert_eq!(merge_depth("ext", "2"), "ext");
        assert_eq!(merge_depth("1", "hdepth"), "hdepth");
    }

    #[test]
    fn test_dof_and_domain_bounds() {
        let config = Config::default();
        let b = IrBuilder::new(&config);
        let setval = KernelInvocation::bind(
            Kernel::builtin(BuiltinOp::SetvalC),
            vec![var("f"), ActualArg::Literal("0.0".into())],
            Span::dummy(),
        );
        assert_eq!(b.loop_for(&setval).upper, UpperBound::OwnedDofs);
        assert_eq!(b.loop_for(&setval).variable, "df");
        let dom = kernel(
            "dom_type",
            vec![ArgumentDescriptor::field(DataType::Real, AccessMode::Write, FunctionSpace::W3)],
            IterationSpace::Domain,
        );
        let call = KernelInvocation::bind(dom, vec![var("f")], Span::dummy());
        assert_eq!(b.loop_for(&call).upper, UpperBound::Single);
    }
}
