//! Kernel module inlining: the compute layer carries a copy of the kernel
//! subroutine instead of `use`-ing the kernel module.
//!
//! Every call of the same kernel in the schedule is marked, since one
//! module cannot both import and contain a procedure of the same name.

use crate::config::Config;
use crate::ir::tree::{NodeId, NodeKind, Schedule};
use crate::transform::Transform;
use crate::utils::errors::PsyResult;

#[derive(Debug, Clone, Default)]
pub struct KernelModuleInline;

impl KernelModuleInline {
    pub fn new() -> Self {
        Self
    }
}

impl Transform for KernelModuleInline {
    fn name(&self) -> &str {
        "kernel_module_inline"
    }

    fn validate(&self, schedule: &Schedule, node: NodeId, _config: &Config) -> PsyResult<()> {
        let Some(call) = schedule.tree.as_call(node) else {
            return Err(self
                .inapplicable(
                    schedule,
                    node,
                    format!("target is a {}, not a KernelCall", schedule.tree.kind(node).name()),
                )
                .into());
        };
        let kernel = &call.invocation.kernel;
        if kernel.is_builtin() {
            return Err(self
                .inapplicable(schedule, node, format!("{} is a built-in and has no kernel module", kernel.name()))
                .into());
        }
        if call.module_inline {
            return Err(self.already_applied(schedule, node).into());
        }
        if kernel.signature().code_source.is_none() {
            return Err(self
                .inapplicable(
                    schedule,
                    node,
                    format!("source of {} was not found in {}", kernel.signature().procedure, kernel.signature().module),
                )
                .into());
        }
        Ok(())
    }

    fn apply(&self, schedule: &mut Schedule, node: NodeId, _config: &Config) -> PsyResult<()> {
        let Some(name) = schedule.tree.as_call(node).map(|c| c.invocation.name().to_string()) else {
            return Ok(());
        };
        for id in schedule.tree.kernel_calls() {
            if let NodeKind::KernelCall(call) = schedule.tree.kind_mut(id) {
                if call.invocation.name() == name {
                    call.module_inline = true;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::invoke::{ActualArg, InvokeCall, KernelInvocation};
    use crate::ir::kernel::*;
    use crate::ir::IrBuilder;
    use crate::utils::errors::PsyError;
    use crate::utils::location::Span;

    fn kernel(source: Option<&str>) -> Kernel {
        Kernel::Standard(KernelSignature {
            name: "w3_type".into(),
            module: "w3_mod".into(),
            procedure: "w3_code".into(),
            args: vec![ArgumentDescriptor::field(DataType::Real, AccessMode::Write, FunctionSpace::W3)],
            iteration_space: IterationSpace::CellColumn,
            code_source: source.map(String::from),
        })
    }

    fn sched(kernel: Kernel) -> Schedule {
        let call = |f: &str| KernelInvocation::bind(kernel.clone(), vec![ActualArg::Variable(f.into())], Span::dummy());
        let inv = InvokeCall {
            name: "invoke_0".into(),
            label: None,
            index: 0,
            calls: vec![call("a"), call("b")],
            span: Span::dummy(),
            unit: 0,
        };
        IrBuilder::new(&Config::default()).build(&inv)
    }

    #[test]
    fn test_inline_marks_every_call() {
        let config = Config::default();
        let mut s = sched(kernel(Some("subroutine w3_code()\nend subroutine w3_code")));
        let calls = s.tree.kernel_calls();
        let t = KernelModuleInline::new();
        t.validate(&s, calls[0], &config).unwrap();
        t.apply(&mut s, calls[0], &config).unwrap();
        assert!(calls.iter().all(|c| s.tree.as_call(*c).unwrap().module_inline));
        assert!(matches!(t.validate(&s, calls[1], &config), Err(PsyError::AlreadyTransformed(_))));
    }

    #[test]
    fn test_inline_needs_source() {
        let config = Config::default();
        let s = sched(kernel(None));
        let call = s.tree.kernel_calls()[0];
        let err = KernelModuleInline::new().validate(&s, call, &config).unwrap_err();
        assert!(err.to_string().contains("w3_code"));
        let l = s.tree.outermost_loops()[0];
        assert!(KernelModuleInline::new().validate(&s, l, &config).is_err());
    }
}
