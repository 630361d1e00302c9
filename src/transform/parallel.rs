//! Loop parallelisation: OpenMP `parallel do` and OpenACC `loop`.
//!
//! ```text
//! Before:                         After (omp_parallel_do):
//! do cell = 1, loop0_stop         !$omp parallel do schedule(static)
//!   call k_code(...)              do cell = 1, loop0_stop
//! end do                            call k_code(...)
//!                                 end do
//!                                 !$omp end parallel do
//! ```
//!
//! Both refuse any loop whose iterations are not provably independent.

use crate::analysis::parallel::{loop_hazards, Hazard};
use crate::config::Config;
use crate::ir::tree::{Directive, DirectiveKind, NodeId, NodeKind, Schedule};
use crate::transform::{TransformOptions, Transform};
use crate::utils::errors::{PsyResult, ScriptError};
use log::debug;

const OMP_SCHEDULES: [&str; 5] = ["static", "dynamic", "guided", "auto", "runtime"];

/// Shared checks: target is a loop, nothing but reductions prevent
/// parallel execution. Returns the reduction keys.
fn check_parallel_loop<T: Transform>(t: &T, schedule: &Schedule, node: NodeId) -> PsyResult<Vec<String>> {
    let tree = &schedule.tree;
    if tree.as_loop(node).is_none() {
        return Err(t
            .inapplicable(schedule, node, format!("target is a {}, not a Loop", tree.kind(node).name()))
            .into());
    }
    let mut reductions = Vec::new();
    for hazard in loop_hazards(tree, node) {
        match hazard {
            Hazard::Reduction(key) => reductions.push(key),
            other => return Err(t.inapplicable(schedule, node, other.to_string()).into()),
        }
    }
    Ok(reductions)
}

fn wrapped_by(schedule: &Schedule, node: NodeId, kind: DirectiveKind) -> bool {
    schedule
        .tree
        .parent(node)
        .and_then(|p| schedule.tree.as_directive(p))
        .map(|d| d.kind() == kind)
        .unwrap_or(false)
}

/// Wrap a loop in `!$omp parallel do`.
#[derive(Debug, Clone, PartialEq)]
pub struct OmpParallelLoop {
    pub schedule: String,
    /// Deterministic per-thread partial sums for reductions
    pub reprod: bool,
    /// Let the compiler reassociate reductions with a `reduction` clause
    pub allow_reassociation: bool,
}

impl OmpParallelLoop {
    pub fn new() -> Self {
        Self {
            schedule: "static".to_string(),
            reprod: false,
            allow_reassociation: false,
        }
    }

    pub fn from_options(options: &TransformOptions) -> PsyResult<Self> {
        let mut t = Self::new();
        if let Some(s) = options.string("schedule")? {
            let s = s.trim().to_ascii_lowercase();
            if !OMP_SCHEDULES.contains(&s.as_str()) {
                return Err(ScriptError::new(format!(
                    "unknown OpenMP schedule '{}' (expected one of {})",
                    s,
                    OMP_SCHEDULES.join(", ")
                ))
                .into());
            }
            t.schedule = s;
        }
        t.reprod = options.bool("reprod", false)?;
        t.allow_reassociation = options.bool("allow_reassociation", false)?;
        Ok(t)
    }
}

impl Default for OmpParallelLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for OmpParallelLoop {
    fn name(&self) -> &str {
        "omp_parallel_do"
    }

    fn validate(&self, schedule: &Schedule, node: NodeId, _config: &Config) -> PsyResult<()> {
        if wrapped_by(schedule, node, DirectiveKind::OmpParallelDo) {
            return Err(self.already_applied(schedule, node).into());
        }
        if let Some((_, d)) = schedule.tree.enclosing_directives(node).first() {
            let msg = if d.kind().is_acc() {
                "loop is inside an OpenACC region"
            } else {
                "loop is already inside an OpenMP parallel region"
            };
            return Err(self.inapplicable(schedule, node, msg).into());
        }
        let reductions = check_parallel_loop(self, schedule, node)?;
        if let Some(key) = reductions.first() {
            if !self.reprod && !self.allow_reassociation {
                return Err(self
                    .inapplicable(
                        schedule,
                        node,
                        format!(
                            "reduction into '{}' would change the order of floating-point sums; \
                             set reprod or allow_reassociation",
                            key
                        ),
                    )
                    .into());
            }
        }
        Ok(())
    }

    fn apply(&self, schedule: &mut Schedule, node: NodeId, _config: &Config) -> PsyResult<()> {
        let reductions = check_parallel_loop(self, schedule, node)?;
        debug!("omp parallel do over {} with reductions {:?}", schedule.tree.describe(node), reductions);
        let directive = Directive::OmpParallelDo {
            schedule: self.schedule.clone(),
            reprod: self.reprod && !reductions.is_empty(),
            reductions,
        };
        schedule.tree.wrap(node, node, NodeKind::Directive(directive));
        Ok(())
    }
}

/// Mark a loop as an OpenACC `loop` (inside a parallel region).
#[derive(Debug, Clone, PartialEq)]
pub struct AccLoop {
    pub independent: bool,
    pub gang: bool,
    pub vector: bool,
    pub collapse: u32,
}

impl AccLoop {
    pub fn new() -> Self {
        Self {
            independent: true,
            gang: false,
            vector: false,
            collapse: 1,
        }
    }

    pub fn from_options(options: &TransformOptions) -> PsyResult<Self> {
        Ok(Self {
            independent: options.bool("independent", true)?,
            gang: options.bool("gang", false)?,
            vector: options.bool("vector", false)?,
            collapse: options.unsigned("collapse", 1)?,
        })
    }
}

impl Default for AccLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for AccLoop {
    fn name(&self) -> &str {
        "acc_loop"
    }

    fn validate(&self, schedule: &Schedule, node: NodeId, _config: &Config) -> PsyResult<()> {
        if wrapped_by(schedule, node, DirectiveKind::AccLoop) {
            return Err(self.already_applied(schedule, node).into());
        }
        let tree = &schedule.tree;
        if tree.enclosing_directives(node).iter().any(|(_, d)| !d.kind().is_acc()) {
            return Err(self.inapplicable(schedule, node, "loop is inside an OpenMP region").into());
        }
        if tree.enclosing_directives(node).iter().any(|(_, d)| d.kind() == DirectiveKind::AccLoop) {
            return Err(self.inapplicable(schedule, node, "loop is nested in another OpenACC loop").into());
        }
        if self.collapse != 1 {
            return Err(self
                .inapplicable(schedule, node, format!("collapse({}) requested but the loop nest has depth 1", self.collapse))
                .into());
        }
        let reductions = check_parallel_loop(self, schedule, node)?;
        if let Some(key) = reductions.first() {
            return Err(self
                .inapplicable(
                    schedule,
                    node,
                    format!("reduction into '{}' is not reproducible on the device; use omp_parallel_do with reprod", key),
                )
                .into());
        }
        Ok(())
    }

    fn apply(&self, schedule: &mut Schedule, node: NodeId, _config: &Config) -> PsyResult<()> {
        let directive = Directive::AccLoop {
            independent: self.independent,
            gang: self.gang,
            vector: self.vector,
            collapse: self.collapse,
        };
        schedule.tree.wrap(node, node, NodeKind::Directive(directive));
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

    fn sched(kernel: Kernel, actuals: &[&str]) -> Schedule {
        let args = actuals.iter().map(|a| ActualArg::Variable(a.to_string())).collect();
        let inv = InvokeCall {
            name: "invoke_0".into(),
            label: None,
            index: 0,
            calls: vec![KernelInvocation::bind(kernel, args, Span::dummy())],
            span: Span::dummy(),
            unit: 0,
        };
        IrBuilder::new(&Config::default()).build(&inv)
    }

    fn w3_kernel() -> Kernel {
        Kernel::Standard(KernelSignature {
            name: "w3_type".into(),
            module: "w3_mod".into(),
            procedure: "w3_code".into(),
            args: vec![
                ArgumentDescriptor::field(DataType::Real, AccessMode::ReadWrite, FunctionSpace::W3),
                ArgumentDescriptor::field(DataType::Real, AccessMode::Read, FunctionSpace::W3),
            ],
            iteration_space: IterationSpace::CellColumn,
            code_source: None,
        })
    }

    fn loop_of(s: &Schedule) -> NodeId {
        s.tree.outermost_loops()[0]
    }

    #[test]
    fn test_omp_on_independent_loop() {
        let config = Config::default();
        let mut s = sched(w3_kernel(), &["a", "b"]);
        let l = loop_of(&s);
        let t = OmpParallelLoop::new();
        t.validate(&s, l, &config).unwrap();
        t.apply(&mut s, l, &config).unwrap();
        let p = s.tree.parent(l).unwrap();
        assert_eq!(
            s.tree.as_directive(p),
            Some(&Directive::OmpParallelDo { schedule: "static".into(), reprod: false, reductions: vec![] })
        );
        let again = t.validate(&s, l, &config).unwrap_err();
        assert!(matches!(again, PsyError::AlreadyTransformed(_)));
    }

    #[test]
    fn test_field_passed_twice_on_continuous_space_is_not_parallel() {
        let config = Config::default();
        let copy = Kernel::Standard(KernelSignature {
            name: "copy_w0_type".into(),
            module: "copy_w0_mod".into(),
            procedure: "copy_w0_code".into(),
            args: vec![
                ArgumentDescriptor::field(DataType::Real, AccessMode::Write, FunctionSpace::W0),
                ArgumentDescriptor::field(DataType::Real, AccessMode::Read, FunctionSpace::W0),
            ],
            iteration_space: IterationSpace::CellColumn,
            code_source: None,
        });
        let s = sched(copy, &["f", "f"]);
        let l = loop_of(&s);
        let err = OmpParallelLoop::new().validate(&s, l, &config).unwrap_err();
        assert!(matches!(err, PsyError::InapplicableTransformation(_)), "{}", err);
        let err = AccLoop::new().validate(&s, l, &config).unwrap_err();
        assert!(matches!(err, PsyError::InapplicableTransformation(_)), "{}", err);
    }

    #[test]
    fn test_omp_rejects_non_loop() {
        let config = Config::default();
        let s = sched(w3_kernel(), &["a", "b"]);
        let err = OmpParallelLoop::new().validate(&s, s.root(), &config).unwrap_err();
        assert!(err.to_string().contains("not a Loop"));
    }

    #[test]
    fn test_reduction_needs_opt_in() {
        let config = Config::default();
        let s = sched(Kernel::builtin(BuiltinOp::XInnerproductY), &["s", "x", "y"]);
        let l = loop_of(&s);
        let err = OmpParallelLoop::new().validate(&s, l, &config).unwrap_err();
        assert!(err.to_string().contains("reprod"));

        let opts = TransformOptions::new().with("reprod", true);
        let t = OmpParallelLoop::from_options(&opts).unwrap();
        t.validate(&s, l, &config).unwrap();
        let mut s2 = s.clone();
        t.apply(&mut s2, l, &config).unwrap();
        match s2.tree.as_directive(s2.tree.parent(l).unwrap()) {
            Some(Directive::OmpParallelDo { reprod, reductions, .. }) => {
                assert!(*reprod);
                assert_eq!(reductions, &vec!["s".to_string()]);
            }
            other => panic!("unexpected {:?}", other),
        }

        let assoc = OmpParallelLoop::from_options(&TransformOptions::new().with("allow_reassociation", true)).unwrap();
        assoc.validate(&s, l, &config).unwrap();
        assert!(AccLoop::new().validate(&s, l, &config).is_err());
    }

    #[test]
    fn test_bad_schedule_option() {
        let opts = TransformOptions::new().with("schedule", "chunky");
        assert!(OmpParallelLoop::from_options(&opts).is_err());
        let opts = TransformOptions::new().with("schedule", "Dynamic");
        assert_eq!(OmpParallelLoop::from_options(&opts).unwrap().schedule, "dynamic");
    }

    #[test]
    fn test_acc_loop_checks() {
        let config = Config::default();
        let mut s = sched(w3_kernel(), &["a", "b"]);
        let l = loop_of(&s);
        let collapse = AccLoop::from_options(&TransformOptions::new().with("collapse", 2)).unwrap();
        assert!(collapse.validate(&s, l, &config).is_err());

        let omp = OmpParallelLoop::new();
        omp.apply(&mut s, l, &config).unwrap();
        let err = AccLoop::new().validate(&s, l, &config).unwrap_err();
        assert!(err.to_string().contains("OpenMP"));
    }
}
