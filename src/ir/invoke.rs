//! Invoke model: resolved kernel invocations and their actual arguments.

use crate::ir::kernel::{
    AccessMode, ArgumentDescriptor, ArgumentKind, DataType, ExtraArgument, FunctionSpace, Kernel,
};
use crate::utils::location::Span;
use serde::Serialize;
use std::fmt;

/// An actual argument as written at the call site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "form", content = "text", rename_all = "snake_case")]
pub enum ActualArg {
    /// A name, optionally with `%` components and subscripts
    Variable(String),
    /// A numeric, logical or character literal
    Literal(String),
    /// Anything else
    Expression(String),
}

impl ActualArg {
    pub fn text(&self) -> &str {
        match self {
            ActualArg::Variable(s) | ActualArg::Literal(s) | ActualArg::Expression(s) => s,
        }
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, ActualArg::Variable(_))
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, ActualArg::Literal(_))
    }

    /// Case- and blank-insensitive key identifying the logical data.
    pub fn key(&self) -> String {
        self.text()
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| c.to_ascii_lowercase())
            .collect()
    }
}

impl fmt::Display for ActualArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text())
    }
}

/// A declared argument paired with its actual.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundArg {
    /// 0-based declaration position
    pub position: usize,
    pub descriptor: ArgumentDescriptor,
    pub actual: ActualArg,
    pub stencil_extent: Option<ActualArg>,
    pub stencil_direction: Option<ActualArg>,
}

impl BoundArg {
    pub fn access(&self) -> AccessMode {
        self.descriptor.access
    }

    pub fn is_field(&self) -> bool {
        self.descriptor.is_field()
    }

    pub fn key(&self) -> String {
        self.actual.key()
    }
}

/// One kernel reference inside an invoke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelInvocation {
    pub kernel: Kernel,
    pub args: Vec<BoundArg>,
    pub quadrature: Option<ActualArg>,
    pub halo_depth: Option<ActualArg>,
    pub span: Span,
}

impl KernelInvocation {
    /// Bind `actuals` (declared arguments followed by extras) to `kernel`.
    /// The count must already have been checked.
    pub fn bind(kernel: Kernel, actuals: Vec<ActualArg>, span: Span) -> Self {
        let declared = kernel.signature().arg_count();
        let mut actuals = actuals.into_iter();
        let mut args: Vec<BoundArg> = kernel
            .signature()
            .args
            .iter()
            .cloned()
            .enumerate()
            .zip(actuals.by_ref().take(declared))
            .map(|((position, descriptor), actual)| BoundArg {
                position,
                descriptor,
                actual,
                stencil_extent: None,
                stencil_direction: None,
            })
            .collect();

        let mut quadrature = None;
        let mut halo_depth = None;
        for (extra, actual) in kernel.extra_arguments().into_iter().zip(actuals) {
            match extra {
                ExtraArgument::StencilExtent(i) => args[i].stencil_extent = Some(actual),
                ExtraArgument::StencilDirection(i) => args[i].stencil_direction = Some(actual),
                ExtraArgument::Quadrature => quadrature = Some(actual),
                ExtraArgument::HaloDepth => halo_depth = Some(actual),
            }
        }
        Self { kernel, args, quadrature, halo_depth, span }
    }

    pub fn name(&self) -> &str {
        self.kernel.name()
    }

    pub fn fields(&self) -> impl Iterator<Item = &BoundArg> {
        self.args.iter().filter(|a| a.is_field())
    }

    /// Every actual in call-site order, extras included.
    pub fn all_actuals(&self) -> Vec<&ActualArg> {
        let mut out: Vec<&ActualArg> = self.args.iter().map(|a| &a.actual).collect();
        for extra in self.kernel.extra_arguments() {
            let actual = match extra {
                ExtraArgument::StencilExtent(i) => self.args[i].stencil_extent.as_ref(),
                ExtraArgument::StencilDirection(i) => self.args[i].stencil_direction.as_ref(),
                ExtraArgument::Quadrature => self.quadrature.as_ref(),
                ExtraArgument::HaloDepth => self.halo_depth.as_ref(),
            };
            out.extend(actual);
        }
        out
    }
}

/// What an invoke-level argument is, for declaring it in the compute layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgRole {
    Field { space: FunctionSpace },
    Operator { to: FunctionSpace, from: FunctionSpace },
    Scalar { data_type: DataType },
    StencilExtent,
    StencilDirection,
    Quadrature,
    HaloDepth,
}

impl ArgRole {
    fn of(desc: &ArgumentDescriptor) -> Self {
        match desc.kind {
            ArgumentKind::Field => ArgRole::Field {
                space: desc.space.unwrap_or(FunctionSpace::AnySpace(1)),
            },
            ArgumentKind::Operator => ArgRole::Operator {
                to: desc.space.unwrap_or(FunctionSpace::AnySpace(1)),
                from: desc.from_space.unwrap_or(FunctionSpace::AnySpace(1)),
            },
            ArgumentKind::Scalar => ArgRole::Scalar { data_type: desc.data_type },
        }
    }
}

/// A unique non-literal argument of the generated invoke subroutine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvokeArgument {
    pub actual: ActualArg,
    pub role: ArgRole,
    /// Whether any call writes it
    pub written: bool,
    /// Whether a call reduces into it
    pub reduced: bool,
}

impl InvokeArgument {
    pub fn intent(&self) -> &'static str {
        if self.written {
            "inout"
        } else {
            "in"
        }
    }

    pub fn is_field(&self) -> bool {
        matches!(self.role, ArgRole::Field { .. })
    }

    pub fn is_operator(&self) -> bool {
        matches!(self.role, ArgRole::Operator { .. })
    }
}

/// A parsed and resolved `call invoke(...)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeCall {
    /// Generated subroutine name (`invoke_0_testkern_type`)
    pub name: String,
    pub label: Option<String>,
    /// Position among the invokes of the file, from 0
    pub index: usize,
    pub calls: Vec<KernelInvocation>,
    /// Span of the whole call statement
    pub span: Span,
    /// Program unit containing the call
    pub unit: usize,
}

impl InvokeCall {
    /// Unique non-literal actuals in first-appearance order.
    pub fn arguments(&self) -> Vec<InvokeArgument> {
        let mut out: Vec<InvokeArgument> = Vec::new();
        let mut add = |actual: &ActualArg, role: ArgRole, access: AccessMode| {
            if actual.is_literal() {
                return;
            }
            let key = actual.key();
            if let Some(existing) = out.iter_mut().find(|a| a.actual.key() == key) {
                existing.written |= access.writes();
                existing.reduced |= access == AccessMode::Sum;
                return;
            }
            out.push(InvokeArgument {
                actual: actual.clone(),
                role,
                written: access.writes(),
                reduced: access == AccessMode::Sum,
            });
        };

        for call in &self.calls {
            for arg in &call.args {
                add(&arg.actual, ArgRole::of(&arg.descriptor), arg.access());
            }
            for extra in call.kernel.extra_arguments() {
                match extra {
                    ExtraArgument::StencilExtent(i) => {
                        if let Some(a) = &call.args[i].stencil_extent {
                            add(a, ArgRole::StencilExtent, AccessMode::Read);
                        }
                    }
                    ExtraArgument::StencilDirection(i) => {
                        if let Some(a) = &call.args[i].stencil_direction {
                            add(a, ArgRole::StencilDirection, AccessMode::Read);
                        }
                    }
                    ExtraArgument::Quadrature => {
                        if let Some(a) = &call.quadrature {
                            add(a, ArgRole::Quadrature, AccessMode::Read);
                        }
                    }
                    ExtraArgument::HaloDepth => {
                        if let Some(a) = &call.halo_depth {
                            add(a, ArgRole::HaloDepth, AccessMode::Read);
                        }
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::kernel::{IterationSpace, KernelSignature, StencilShape};

    fn var(s: &str) -> ActualArg {
        ActualArg::Variable(s.to_string())
    }

    fn stencil_kernel() -> Kernel {
        Kernel::Standard(KernelSignature {
            name: "stencil_type".into(),
            module: "stencil_mod".into(),
            procedure: "stencil_code".into(),
            args: vec![
                ArgumentDescriptor::field(DataType::Real, AccessMode::Write, FunctionSpace::W3),
                ArgumentDescriptor::field(DataType::Real, AccessMode::Read, FunctionSpace::W3)
                    .with_stencil(StencilShape::XOrY1D),
                ArgumentDescriptor::scalar(DataType::Real, AccessMode::Read),
            ],
            iteration_space: IterationSpace::CellColumn,
            code_source: None,
        })
    }

    #[test]
    fn test_bind_distributes_extras() {
        let call = KernelInvocation::bind(
            stencil_kernel(),
            vec![var("a"), var("b"), ActualArg::Literal("1.0_r_def".into()), var("ext"), var("dir")],
            Span::dummy(),
        );
        assert_eq!(call.args[1].stencil_extent, Some(var("ext")));
        assert_eq!(call.args[1].stencil_direction, Some(var("dir")));
        assert_eq!(call.all_actuals().len(), 5);
        assert_eq!(call.fields().count(), 2);
    }

    #[test]
    fn test_invoke_arguments_are_unique_and_skip_literals() {
        let k = stencil_kernel();
        let c1 = KernelInvocation::bind(
            k.clone(),
            vec![var("a"), var("B"), ActualArg::Literal("2".into()), var("ext"), var("dir")],
            Span::dummy(),
        );
        let c2 = KernelInvocation::bind(
            k,
            vec![var("b"), var("a"), var("s"), var("ext"), var("dir")],
            Span::dummy(),
        );
        let invoke = InvokeCall {
            name: "invoke_0".into(),
            label: None,
            index: 0,
            calls: vec![c1, c2],
            span: Span::dummy(),
            unit: 0,
        };
        let args = invoke.arguments();
        let names: Vec<_> = args.iter().map(|a| a.actual.text()).collect();
        assert_eq!(names, vec!["a", "B", "ext", "dir", "s"]);
        assert!(args[1].written, "b is written by the second call");
        assert_eq!(args[2].role, ArgRole::StencilExtent);
    }

    #[test]
    fn test_key_normalises() {
        assert_eq!(ActualArg::Variable("State % U".into()).key(), "state%u");
    }
}
