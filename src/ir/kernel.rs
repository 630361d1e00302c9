//! Kernel model: argument descriptors, signatures and the kernel registry.
//!
//! Kernel "type extends" polymorphism is flattened into the [`Kernel`]
//! variant; every variant answers [`Kernel::signature`].

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// How a kernel accesses an argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
    /// Increment: contributions are summed into shared dofs
    Inc,
    /// Accumulate into a reduction scalar
    Sum,
}

impl AccessMode {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "gh_read" => Some(AccessMode::Read),
            "gh_write" => Some(AccessMode::Write),
            "gh_readwrite" => Some(AccessMode::ReadWrite),
            "gh_inc" => Some(AccessMode::Inc),
            "gh_sum" => Some(AccessMode::Sum),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            AccessMode::Read => "gh_read",
            AccessMode::Write => "gh_write",
            AccessMode::ReadWrite => "gh_readwrite",
            AccessMode::Inc => "gh_inc",
            AccessMode::Sum => "gh_sum",
        }
    }

    /// Does the kernel observe the incoming value?
    pub fn reads(&self) -> bool {
        matches!(self, AccessMode::Read | AccessMode::ReadWrite | AccessMode::Inc | AccessMode::Sum)
    }

    pub fn writes(&self) -> bool {
        !matches!(self, AccessMode::Read)
    }

    /// Fortran dummy-argument intent for this access.
    pub fn intent(&self) -> &'static str {
        match self {
            AccessMode::Read => "in",
            AccessMode::Write => "out",
            _ => "inout",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccessMode::Read => "read",
            AccessMode::Write => "write",
            AccessMode::ReadWrite => "read-write",
            AccessMode::Inc => "increment",
            AccessMode::Sum => "sum",
        };
        write!(f, "{}", s)
    }
}

/// The argument form in `arg_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentKind {
    Field,
    Scalar,
    Operator,
}

impl ArgumentKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "gh_field" => Some(ArgumentKind::Field),
            "gh_scalar" => Some(ArgumentKind::Scalar),
            "gh_operator" => Some(ArgumentKind::Operator),
            _ => None,
        }
    }
}

impl fmt::Display for ArgumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgumentKind::Field => write!(f, "field"),
            ArgumentKind::Scalar => write!(f, "scalar"),
            ArgumentKind::Operator => write!(f, "operator"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Real,
    Integer,
    Logical,
}

impl DataType {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "gh_real" => Some(DataType::Real),
            "gh_integer" => Some(DataType::Integer),
            "gh_logical" => Some(DataType::Logical),
            _ => None,
        }
    }

    /// Fortran declaration type for scalars of this data type.
    pub fn fortran_type(&self) -> &'static str {
        match self {
            DataType::Real => "real(kind=r_def)",
            DataType::Integer => "integer(kind=i_def)",
            DataType::Logical => "logical(kind=l_def)",
        }
    }
}

/// Function space (data-space tag) of a field or operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FunctionSpace {
    W0,
    W1,
    W2,
    W2H,
    W2V,
    W3,
    WTheta,
    WChi,
    AnySpace(u32),
    AnyDiscontinuousSpace(u32),
}

impl FunctionSpace {
    pub fn from_tag(tag: &str) -> Option<Self> {
        let space = match tag {
            "w0" => FunctionSpace::W0,
            "w1" => FunctionSpace::W1,
            "w2" => FunctionSpace::W2,
            "w2h" => FunctionSpace::W2H,
            "w2v" => FunctionSpace::W2V,
            "w3" => FunctionSpace::W3,
            "wtheta" => FunctionSpace::WTheta,
            "wchi" => FunctionSpace::WChi,
            other => {
                if let Some(n) = other.strip_prefix("any_discontinuous_space_") {
                    FunctionSpace::AnyDiscontinuousSpace(n.parse().ok().filter(|n| *n > 0)?)
                } else if let Some(n) = other.strip_prefix("any_space_") {
                    FunctionSpace::AnySpace(n.parse().ok().filter(|n| *n > 0)?)
                } else {
                    return None;
                }
            }
        };
        Some(space)
    }

    /// Lower-case name used in generated identifiers (`ndf_w3`).
    pub fn name(&self) -> String {
        match self {
            FunctionSpace::W0 => "w0".into(),
            FunctionSpace::W1 => "w1".into(),
            FunctionSpace::W2 => "w2".into(),
            FunctionSpace::W2H => "w2h".into(),
            FunctionSpace::W2V => "w2v".into(),
            FunctionSpace::W3 => "w3".into(),
            FunctionSpace::WTheta => "wtheta".into(),
            FunctionSpace::WChi => "wchi".into(),
            FunctionSpace::AnySpace(n) => format!("aspc{}", n),
            FunctionSpace::AnyDiscontinuousSpace(n) => format!("adspc{}", n),
        }
    }

    /// Continuous spaces share dofs between neighbouring cells.
    pub fn is_continuous(&self) -> bool {
        matches!(
            self,
            FunctionSpace::W0
                | FunctionSpace::W1
                | FunctionSpace::W2
                | FunctionSpace::W2H
                | FunctionSpace::WChi
                | FunctionSpace::AnySpace(_)
        )
    }
}

impl fmt::Display for FunctionSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionSpace::AnySpace(n) => write!(f, "any_space_{}", n),
            FunctionSpace::AnyDiscontinuousSpace(n) => write!(f, "any_discontinuous_space_{}", n),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// Stencil shape attached to a read-only field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StencilShape {
    Cross,
    Region,
    X1D,
    Y1D,
    /// Direction chosen at run time; takes an extra direction argument
    XOrY1D,
}

impl StencilShape {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "cross" => Some(StencilShape::Cross),
            "region" => Some(StencilShape::Region),
            "x1d" => Some(StencilShape::X1D),
            "y1d" => Some(StencilShape::Y1D),
            "xory1d" => Some(StencilShape::XOrY1D),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            StencilShape::Cross => "cross",
            StencilShape::Region => "region",
            StencilShape::X1D => "x1d",
            StencilShape::Y1D => "y1d",
            StencilShape::XOrY1D => "xory1d",
        }
    }

    /// Number of actual arguments the call site supplies for the stencil.
    pub fn extra_actuals(&self) -> usize {
        match self {
            StencilShape::XOrY1D => 2,
            _ => 1,
        }
    }
}

/// Abstract iteration domain of a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationSpace {
    /// One call per column of cells
    CellColumn,
    /// Cell columns including a caller-specified depth of halo
    OwnedAndHaloCellColumn,
    /// One call per degree of freedom ("point")
    Dof,
    /// One call for the whole local domain
    Domain,
}

impl IterationSpace {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "cell_column" => Some(IterationSpace::CellColumn),
            "owned_and_halo_cell_column" => Some(IterationSpace::OwnedAndHaloCellColumn),
            "dof" => Some(IterationSpace::Dof),
            "domain" => Some(IterationSpace::Domain),
            _ => None,
        }
    }

    pub fn is_cell_column(&self) -> bool {
        matches!(self, IterationSpace::CellColumn | IterationSpace::OwnedAndHaloCellColumn)
    }

    /// Loop index variable used in generated code.
    pub fn loop_variable(&self) -> &'static str {
        match self {
            IterationSpace::Dof => "df",
            _ => "cell",
        }
    }
}

impl fmt::Display for IterationSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IterationSpace::CellColumn => "cell-column",
            IterationSpace::OwnedAndHaloCellColumn => "owned-and-halo-cell-column",
            IterationSpace::Dof => "point",
            IterationSpace::Domain => "whole-domain",
        };
        write!(f, "{}", s)
    }
}

/// One `arg_type(...)` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentDescriptor {
    pub kind: ArgumentKind,
    pub data_type: DataType,
    pub access: AccessMode,
    /// Field space, or the "to" space of an operator
    pub space: Option<FunctionSpace>,
    /// The "from" space of an operator
    pub from_space: Option<FunctionSpace>,
    pub stencil: Option<StencilShape>,
}

impl ArgumentDescriptor {
    pub fn field(data_type: DataType, access: AccessMode, space: FunctionSpace) -> Self {
        Self {
            kind: ArgumentKind::Field,
            data_type,
            access,
            space: Some(space),
            from_space: None,
            stencil: None,
        }
    }

    pub fn scalar(data_type: DataType, access: AccessMode) -> Self {
        Self {
            kind: ArgumentKind::Scalar,
            data_type,
            access,
            space: None,
            from_space: None,
            stencil: None,
        }
    }

    pub fn operator(access: AccessMode, to: FunctionSpace, from: FunctionSpace) -> Self {
        Self {
            kind: ArgumentKind::Operator,
            data_type: DataType::Real,
            access,
            space: Some(to),
            from_space: Some(from),
            stencil: None,
        }
    }

    pub fn with_stencil(mut self, stencil: StencilShape) -> Self {
        self.stencil = Some(stencil);
        self
    }

    pub fn is_field(&self) -> bool {
        self.kind == ArgumentKind::Field
    }

    pub fn is_scalar(&self) -> bool {
        self.kind == ArgumentKind::Scalar
    }

    pub fn is_operator(&self) -> bool {
        self.kind == ArgumentKind::Operator
    }

    /// Spaces this argument touches, in declaration order.
    pub fn spaces(&self) -> Vec<FunctionSpace> {
        self.space.into_iter().chain(self.from_space).collect()
    }
}

/// Quadrature/evaluator shape for basis-function evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluatorShape {
    QuadratureXyoz,
    Evaluator,
}

impl EvaluatorShape {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "gh_quadrature_xyoz" => Some(EvaluatorShape::QuadratureXyoz),
            "gh_evaluator" => Some(EvaluatorShape::Evaluator),
            _ => None,
        }
    }
}

/// One `func_type(space, GH_BASIS, GH_DIFF_BASIS)` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasisRequest {
    pub space: FunctionSpace,
    pub basis: bool,
    pub diff_basis: bool,
}

/// Call-site arguments that follow the declared ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraArgument {
    /// Stencil extent for the declared argument at this index
    StencilExtent(usize),
    /// Stencil direction for an `XORY1D` argument at this index
    StencilDirection(usize),
    Quadrature,
    HaloDepth,
}

/// Name, ordered arguments and iteration domain of a kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSignature {
    /// Kernel type name, lower case (`update_field_type`)
    pub name: String,
    /// Module that defines it
    pub module: String,
    /// Code subroutine bound to the type
    pub procedure: String,
    pub args: Vec<ArgumentDescriptor>,
    pub iteration_space: IterationSpace,
    /// Source of the code subroutine, kept for module inlining
    #[serde(skip)]
    pub code_source: Option<String>,
}

impl KernelSignature {
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// Distinct function spaces in first-appearance order.
    pub fn unique_spaces(&self) -> Vec<FunctionSpace> {
        let mut spaces = Vec::new();
        for arg in &self.args {
            for sp in arg.spaces() {
                if !spaces.contains(&sp) {
                    spaces.push(sp);
                }
            }
        }
        spaces
    }

    pub fn has_reduction(&self) -> bool {
        self.args.iter().any(|a| a.access == AccessMode::Sum)
    }

    pub fn has_stencil(&self) -> bool {
        self.args.iter().any(|a| a.stencil.is_some())
    }
}

/// Built-in operations that need no metadata file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinOp {
    SetvalC,
    SetvalX,
    IncXPlusY,
    IncATimesX,
    XInnerproductY,
}

static BUILTINS: Lazy<BTreeMap<&'static str, BuiltinOp>> = Lazy::new(|| {
    BTreeMap::from([
        ("setval_c", BuiltinOp::SetvalC),
        ("setval_x", BuiltinOp::SetvalX),
        ("inc_x_plus_y", BuiltinOp::IncXPlusY),
        ("inc_a_times_x", BuiltinOp::IncATimesX),
        ("x_innerproduct_y", BuiltinOp::XInnerproductY),
    ])
});

impl BuiltinOp {
    pub fn from_name(name: &str) -> Option<Self> {
        BUILTINS.get(name.to_ascii_lowercase().as_str()).copied()
    }

    pub fn names() -> impl Iterator<Item = &'static str> {
        BUILTINS.keys().copied()
    }

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinOp::SetvalC => "setval_c",
            BuiltinOp::SetvalX => "setval_x",
            BuiltinOp::IncXPlusY => "inc_x_plus_y",
            BuiltinOp::IncATimesX => "inc_a_times_x",
            BuiltinOp::XInnerproductY => "x_innerproduct_y",
        }
    }

    pub fn signature(&self) -> KernelSignature {
        use AccessMode::*;
        let sp = FunctionSpace::AnySpace(1);
        let field = |access| ArgumentDescriptor::field(DataType::Real, access, sp);
        let scalar = |access| ArgumentDescriptor::scalar(DataType::Real, access);
        let args = match self {
            BuiltinOp::SetvalC => vec![field(Write), scalar(Read)],
            BuiltinOp::SetvalX => vec![field(Write), field(Read)],
            BuiltinOp::IncXPlusY => vec![field(ReadWrite), field(Read)],
            BuiltinOp::IncATimesX => vec![scalar(Read), field(ReadWrite)],
            BuiltinOp::XInnerproductY => vec![scalar(Sum), field(Read), field(Read)],
        };
        KernelSignature {
            name: self.name().to_string(),
            module: String::new(),
            procedure: self.name().to_string(),
            args,
            iteration_space: IterationSpace::Dof,
            code_source: None,
        }
    }
}

/// A kernel, tagged by its capability set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kernel {
    Standard(KernelSignature),
    Evaluator {
        signature: KernelSignature,
        shapes: Vec<EvaluatorShape>,
        funcs: Vec<BasisRequest>,
    },
    Operator(KernelSignature),
    Builtin {
        op: BuiltinOp,
        signature: KernelSignature,
    },
}

impl Kernel {
    pub fn builtin(op: BuiltinOp) -> Self {
        Kernel::Builtin { op, signature: op.signature() }
    }

    pub fn signature(&self) -> &KernelSignature {
        match self {
            Kernel::Standard(sig) | Kernel::Operator(sig) => sig,
            Kernel::Evaluator { signature, .. } | Kernel::Builtin { signature, .. } => signature,
        }
    }

    pub fn signature_mut(&mut self) -> &mut KernelSignature {
        match self {
            Kernel::Standard(sig) | Kernel::Operator(sig) => sig,
            Kernel::Evaluator { signature, .. } | Kernel::Builtin { signature, .. } => signature,
        }
    }

    pub fn name(&self) -> &str {
        &self.signature().name
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, Kernel::Builtin { .. })
    }

    pub fn builtin_op(&self) -> Option<BuiltinOp> {
        match self {
            Kernel::Builtin { op, .. } => Some(*op),
            _ => None,
        }
    }

    pub fn variant_name(&self) -> &'static str {
        match self {
            Kernel::Standard(_) => "standard",
            Kernel::Evaluator { .. } => "evaluator",
            Kernel::Operator(_) => "operator",
            Kernel::Builtin { .. } => "builtin",
        }
    }

    pub fn requires_quadrature(&self) -> bool {
        match self {
            Kernel::Evaluator { shapes, .. } => shapes.contains(&EvaluatorShape::QuadratureXyoz),
            _ => false,
        }
    }

    pub fn basis_requests(&self) -> &[BasisRequest] {
        match self {
            Kernel::Evaluator { funcs, .. } => funcs,
            _ => &[],
        }
    }

    /// Call-site arguments expected after the declared ones, in order.
    pub fn extra_arguments(&self) -> Vec<ExtraArgument> {
        let sig = self.signature();
        let mut extras = Vec::new();
        for (i, arg) in sig.args.iter().enumerate() {
            if let Some(stencil) = arg.stencil {
                extras.push(ExtraArgument::StencilExtent(i));
                if stencil == StencilShape::XOrY1D {
                    extras.push(ExtraArgument::StencilDirection(i));
                }
            }
        }
        if self.requires_quadrature() {
            extras.push(ExtraArgument::Quadrature);
        }
        if sig.iteration_space == IterationSpace::OwnedAndHaloCellColumn {
            extras.push(ExtraArgument::HaloDepth);
        }
        extras
    }

    /// Number of actual arguments an invoke must supply.
    pub fn expected_actual_count(&self) -> usize {
        self.signature().arg_count() + self.extra_arguments().len()
    }
}

/// All kernels known to a run, keyed by lower-case type name.
#[derive(Debug, Clone, Default)]
pub struct KernelRegistry {
    kernels: HashMap<String, Kernel>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kernel: Kernel) {
        self.kernels.insert(kernel.name().to_ascii_lowercase(), kernel);
    }

    pub fn extend(&mut self, kernels: impl IntoIterator<Item = Kernel>) {
        for k in kernels {
            self.insert(k);
        }
    }

    /// Look up a kernel type; built-in names resolve without registration.
    pub fn get(&self, name: &str) -> Option<Kernel> {
        let key = name.to_ascii_lowercase();
        if let Some(k) = self.kernels.get(&key) {
            return Some(k.clone());
        }
        BuiltinOp::from_name(&key).map(Kernel::builtin)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    /// Registered kernels sorted by name.
    pub fn kernels(&self) -> Vec<&Kernel> {
        let mut ks: Vec<&Kernel> = self.kernels.values().collect();
        ks.sort_by(|a, b| a.name().cmp(b.name()));
        ks
    }

    /// Closest known name within a small edit distance.
    pub fn suggest(&self, name: &str) -> Option<String> {
        let target = name.to_ascii_lowercase();
        self.kernels
            .keys()
            .cloned()
            .chain(BuiltinOp::names().map(str::to_string))
            .map(|k| (edit_distance(&target, &k), k))
            .filter(|(d, k)| *d <= 3.max(k.len() / 4))
            .min()
            .map(|(_, k)| k)
    }
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut cur = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == *cb { 0 } else { 1 };
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        prev = cur;
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stencil_kernel() -> Kernel {
        Kernel::Standard(KernelSignature {
            name: "testkern_stencil_type".into(),
            module: "testkern_stencil_mod".into(),
            procedure: "testkern_stencil_code".into(),
            args: vec![
                ArgumentDescriptor::field(DataType::Real, AccessMode::Write, FunctionSpace::W3),
                ArgumentDescriptor::field(DataType::Real, AccessMode::Read, FunctionSpace::W3)
                    .with_stencil(StencilShape::XOrY1D),
                ArgumentDescriptor::field(DataType::Real, AccessMode::Read, FunctionSpace::W2)
                    .with_stencil(StencilShape::Cross),
            ],
            iteration_space: IterationSpace::OwnedAndHaloCellColumn,
            code_source: None,
        })
    }

    #[test]
    fn test_space_tags() {
        assert_eq!(FunctionSpace::from_tag("any_space_3"), Some(FunctionSpace::AnySpace(3)));
        assert_eq!(
            FunctionSpace::from_tag("any_discontinuous_space_1"),
            Some(FunctionSpace::AnyDiscontinuousSpace(1))
        );
        assert_eq!(FunctionSpace::from_tag("any_space_0"), None);
        assert_eq!(FunctionSpace::from_tag("w4"), None);
        assert!(FunctionSpace::W0.is_continuous());
        assert!(!FunctionSpace::W3.is_continuous());
        assert!(!FunctionSpace::W2V.is_continuous());
        assert_eq!(FunctionSpace::AnySpace(1).name(), "aspc1");
    }

    #[test]
    fn test_extra_arguments_order() {
        let k = stencil_kernel();
        assert_eq!(
            k.extra_arguments(),
            vec![
                ExtraArgument::StencilExtent(1),
                ExtraArgument::StencilDirection(1),
                ExtraArgument::StencilExtent(2),
                ExtraArgument::HaloDepth,
            ]
        );
        assert_eq!(k.expected_actual_count(), 7);
    }

    #[test]
    fn test_builtin_resolution() {
        let reg = KernelRegistry::new();
        let k = reg.get("SetVal_C").unwrap();
        assert!(k.is_builtin());
        assert_eq!(k.signature().iteration_space, IterationSpace::Dof);
        assert_eq!(k.signature().args[0].access, AccessMode::Write);
        assert!(reg.get("nope_type").is_none());
    }

    #[test]
    fn test_suggestion() {
        let mut reg = KernelRegistry::new();
        reg.insert(stencil_kernel());
        assert_eq!(reg.suggest("testkern_stencl_type").as_deref(), Some("testkern_stencil_type"));
        assert_eq!(reg.suggest("completely_different_thing"), None);
        assert_eq!(KernelRegistry::new().suggest("SETVAL_CC").as_deref(), Some("setval_c"));
    }

    #[test]
    fn test_unique_spaces() {
        let k = stencil_kernel();
        assert_eq!(k.signature().unique_spaces(), vec![FunctionSpace::W3, FunctionSpace::W2]);
        let op = ArgumentDescriptor::operator(AccessMode::Write, FunctionSpace::W0, FunctionSpace::W3);
        assert_eq!(op.spaces(), vec![FunctionSpace::W0, FunctionSpace::W3]);
    }
}
