//! Compute-layer (PSy) module generation.
//!
//! One subroutine per invoke. Each subroutine is written in four parts:
//! declarations, set-up (proxies, dofmaps, stencils, basis functions,
//! loop bounds), the call tree itself, and tear-down. Names are worked
//! out once per invoke by [`InvokeContext`] before anything is written,
//! so a name that cannot be expressed fails generation up front.

use crate::codegen::names::{sanitize, NameTable};
use crate::config::Config;
use crate::ir::invoke::{ActualArg, ArgRole, BoundArg, KernelInvocation};
use crate::ir::kernel::{
    AccessMode, ArgumentKind, BuiltinOp, DataType, EvaluatorShape, FunctionSpace, IterationSpace, Kernel,
    StencilShape,
};
use crate::ir::tree::{Directive, KernelCallNode, NodeId, NodeKind, Schedule, UpperBound};
use crate::utils::errors::{CodegenError, CodegenErrorKind, PsyResult};
use crate::utils::pretty::CodeFormatter;
use log::debug;
use std::collections::HashMap;

/// Generated names that dummy arguments must not take.
const RESERVED: &[&str] = &[
    "cell",
    "df",
    "colour",
    "nlayers",
    "ncell_2d",
    "mesh",
    "ncolour",
    "cmap",
    "last_edge_cell_all_colours",
    "last_halo_cell_all_colours",
    "global_sum",
    "th_idx",
    "nthreads",
    "df_nodal",
];

fn unsupported(message: impl Into<String>) -> CodegenError {
    CodegenError::new(CodegenErrorKind::UnsupportedFeature, message)
}

fn zero_of(data_type: DataType) -> &'static str {
    match data_type {
        DataType::Integer => "0_i_def",
        _ => "0.0_r_def",
    }
}

fn field_types(data_type: DataType) -> Result<(&'static str, &'static str), CodegenError> {
    match data_type {
        DataType::Real => Ok(("field_type", "field_proxy_type")),
        DataType::Integer => Ok(("integer_field_type", "integer_field_proxy_type")),
        DataType::Logical => Err(unsupported("logical-valued fields have no field type in the compute layer")),
    }
}

/// Named constant for a fixed-direction stencil.
fn stencil_constant(shape: StencilShape) -> &'static str {
    match shape {
        StencilShape::Cross => "stencil_cross",
        StencilShape::Region => "stencil_region",
        StencilShape::X1D | StencilShape::XOrY1D => "stencil_1dx",
        StencilShape::Y1D => "stencil_1dy",
    }
}

/// A function space as seen by one invoke.
#[derive(Debug, Clone, PartialEq)]
struct SpaceRef {
    space: FunctionSpace,
    /// Suffix of `ndf_`, `undf_` and `map_` (`w3`, `aspc1_f1`)
    ident: String,
    /// Expression giving the function space object
    vspace: String,
    /// Some field lives on it (operators only need `ndf`)
    has_field: bool,
}

#[derive(Debug, Clone)]
struct StencilRef {
    field_key: String,
    extent_key: String,
    prefix: String,
    vspace: String,
    shape: StencilShape,
    extent: String,
    direction: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum BasisSource {
    Quadrature(String),
    Nodal { target_ident: String, target_vspace: String },
}

#[derive(Debug, Clone)]
struct BasisRef {
    name: String,
    dim: String,
    space: SpaceRef,
    diff: bool,
    source: BasisSource,
}

#[derive(Debug, Clone)]
struct Reduction {
    key: String,
    name: String,
    data_type: DataType,
}

/// Per-node emission state.
#[derive(Debug, Clone, Default)]
struct Scope {
    /// Cell index expression for dofmap look-ups
    cell: Option<String>,
    in_acc_parallel: bool,
    /// Reduction variables redirected to per-thread partial sums
    partial_sums: HashMap<String, String>,
}

/// Everything about one invoke that is worked out before writing.
struct InvokeContext<'a> {
    config: &'a Config,
    schedule: &'a Schedule,
    names: NameTable,
    dummies: Vec<String>,
    loops: Vec<(NodeId, usize)>,
    spaces: Vec<SpaceRef>,
    stencils: Vec<StencilRef>,
    quadratures: Vec<String>,
    bases: Vec<BasisRef>,
    partial_sums: Vec<Reduction>,
    anchor: Option<String>,
    needs_mesh: bool,
    has_domain: bool,
    has_cell_kernels: bool,
}

impl<'a> InvokeContext<'a> {
    fn new(config: &'a Config, schedule: &'a Schedule) -> PsyResult<Self> {
        let mut names = NameTable::new();
        for r in RESERVED {
            names.reserve(r);
        }
        let mut dummies = Vec::with_capacity(schedule.arguments.len());
        for arg in &schedule.arguments {
            dummies.push(names.name_for(&arg.actual.key(), arg.actual.text())?);
        }

        let mut ctx = Self {
            config,
            schedule,
            names,
            dummies,
            loops: Vec::new(),
            spaces: Vec::new(),
            stencils: Vec::new(),
            quadratures: Vec::new(),
            bases: Vec::new(),
            partial_sums: Vec::new(),
            anchor: None,
            needs_mesh: false,
            has_domain: false,
            has_cell_kernels: false,
        };
        ctx.anchor = schedule
            .arguments
            .iter()
            .zip(&ctx.dummies)
            .find_map(|(a, d)| match a.role {
                ArgRole::Field { .. } => Some(format!("{}_proxy%vspace", d)),
                ArgRole::Operator { .. } => Some(format!("{}_proxy%fs_from", d)),
                _ => None,
            });

        let tree = &schedule.tree;
        let mut index = 0;
        for id in tree.walk(tree.root()) {
            if let Some(l) = tree.as_loop(id) {
                if l.upper != UpperBound::Single {
                    ctx.loops.push((id, index));
                    index += 1;
                }
                if l.is_colour_loop() || (config.distributed_memory && l.space.is_cell_column()) {
                    ctx.needs_mesh = true;
                }
            }
            if let Some(Directive::OmpParallelDo { reprod: true, reductions, .. }) = tree.as_directive(id) {
                for key in reductions {
                    if ctx.partial_sums.iter().any(|r| &r.key == key) {
                        continue;
                    }
                    let name = ctx.name_of_key(key).to_string();
                    let data_type = ctx.scalar_type(key);
                    ctx.partial_sums.push(Reduction { key: key.clone(), name, data_type });
                }
            }
        }

        for call in tree.calls_under(tree.root()) {
            let inv = &call.invocation;
            let space = inv.kernel.signature().iteration_space;
            if space == IterationSpace::Dof {
                continue;
            }
            ctx.has_cell_kernels = true;
            if space == IterationSpace::Domain {
                ctx.has_domain = true;
                ctx.needs_mesh = true;
            }
            for sp in ctx.call_spaces(inv) {
                match ctx.spaces.iter_mut().find(|s| s.ident == sp.ident) {
                    Some(existing) => {
                        if sp.has_field && !existing.has_field {
                            existing.has_field = true;
                            existing.vspace = sp.vspace;
                        }
                    }
                    None => ctx.spaces.push(sp),
                }
            }
            ctx.collect_stencils(inv);
            ctx.collect_bases(inv)?;
        }
        if (ctx.has_cell_kernels || ctx.needs_mesh) && ctx.anchor.is_none() {
            return Err(unsupported(format!("{} has no field or operator to take the mesh from", schedule.name)).into());
        }
        debug!(
            "{}: {} loop(s), {} space(s), {} stencil(s), {} basis array(s)",
            schedule.name,
            ctx.loops.len(),
            ctx.spaces.len(),
            ctx.stencils.len(),
            ctx.bases.len()
        );
        Ok(ctx)
    }

    fn dm(&self) -> bool {
        self.config.distributed_memory
    }

    fn name_of_key<'k>(&'k self, key: &'k str) -> &'k str {
        self.names.get(key).unwrap_or(key)
    }

    fn name_of(&self, actual: &ActualArg) -> String {
        match self.names.get(&actual.key()) {
            Some(n) => n.to_string(),
            None => actual.text().to_string(),
        }
    }

    /// Literal text, or the dummy argument holding the value.
    fn value_of(&self, actual: &ActualArg, scope: &Scope) -> String {
        if actual.is_literal() {
            return actual.text().to_string();
        }
        let key = actual.key();
        match scope.partial_sums.get(&key) {
            Some(expr) => expr.clone(),
            None => self.name_of(actual),
        }
    }

    /// Halo depths are literals or the text of an actual argument.
    fn depth_expr(&self, text: &str) -> String {
        let key: String = text.chars().filter(|c| !c.is_whitespace()).map(|c| c.to_ascii_lowercase()).collect();
        self.names.get(&key).map(String::from).unwrap_or_else(|| text.to_string())
    }

    fn scalar_type(&self, key: &str) -> DataType {
        self.schedule
            .arguments
            .iter()
            .find_map(|a| match a.role {
                ArgRole::Scalar { data_type } if a.actual.key() == key => Some(data_type),
                _ => None,
            })
            .unwrap_or(DataType::Real)
    }

    fn field_type(&self, key: &str) -> DataType {
        self.schedule
            .invoke
            .calls
            .iter()
            .flat_map(|c| c.fields())
            .find(|a| a.key() == key)
            .map(|a| a.descriptor.data_type)
            .unwrap_or(DataType::Real)
    }

    /// Function spaces of one call in first-appearance order.
    fn call_spaces(&self, inv: &KernelInvocation) -> Vec<SpaceRef> {
        let mut out: Vec<SpaceRef> = Vec::new();
        for arg in &inv.args {
            let name = self.name_of(&arg.actual);
            let entries: Vec<(FunctionSpace, String, bool)> = match arg.descriptor.kind {
                ArgumentKind::Field => arg
                    .descriptor
                    .space
                    .map(|sp| (sp, format!("{}_proxy%vspace", name), true))
                    .into_iter()
                    .collect(),
                ArgumentKind::Operator => {
                    let mut v = Vec::new();
                    if let Some(to) = arg.descriptor.space {
                        v.push((to, format!("{}_proxy%fs_to", name), false));
                    }
                    if let Some(from) = arg.descriptor.from_space {
                        v.push((from, format!("{}_proxy%fs_from", name), false));
                    }
                    v
                }
                ArgumentKind::Scalar => Vec::new(),
            };
            for (space, vspace, field) in entries {
                match out.iter_mut().find(|s| s.space == space) {
                    Some(existing) => {
                        if field && !existing.has_field {
                            existing.has_field = true;
                            existing.vspace = vspace;
                        }
                    }
                    None => {
                        let ident = match space {
                            FunctionSpace::AnySpace(_) | FunctionSpace::AnyDiscontinuousSpace(_) => {
                                format!("{}_{}", space.name(), name)
                            }
                            _ => space.name(),
                        };
                        out.push(SpaceRef { space, ident, vspace, has_field: field });
                    }
                }
            }
        }
        out
    }

    /// Function space object of the first field or operator of a call.
    fn call_vspace(&self, inv: &KernelInvocation) -> Option<String> {
        inv.args.iter().find_map(|a| {
            let name = self.name_of(&a.actual);
            match a.descriptor.kind {
                ArgumentKind::Field => Some(format!("{}_proxy%vspace", name)),
                ArgumentKind::Operator => Some(format!("{}_proxy%fs_from", name)),
                ArgumentKind::Scalar => None,
            }
        })
    }

    fn collect_stencils(&mut self, inv: &KernelInvocation) {
        for arg in inv.args.iter().filter(|a| a.descriptor.stencil.is_some()) {
            let (Some(shape), Some(extent)) = (arg.descriptor.stencil, &arg.stencil_extent) else {
                continue;
            };
            let field_key = arg.key();
            let extent_key = extent.key();
            if self.stencils.iter().any(|s| s.field_key == field_key && s.extent_key == extent_key) {
                continue;
            }
            let name = self.name_of(&arg.actual);
            let same_field = self.stencils.iter().filter(|s| s.field_key == field_key).count();
            let prefix = if same_field == 0 { name.clone() } else { format!("{}_{}", name, same_field + 1) };
            let extent = self.value_of(extent, &Scope::default());
            let direction = arg.stencil_direction.as_ref().map(|d| self.value_of(d, &Scope::default()));
            self.stencils.push(StencilRef {
                field_key,
                extent_key,
                prefix,
                vspace: format!("{}_proxy%vspace", name),
                shape,
                extent,
                direction,
            });
        }
    }

    fn stencil_for(&self, arg: &BoundArg) -> Option<&StencilRef> {
        let extent_key = arg.stencil_extent.as_ref()?.key();
        let field_key = arg.key();
        self.stencils.iter().find(|s| s.field_key == field_key && s.extent_key == extent_key)
    }

    /// Basis arrays a call needs, in the order they are passed.
    fn call_bases(&self, inv: &KernelInvocation) -> Result<Vec<BasisRef>, CodegenError> {
        let Kernel::Evaluator { shapes, funcs, .. } = &inv.kernel else {
            return Ok(Vec::new());
        };
        let spaces = self.call_spaces(inv);
        let source = if shapes.contains(&EvaluatorShape::QuadratureXyoz) {
            let qr = inv
                .quadrature
                .as_ref()
                .ok_or_else(|| unsupported(format!("{} needs a quadrature argument", inv.name())))?;
            BasisSource::Quadrature(self.name_of(qr))
        } else {
            let target = inv
                .fields()
                .find(|a| a.access().writes())
                .and_then(|a| a.descriptor.space)
                .and_then(|sp| spaces.iter().find(|s| s.space == sp))
                .ok_or_else(|| unsupported(format!("{} writes no field to evaluate basis functions on", inv.name())))?;
            BasisSource::Nodal {
                target_ident: target.ident.clone(),
                target_vspace: target.vspace.clone(),
            }
        };
        let suffix = match &source {
            BasisSource::Quadrature(qr) => qr.clone(),
            BasisSource::Nodal { target_ident, .. } => format!("on_{}", target_ident),
        };
        let mut out = Vec::new();
        for req in funcs {
            let space = spaces
                .iter()
                .find(|s| s.space == req.space)
                .cloned()
                .ok_or_else(|| unsupported(format!("{} asks for basis functions on unused space {}", inv.name(), req.space)))?;
            for (wanted, diff) in [(req.basis, false), (req.diff_basis, true)] {
                if !wanted {
                    continue;
                }
                let prefix = if diff { "diff_" } else { "" };
                out.push(BasisRef {
                    name: format!("{}basis_{}_{}", prefix, space.ident, suffix),
                    dim: format!("{}dim_{}", prefix, space.ident),
                    space: space.clone(),
                    diff,
                    source: source.clone(),
                });
            }
        }
        Ok(out)
    }

    fn collect_bases(&mut self, inv: &KernelInvocation) -> Result<(), CodegenError> {
        if let Some(qr) = &inv.quadrature {
            let name = self.name_of(qr);
            if !self.quadratures.contains(&name) {
                self.quadratures.push(name);
            }
        }
        for b in self.call_bases(inv)? {
            if !self.bases.iter().any(|x| x.name == b.name) {
                self.bases.push(b);
            }
        }
        Ok(())
    }

    fn loop_index(&self, id: NodeId) -> usize {
        self.loops.iter().find(|(l, _)| *l == id).map(|(_, i)| *i).unwrap_or(0)
    }

    /// Reductions performed under `id`.
    fn reductions_under(&self, id: NodeId) -> Vec<Reduction> {
        let mut out: Vec<Reduction> = Vec::new();
        for call in self.schedule.tree.calls_under(id) {
            for arg in call.invocation.args.iter().filter(|a| a.access() == AccessMode::Sum) {
                let key = arg.key();
                if !out.iter().any(|r| r.key == key) {
                    out.push(Reduction {
                        name: self.name_of(&arg.actual),
                        data_type: arg.descriptor.data_type,
                        key,
                    });
                }
            }
        }
        out
    }

    /// Kernel arguments of a user kernel call.
    fn kernel_args(&self, inv: &KernelInvocation, scope: &Scope) -> Result<Vec<String>, CodegenError> {
        let space = inv.kernel.signature().iteration_space;
        let mut args = Vec::new();

        if space == IterationSpace::Dof {
            for arg in &inv.args {
                match arg.descriptor.kind {
                    ArgumentKind::Field => args.push(format!("{}_data(df)", self.name_of(&arg.actual))),
                    ArgumentKind::Scalar => args.push(self.value_of(&arg.actual, scope)),
                    ArgumentKind::Operator => {
                        return Err(unsupported(format!("{} passes an operator to a dof kernel", inv.name())));
                    }
                }
            }
            return Ok(args);
        }

        let cell = scope.cell.clone().unwrap_or_else(|| "cell".to_string());
        args.push("nlayers".to_string());
        if space == IterationSpace::Domain {
            args.push("ncell_2d".to_string());
        }
        for arg in &inv.args {
            let name = self.name_of(&arg.actual);
            match arg.descriptor.kind {
                ArgumentKind::Scalar => args.push(self.value_of(&arg.actual, scope)),
                ArgumentKind::Field => {
                    args.push(format!("{}_data", name));
                    if let Some(st) = self.stencil_for(arg) {
                        args.push(format!("{}_stencil_size", st.prefix));
                        if let Some(dir) = &st.direction {
                            args.push(dir.clone());
                        }
                        args.push(format!("{}_stencil_dofmap(:,:,{})", st.prefix, cell));
                    }
                }
                ArgumentKind::Operator => {
                    args.push(format!("{}_proxy%ncell_3d", name));
                    args.push(format!("{}_local_stencil", name));
                }
            }
        }
        if let Some(qr) = &inv.quadrature {
            let q = self.name_of(qr);
            args.extend([
                format!("np_xy_{}", q),
                format!("np_z_{}", q),
                format!("weights_xy_{}", q),
                format!("weights_z_{}", q),
            ]);
        }
        args.extend(self.call_bases(inv)?.into_iter().map(|b| b.name));
        for sp in self.call_spaces(inv) {
            args.push(format!("ndf_{}", sp.ident));
            if sp.has_field {
                args.push(format!("undf_{}", sp.ident));
                if space == IterationSpace::Domain {
                    args.push(format!("map_{}", sp.ident));
                } else {
                    args.push(format!("map_{}(:,{})", sp.ident, cell));
                }
            }
        }
        Ok(args)
    }
}

/// Writes one invoke subroutine.
struct InvokeWriter<'w, 'a> {
    ctx: &'w InvokeContext<'a>,
    f: &'w mut CodeFormatter,
}

impl<'w, 'a> InvokeWriter<'w, 'a> {
    fn line(&mut self, s: impl AsRef<str>) {
        self.f.writeln(s.as_ref());
    }

    fn write(&mut self) -> PsyResult<()> {
        let ctx = self.ctx;
        let name = &ctx.schedule.name;
        self.line(format!("subroutine {}({})", name, ctx.dummies.join(", ")));
        self.f.indent();
        self.write_uses();
        self.write_declarations()?;
        self.f.newline();
        self.write_setup()?;
        self.write_body()?;
        self.write_teardown();
        self.f.dedent();
        self.line(format!("end subroutine {}", name));
        Ok(())
    }

    fn write_uses(&mut self) {
        let ctx = self.ctx;
        let mut uses: Vec<String> = Vec::new();
        let mut add = |s: String| {
            if !uses.contains(&s) {
                uses.push(s);
            }
        };
        for call in ctx.schedule.tree.calls_under(ctx.schedule.root()) {
            let k = &call.invocation.kernel;
            if k.is_builtin() || call.module_inline {
                continue;
            }
            add(format!("use {}, only: {}", k.signature().module, k.signature().procedure));
        }
        if ctx.needs_mesh {
            add("use mesh_mod, only: mesh_type".to_string());
        }
        if ctx.dm() && !ctx.reductions_under(ctx.schedule.root()).is_empty() {
            add("use scalar_mod, only: scalar_type".to_string());
        }
        if !ctx.partial_sums.is_empty() {
            add("use omp_lib, only: omp_get_thread_num, omp_get_max_threads".to_string());
        }
        if !ctx.quadratures.is_empty() {
            add("use quadrature_xyoz_mod, only: quadrature_xyoz_type, quadrature_xyoz_proxy_type".to_string());
        }
        if !ctx.bases.is_empty() {
            let mut wanted = Vec::new();
            if ctx.bases.iter().any(|b| !b.diff) {
                wanted.push("basis");
            }
            if ctx.bases.iter().any(|b| b.diff) {
                wanted.push("diff_basis");
            }
            add(format!("use function_space_mod, only: {}", wanted.join(", ")));
        }
        if !ctx.stencils.is_empty() {
            let mut items = vec!["stencil_dofmap_type"];
            for st in &ctx.stencils {
                let shapes: &[&str] = match st.shape {
                    StencilShape::XOrY1D => &["stencil_1dx", "stencil_1dy"],
                    StencilShape::Cross => &["stencil_cross"],
                    StencilShape::Region => &["stencil_region"],
                    StencilShape::X1D => &["stencil_1dx"],
                    StencilShape::Y1D => &["stencil_1dy"],
                };
                for &s in shapes {
                    if !items.contains(&s) {
                        items.push(s);
                    }
                }
            }
            add(format!("use stencil_dofmap_mod, only: {}", items.join(", ")));
            if ctx.stencils.iter().any(|s| s.direction.is_some()) {
                add("use flux_direction_mod, only: x_direction, y_direction".to_string());
            }
        }
        for u in uses {
            self.line(u);
        }
    }

    fn write_declarations(&mut self) -> PsyResult<()> {
        let ctx = self.ctx;
        let schedule = ctx.schedule;

        for (arg, dummy) in schedule.arguments.iter().zip(&ctx.dummies) {
            let ty = match &arg.role {
                ArgRole::Field { .. } => format!("type({})", field_types(ctx.field_type(&arg.actual.key()))?.0),
                ArgRole::Operator { .. } => "type(operator_type)".to_string(),
                ArgRole::Scalar { data_type } => data_type.fortran_type().to_string(),
                ArgRole::StencilExtent | ArgRole::StencilDirection | ArgRole::HaloDepth => {
                    DataType::Integer.fortran_type().to_string()
                }
                ArgRole::Quadrature => "type(quadrature_xyoz_type)".to_string(),
            };
            self.line(format!("{}, intent({}) :: {}", ty, arg.intent(), dummy));
        }

        let tree = &schedule.tree;
        let mut loop_vars: Vec<String> = Vec::new();
        for id in tree.loops() {
            if let Some(l) = tree.as_loop(id) {
                if l.upper != UpperBound::Single && !loop_vars.contains(&l.variable) {
                    loop_vars.push(l.variable.clone());
                }
            }
        }
        if !loop_vars.is_empty() {
            self.line(format!("integer(kind=i_def) :: {}", loop_vars.join(", ")));
        }
        let mut bounds = Vec::new();
        for (id, idx) in &ctx.loops {
            bounds.push(format!("loop{}_start", idx));
            if !tree.as_loop(*id).map(|l| l.is_coloured()).unwrap_or(false) {
                bounds.push(format!("loop{}_stop", idx));
            }
        }
        if !bounds.is_empty() {
            self.line(format!("integer(kind=i_def) :: {}", bounds.join(", ")));
        }
        if ctx.has_cell_kernels {
            self.line("integer(kind=i_def) :: nlayers");
        }
        if ctx.has_domain {
            self.line("integer(kind=i_def) :: ncell_2d");
        }

        for (arg, dummy) in schedule.arguments.iter().zip(&ctx.dummies) {
            match &arg.role {
                ArgRole::Field { .. } => {
                    let dt = ctx.field_type(&arg.actual.key());
                    let (_, proxy) = field_types(dt)?;
                    self.line(format!("type({}) :: {}_proxy", proxy, dummy));
                    self.line(format!("{}, pointer, dimension(:) :: {}_data => null()", dt.fortran_type(), dummy));
                }
                ArgRole::Operator { .. } => {
                    self.line(format!("type(operator_proxy_type) :: {}_proxy", dummy));
                    self.line(format!(
                        "real(kind=r_def), pointer, dimension(:,:,:) :: {}_local_stencil => null()",
                        dummy
                    ));
                }
                _ => {}
            }
        }

        for sp in &ctx.spaces {
            if sp.has_field {
                self.line(format!("integer(kind=i_def), pointer :: map_{}(:,:) => null()", sp.ident));
                self.line(format!("integer(kind=i_def) :: ndf_{0}, undf_{0}", sp.ident));
            } else {
                self.line(format!("integer(kind=i_def) :: ndf_{}", sp.ident));
            }
        }
        if ctx.needs_mesh {
            self.line("type(mesh_type), pointer :: mesh => null()");
        }
        let has_colours = tree.loops().iter().any(|l| tree.as_loop(*l).map(|l| l.is_colour_loop()).unwrap_or(false));
        if has_colours {
            self.line("integer(kind=i_def) :: ncolour");
            self.line("integer(kind=i_def), pointer :: cmap(:,:) => null()");
            let (edge, halo) = colour_bounds(ctx);
            if edge {
                self.line("integer(kind=i_def), allocatable :: last_edge_cell_all_colours(:)");
            }
            if halo {
                self.line("integer(kind=i_def), allocatable :: last_halo_cell_all_colours(:,:)");
            }
        }
        for st in &ctx.stencils {
            self.line(format!("type(stencil_dofmap_type), pointer :: {}_stencil_map => null()", st.prefix));
            self.line(format!("integer(kind=i_def), pointer :: {}_stencil_dofmap(:,:,:) => null()", st.prefix));
            self.line(format!("integer(kind=i_def) :: {}_stencil_size", st.prefix));
        }
        for q in &ctx.quadratures {
            self.line(format!("type(quadrature_xyoz_proxy_type) :: {}_proxy", q));
            self.line(format!("integer(kind=i_def) :: np_xy_{0}, np_z_{0}", q));
            self.line(format!("real(kind=r_def), pointer :: weights_xy_{0}(:) => null(), weights_z_{0}(:) => null()", q));
        }
        let mut dims: Vec<&str> = Vec::new();
        for b in &ctx.bases {
            if !dims.contains(&b.dim.as_str()) {
                dims.push(&b.dim);
            }
        }
        if !dims.is_empty() {
            self.line(format!("integer(kind=i_def) :: {}", dims.join(", ")));
        }
        for b in &ctx.bases {
            let shape = match b.source {
                BasisSource::Quadrature(_) => "(:,:,:,:)",
                BasisSource::Nodal { .. } => "(:,:,:)",
            };
            self.line(format!("real(kind=r_def), allocatable :: {}{}", b.name, shape));
        }
        let mut nodal_targets: Vec<&str> = Vec::new();
        let mut nodal_dofs: Vec<String> = Vec::new();
        for b in &ctx.bases {
            if let BasisSource::Nodal { target_ident, .. } = &b.source {
                if !nodal_targets.contains(&target_ident.as_str()) {
                    nodal_targets.push(target_ident);
                }
                let df = format!("df_{}", b.space.ident);
                if !nodal_dofs.contains(&df) {
                    nodal_dofs.push(df);
                }
            }
        }
        for t in &nodal_targets {
            self.line(format!("real(kind=r_def), pointer :: nodes_{}(:,:) => null()", t));
        }
        if !nodal_dofs.is_empty() {
            self.line(format!("integer(kind=i_def) :: df_nodal, {}", nodal_dofs.join(", ")));
        }
        if ctx.dm() && !ctx.reductions_under(schedule.root()).is_empty() {
            self.line("type(scalar_type) :: global_sum");
        }
        if !ctx.partial_sums.is_empty() {
            self.line("integer(kind=i_def) :: th_idx, nthreads");
            for r in &ctx.partial_sums {
                self.line(format!(
                    "{}, allocatable, dimension(:,:) :: l_{}",
                    r.data_type.fortran_type(),
                    r.name
                ));
            }
        }
        Ok(())
    }

    fn write_setup(&mut self) -> PsyResult<()> {
        let ctx = self.ctx;
        let schedule = ctx.schedule;
        let tree = &schedule.tree;

        let mut proxies = Vec::new();
        for (arg, dummy) in schedule.arguments.iter().zip(&ctx.dummies) {
            match &arg.role {
                ArgRole::Field { .. } => {
                    proxies.push(format!("{0}_proxy = {0}%get_proxy()", dummy));
                    proxies.push(format!("{0}_data => {0}_proxy%data", dummy));
                }
                ArgRole::Operator { .. } => {
                    proxies.push(format!("{0}_proxy = {0}%get_proxy()", dummy));
                    proxies.push(format!("{0}_local_stencil => {0}_proxy%local_stencil", dummy));
                }
                _ => {}
            }
        }
        if !proxies.is_empty() {
            self.line("! Initialise field and/or operator proxies");
            for p in proxies {
                self.line(p);
            }
        }

        if let Some(anchor) = ctx.anchor.clone() {
            if ctx.has_cell_kernels {
                self.line(format!("nlayers = {}%get_nlayers()", anchor));
            }
            if ctx.needs_mesh {
                self.line(format!("mesh => {}%get_mesh()", anchor));
            }
        }
        if ctx.has_domain {
            self.line("ncell_2d = mesh%get_ncells_2d()");
        }
        let has_colours = tree.loops().iter().any(|l| tree.as_loop(*l).map(|l| l.is_colour_loop()).unwrap_or(false));
        if has_colours {
            self.line("ncolour = mesh%get_ncolours()");
            self.line("cmap => mesh%get_colour_map()");
            let (edge, halo) = colour_bounds(ctx);
            if edge {
                self.line("last_edge_cell_all_colours = mesh%get_last_edge_cell_all_colours()");
            }
            if halo {
                self.line("last_halo_cell_all_colours = mesh%get_last_halo_cell_all_colours()");
            }
        }
        if !ctx.partial_sums.is_empty() {
            self.line("nthreads = omp_get_max_threads()");
        }

        for st in &ctx.stencils {
            let map = format!("{}_stencil_map", st.prefix);
            match &st.direction {
                Some(dir) => {
                    for (direction, constant) in [("x_direction", "stencil_1dx"), ("y_direction", "stencil_1dy")] {
                        self.line(format!("if ({} .eq. {}) then", dir, direction));
                        self.f.indent();
                        self.line(format!("{} => {}%get_stencil_dofmap({}, {})", map, st.vspace, constant, st.extent));
                        self.f.dedent();
                        self.line("end if");
                    }
                }
                None => self.line(format!(
                    "{} => {}%get_stencil_dofmap({}, {})",
                    map,
                    st.vspace,
                    stencil_constant(st.shape),
                    st.extent
                )),
            }
            self.line(format!("{}_stencil_dofmap => {}%get_whole_dofmap()", st.prefix, map));
            self.line(format!("{}_stencil_size = {}%get_size()", st.prefix, map));
        }

        if !ctx.spaces.is_empty() {
            self.line("! Look-up dofmaps and dof counts for each function space");
            for sp in &ctx.spaces {
                if sp.has_field {
                    self.line(format!("map_{} => {}%get_whole_dofmap()", sp.ident, sp.vspace));
                }
                self.line(format!("ndf_{} = {}%get_ndf()", sp.ident, sp.vspace));
                if sp.has_field {
                    self.line(format!("undf_{} = {}%get_undf()", sp.ident, sp.vspace));
                }
            }
        }

        for q in &ctx.quadratures {
            self.line(format!("{0}_proxy = {0}%get_quadrature_proxy()", q));
            self.line(format!("np_xy_{0} = {0}_proxy%np_xy", q));
            self.line(format!("np_z_{0} = {0}_proxy%np_z", q));
            self.line(format!("weights_xy_{0} => {0}_proxy%weights_xy", q));
            self.line(format!("weights_z_{0} => {0}_proxy%weights_z", q));
        }
        self.write_basis_setup();
        self.write_loop_bounds()?;
        Ok(())
    }

    fn write_basis_setup(&mut self) {
        let ctx = self.ctx;
        let mut dims_done: Vec<&str> = Vec::new();
        let mut nodes_done: Vec<&str> = Vec::new();
        for b in &ctx.bases {
            if !dims_done.contains(&b.dim.as_str()) {
                let getter = if b.diff { "get_dim_space_diff" } else { "get_dim_space" };
                self.line(format!("{} = {}%{}()", b.dim, b.space.vspace, getter));
                dims_done.push(&b.dim);
            }
            let which = if b.diff { "diff_basis" } else { "basis" };
            let sp = &b.space.ident;
            match &b.source {
                BasisSource::Quadrature(qr) => {
                    self.line(format!(
                        "allocate({}({}, ndf_{}, np_xy_{}, np_z_{}))",
                        b.name, b.dim, sp, qr, qr
                    ));
                    self.line(format!(
                        "call {}%compute_function({}, {}, {}, ndf_{}, {})",
                        qr, which, b.space.vspace, b.dim, sp, b.name
                    ));
                }
                BasisSource::Nodal { target_ident, target_vspace } => {
                    if !nodes_done.contains(&target_ident.as_str()) {
                        self.line(format!("nodes_{} => {}%get_nodes()", target_ident, target_vspace));
                        nodes_done.push(target_ident);
                    }
                    self.line(format!("allocate({}({}, ndf_{}, ndf_{}))", b.name, b.dim, sp, target_ident));
                    self.line(format!("do df_nodal = 1, ndf_{}", target_ident));
                    self.f.indent();
                    self.line(format!("do df_{0} = 1, ndf_{0}", sp));
                    self.f.indent();
                    self.line(format!(
                        "{}(:,df_{},df_nodal) = {}%call_function({}, df_{}, nodes_{}(:,df_nodal))",
                        b.name, sp, b.space.vspace, which, sp, target_ident
                    ));
                    self.f.dedent();
                    self.line("end do");
                    self.f.dedent();
                    self.line("end do");
                }
            }
        }
    }

    fn write_loop_bounds(&mut self) -> PsyResult<()> {
        let ctx = self.ctx;
        let tree = &ctx.schedule.tree;
        for (id, idx) in &ctx.loops {
            let Some(l) = tree.as_loop(*id) else { continue };
            let first_call = tree.calls_under(*id).into_iter().next();
            let vspace = first_call.and_then(|c| ctx.call_vspace(&c.invocation));
            let need_vspace = || {
                vspace
                    .clone()
                    .ok_or_else(|| unsupported(format!("loop {} has no field to take its bounds from", idx)))
            };
            let stop = match &l.upper {
                UpperBound::Colours => Some("ncolour".to_string()),
                UpperBound::CellsOfColour(_) | UpperBound::Single => None,
                UpperBound::OwnedCells if ctx.dm() => Some("mesh%get_last_edge_cell()".to_string()),
                UpperBound::OwnedCells => Some(format!("{}%get_ncell()", need_vspace()?)),
                UpperBound::HaloCells(d) => Some(format!("mesh%get_last_halo_cell({})", ctx.depth_expr(d))),
                UpperBound::OwnedDofs if ctx.dm() => Some(format!("{}%get_last_dof_owned()", need_vspace()?)),
                UpperBound::OwnedDofs => Some(format!("{}%get_undf()", need_vspace()?)),
            };
            self.line(format!("loop{}_start = 1", idx));
            if let Some(stop) = stop {
                self.line(format!("loop{}_stop = {}", idx, stop));
            }
        }
        Ok(())
    }

    fn write_body(&mut self) -> PsyResult<()> {
        let ctx = self.ctx;
        let tree = &ctx.schedule.tree;
        let root = tree.root();
        for &child in tree.children(root) {
            let reductions = ctx.reductions_under(child);
            for r in &reductions {
                self.line(format!("{} = {}", r.name, zero_of(r.data_type)));
            }
            self.emit(child, &Scope::default())?;
            if ctx.dm() {
                self.write_dirty_marks(child);
                for r in &reductions {
                    self.line(format!("global_sum%value = {}", r.name));
                    self.line(format!("{} = global_sum%get_sum()", r.name));
                }
            }
        }
        Ok(())
    }

    /// Halos of fields written under `id` are out of date afterwards;
    /// loops that computed into the halo leave it clean to that depth.
    fn write_dirty_marks(&mut self, id: NodeId) {
        let ctx = self.ctx;
        let tree = &ctx.schedule.tree;
        let mut done: Vec<String> = Vec::new();
        for (call_id, call) in tree.walk(id).into_iter().filter_map(|n| tree.as_call(n).map(|c| (n, c))) {
            let clean_depth = tree.enclosing_loop(call_id).and_then(|l| tree.as_loop(l)).and_then(|l| {
                match (&l.space, &l.upper) {
                    (IterationSpace::OwnedAndHaloCellColumn, UpperBound::HaloCells(d))
                    | (IterationSpace::OwnedAndHaloCellColumn, UpperBound::CellsOfColour(Some(d))) => Some(d.clone()),
                    _ => None,
                }
            });
            for arg in call.invocation.fields().filter(|a| a.access().writes()) {
                let key = arg.key();
                if done.contains(&key) {
                    continue;
                }
                done.push(key);
                let name = ctx.name_of(&arg.actual);
                self.line(format!("call {}_proxy%set_dirty()", name));
                if let Some(d) = &clean_depth {
                    self.line(format!("call {}_proxy%set_clean({})", name, ctx.depth_expr(d)));
                }
            }
        }
    }

    fn emit(&mut self, id: NodeId, scope: &Scope) -> PsyResult<()> {
        let ctx = self.ctx;
        let tree = &ctx.schedule.tree;
        match tree.kind(id) {
            NodeKind::Block { .. } => self.emit_children(id, scope),
            NodeKind::HaloExchange(h) => {
                let name = ctx.name_of_key(&h.key()).to_string();
                let depth = ctx.depth_expr(&h.depth);
                if h.conditional {
                    self.line(format!("if ({}_proxy%is_dirty(depth={})) then", name, depth));
                    self.f.indent();
                    self.line(format!("call {}_proxy%halo_exchange(depth={})", name, depth));
                    self.f.dedent();
                    self.line("end if");
                } else {
                    self.line(format!("call {}_proxy%halo_exchange(depth={})", name, depth));
                }
                Ok(())
            }
            NodeKind::Loop(l) => {
                let mut inner = scope.clone();
                match &l.upper {
                    UpperBound::Single => return self.emit_children(id, &inner),
                    UpperBound::CellsOfColour(depth) => {
                        let stop = match depth {
                            None => "last_edge_cell_all_colours(colour)".to_string(),
                            Some(d) => format!("last_halo_cell_all_colours(colour, {})", ctx.depth_expr(d)),
                        };
                        self.line(format!("do {} = loop{}_start, {}", l.variable, ctx.loop_index(id), stop));
                        inner.cell = Some(format!("cmap(colour, {})", l.variable));
                    }
                    _ => {
                        let idx = ctx.loop_index(id);
                        self.line(format!("do {0} = loop{1}_start, loop{1}_stop", l.variable, idx));
                        if l.space.is_cell_column() && !l.is_colour_loop() {
                            inner.cell = Some(l.variable.clone());
                        }
                    }
                }
                self.f.indent();
                self.emit_children(id, &inner)?;
                self.f.dedent();
                self.line("end do");
                Ok(())
            }
            NodeKind::KernelCall(call) => self.emit_call(call, scope),
            NodeKind::Directive(d) => self.emit_directive(id, d, scope),
        }
    }

    fn emit_children(&mut self, id: NodeId, scope: &Scope) -> PsyResult<()> {
        for &c in self.ctx.schedule.tree.children(id) {
            self.emit(c, scope)?;
        }
        Ok(())
    }

    fn emit_directive(&mut self, id: NodeId, d: &Directive, scope: &Scope) -> PsyResult<()> {
        let ctx = self.ctx;
        let tree = &ctx.schedule.tree;
        match d {
            Directive::OmpParallelDo { schedule, reprod, reductions } => {
                let mut private: Vec<String> = Vec::new();
                for l in tree.walk(id).into_iter().filter_map(|n| tree.as_loop(n)) {
                    if l.upper != UpperBound::Single && !private.contains(&l.variable) {
                        private.push(l.variable.clone());
                    }
                }
                let names: Vec<String> = reductions.iter().map(|k| ctx.name_of_key(k).to_string()).collect();
                if *reprod && !reductions.is_empty() {
                    let pad = ctx.config.reprod_pad_size;
                    let mut inner = scope.clone();
                    for (key, name) in reductions.iter().zip(&names) {
                        let dt = ctx.scalar_type(key);
                        self.line(format!("allocate(l_{}({}, nthreads))", name, pad));
                        self.line(format!("l_{} = {}", name, zero_of(dt)));
                        inner.partial_sums.insert(key.clone(), format!("l_{}(1,th_idx)", name));
                    }
                    private.push("th_idx".to_string());
                    self.line(format!("!$omp parallel default(shared), private({})", private.join(",")));
                    self.line("th_idx = omp_get_thread_num() + 1");
                    self.line(format!("!$omp do schedule({})", schedule));
                    self.emit_children(id, &inner)?;
                    self.line("!$omp end do");
                    self.line("!$omp end parallel");
                    for name in &names {
                        self.line("do th_idx = 1, nthreads");
                        self.f.indent();
                        self.line(format!("{0} = {0} + l_{0}(1,th_idx)", name));
                        self.f.dedent();
                        self.line("end do");
                        self.line(format!("deallocate(l_{})", name));
                    }
                } else {
                    let mut clauses = format!("default(shared), private({}), schedule({})", private.join(","), schedule);
                    if !names.is_empty() {
                        clauses.push_str(&format!(", reduction(+:{})", names.join(",")));
                    }
                    self.line(format!("!$omp parallel do {}", clauses));
                    self.emit_children(id, scope)?;
                    self.line("!$omp end parallel do");
                }
                Ok(())
            }
            Directive::AccParallel { default_present } => {
                if *default_present {
                    self.line("!$acc parallel default(present)");
                } else {
                    self.line("!$acc parallel");
                }
                let mut inner = scope.clone();
                inner.in_acc_parallel = true;
                self.emit_children(id, &inner)?;
                self.line("!$acc end parallel");
                Ok(())
            }
            Directive::AccLoop { independent, gang, vector, collapse } => {
                if !scope.in_acc_parallel {
                    return Err(CodegenError::new(
                        CodegenErrorKind::MisplacedDirective,
                        format!(
                            "{}: OpenACC loop at {} is not inside an OpenACC parallel region",
                            ctx.schedule.name,
                            tree.path_of(id)
                        ),
                    )
                    .into());
                }
                let mut line = "!$acc loop".to_string();
                for (on, clause) in [(*independent, "independent"), (*gang, "gang"), (*vector, "vector")] {
                    if on {
                        line.push(' ');
                        line.push_str(clause);
                    }
                }
                if *collapse > 1 {
                    line.push_str(&format!(" collapse({})", collapse));
                }
                self.line(line);
                self.emit_children(id, scope)
            }
            Directive::AccEnterData { variables } => {
                let mut items = Vec::new();
                for v in variables {
                    let key: String = v.chars().filter(|c| !c.is_whitespace()).map(|c| c.to_ascii_lowercase()).collect();
                    let Some(arg) = ctx.schedule.arguments.iter().find(|a| a.actual.key() == key) else {
                        continue;
                    };
                    let name = ctx.name_of_key(&key);
                    if arg.is_operator() {
                        items.push(format!("{}_local_stencil", name));
                    } else {
                        items.push(format!("{}_data", name));
                    }
                }
                for sp in ctx.spaces.iter().filter(|s| s.has_field) {
                    items.push(format!("map_{}", sp.ident));
                }
                if !items.is_empty() {
                    self.line(format!("!$acc enter data copyin({})", items.join(", ")));
                }
                Ok(())
            }
        }
    }

    fn emit_call(&mut self, call: &KernelCallNode, scope: &Scope) -> PsyResult<()> {
        let ctx = self.ctx;
        let inv = &call.invocation;
        if let Some(op) = inv.kernel.builtin_op() {
            let line = builtin_body(ctx, op, inv, scope);
            self.line(line);
            return Ok(());
        }
        let args = ctx.kernel_args(inv, scope)?;
        self.line(format!("call {}({})", inv.kernel.signature().procedure, args.join(", ")));
        Ok(())
    }

    fn write_teardown(&mut self) {
        let names: Vec<&str> = self.ctx.bases.iter().map(|b| b.name.as_str()).collect();
        if !names.is_empty() {
            self.line(format!("deallocate({})", names.join(", ")));
        }
    }
}

/// Whether coloured loops stop at the last edge cell and/or in the halo.
fn colour_bounds(ctx: &InvokeContext) -> (bool, bool) {
    let tree = &ctx.schedule.tree;
    let mut edge = false;
    let mut halo = false;
    for l in tree.loops().into_iter().filter_map(|l| tree.as_loop(l)) {
        match l.upper {
            UpperBound::CellsOfColour(None) => edge = true,
            UpperBound::CellsOfColour(Some(_)) => halo = true,
            _ => {}
        }
    }
    (edge, halo)
}

/// The body of a built-in, written in place of a call.
fn builtin_body(ctx: &InvokeContext, op: BuiltinOp, inv: &KernelInvocation, scope: &Scope) -> String {
    let value = |i: usize| ctx.value_of(&inv.args[i].actual, scope);
    let elem = |i: usize| format!("{}_data(df)", ctx.name_of(&inv.args[i].actual));
    match op {
        BuiltinOp::SetvalC => format!("{} = {}", elem(0), value(1)),
        BuiltinOp::SetvalX => format!("{} = {}", elem(0), elem(1)),
        BuiltinOp::IncXPlusY => format!("{0} = {0} + {1}", elem(0), elem(1)),
        BuiltinOp::IncATimesX => format!("{1} = {0}*{1}", value(0), elem(1)),
        BuiltinOp::XInnerproductY => format!("{0} = {0} + {1}*{2}", value(0), elem(1), elem(2)),
    }
}

/// Generates the compute-layer module for a set of schedules.
pub struct PsyGenerator<'c> {
    config: &'c Config,
}

impl<'c> PsyGenerator<'c> {
    pub fn new(config: &'c Config) -> Self {
        Self { config }
    }

    pub fn generate(&self, module: &str, schedules: &[Schedule]) -> PsyResult<String> {
        let module = sanitize(module)?;
        let mut f = CodeFormatter::default_indent().with_line_length(self.config.line_length);

        let mut field_mods: Vec<&str> = Vec::new();
        let mut has_operator = false;
        for s in schedules {
            for call in &s.invoke.calls {
                for arg in &call.args {
                    match arg.descriptor.kind {
                        ArgumentKind::Field => {
                            let m = match arg.descriptor.data_type {
                                DataType::Integer => "use integer_field_mod, only: integer_field_type, integer_field_proxy_type",
                                _ => "use field_mod, only: field_type, field_proxy_type",
                            };
                            if !field_mods.contains(&m) {
                                field_mods.push(m);
                            }
                        }
                        ArgumentKind::Operator => has_operator = true,
                        ArgumentKind::Scalar => {}
                    }
                }
            }
        }

        f.writeln(&format!("module {}", module));
        f.indent();
        f.writeln("use constants_mod, only: r_def, i_def, l_def");
        for m in field_mods {
            f.writeln(m);
        }
        if has_operator {
            f.writeln("use operator_mod, only: operator_type, operator_proxy_type");
        }
        f.writeln("implicit none");
        f.writeln("public");
        f.newline();
        f.dedent();
        f.writeln("contains");
        f.indent();

        for schedule in schedules {
            f.newline();
            let ctx = InvokeContext::new(self.config, schedule)?;
            InvokeWriter { ctx: &ctx, f: &mut f }.write()?;
        }

        let mut inlined: Vec<(&str, &str)> = Vec::new();
        for s in schedules {
            for call in s.tree.calls_under(s.root()).into_iter().filter(|c| c.module_inline) {
                let sig = call.invocation.kernel.signature();
                let Some(code) = sig.code_source.as_deref() else {
                    return Err(unsupported(format!("source of {} is not available for inlining", sig.procedure)).into());
                };
                if !inlined.iter().any(|(p, _)| *p == sig.procedure) {
                    inlined.push((sig.procedure.as_str(), code));
                }
            }
        }
        for (_, code) in inlined {
            f.newline();
            write_inlined(&mut f, code);
        }

        f.newline();
        f.dedent();
        f.writeln(&format!("end module {}", module));
        Ok(f.finish())
    }
}

/// Kernel source re-indented to the current level, otherwise verbatim.
fn write_inlined(f: &mut CodeFormatter, code: &str) {
    let common = code
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    for line in code.lines() {
        if line.trim().is_empty() {
            f.newline();
        } else {
            f.writeln_raw(line.get(common..).unwrap_or(line.trim_start()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::invoke::InvokeCall;
    use crate::ir::kernel::{ArgumentDescriptor, KernelSignature};
    use crate::ir::IrBuilder;
    use crate::utils::location::Span;

    fn v(s: &str) -> ActualArg {
        ActualArg::Variable(s.to_string())
    }

    fn testkern() -> Kernel {
        Kernel::Standard(KernelSignature {
            name: "testkern_type".into(),
            module: "testkern_mod".into(),
            procedure: "testkern_code".into(),
            args: vec![
                ArgumentDescriptor::scalar(DataType::Real, AccessMode::Read),
                ArgumentDescriptor::field(DataType::Real, AccessMode::Inc, FunctionSpace::W1),
                ArgumentDescriptor::field(DataType::Real, AccessMode::Read, FunctionSpace::W3),
            ],
            iteration_space: IterationSpace::CellColumn,
            code_source: None,
        })
    }

    fn schedule(config: &Config, calls: Vec<KernelInvocation>) -> Schedule {
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

    #[test]
    fn test_kernel_call_argument_order() {
        let config = Config::default();
        let s = schedule(&config, vec![KernelInvocation::bind(testkern(), vec![v("a"), v("f1"), v("f2")], Span::dummy())]);
        let out = PsyGenerator::new(&config).generate("alg_psy", &[s]).unwrap();
        assert!(out.contains("subroutine invoke_0(a, f1, f2)"), "{}", out);
        assert!(out.contains("use testkern_mod, only: testkern_code"));
        assert!(out.contains(
            "call testkern_code(nlayers, a, f1_data, f2_data, ndf_w1, undf_w1, map_w1(:,cell), ndf_w3, undf_w3, map_w3(:,cell))"
        ));
        assert!(out.contains("real(kind=r_def), intent(in) :: a"));
        assert!(out.contains("type(field_type), intent(inout) :: f1"));
        assert!(out.contains("loop0_stop = mesh%get_last_halo_cell(1)"));
        assert!(out.contains("if (f1_proxy%is_dirty(depth=1)) then"));
        assert!(out.contains("call f1_proxy%set_dirty()"));
        assert!(!out.contains("call f2_proxy%set_dirty()"));
    }

    #[test]
    fn test_no_distributed_memory() {
        let config = Config::default().distributed_memory(false);
        let s = schedule(&config, vec![KernelInvocation::bind(testkern(), vec![v("a"), v("f1"), v("f2")], Span::dummy())]);
        let out = PsyGenerator::new(&config).generate("alg_psy", &[s]).unwrap();
        assert!(out.contains("loop0_stop = f1_proxy%vspace%get_ncell()"));
        assert!(!out.contains("halo_exchange"));
        assert!(!out.contains("set_dirty"));
        assert!(!out.contains("mesh"));
    }

    #[test]
    fn test_builtins_inline_and_global_sum() {
        let config = Config::default();
        let calls = vec![
            KernelInvocation::bind(Kernel::builtin(BuiltinOp::SetvalC), vec![v("f1"), ActualArg::Literal("0.0_r_def".into())], Span::dummy()),
            KernelInvocation::bind(Kernel::builtin(BuiltinOp::XInnerproductY), vec![v("asum"), v("f1"), v("f2")], Span::dummy()),
        ];
        let s = schedule(&config, calls);
        let out = PsyGenerator::new(&config).generate("alg_psy", &[s]).unwrap();
        assert!(out.contains("f1_data(df) = 0.0_r_def"));
        assert!(out.contains("asum = asum + f1_data(df)*f2_data(df)"));
        assert!(out.contains("loop1_stop = f1_proxy%vspace%get_last_dof_owned()"));
        assert!(out.contains("global_sum%value = asum"));
        assert!(out.contains("asum = global_sum%get_sum()"));
        assert!(out.contains("real(kind=r_def), intent(inout) :: asum"));
        assert!(!out.contains("nlayers"));
    }

    #[test]
    fn test_literal_is_not_a_dummy_and_bad_name_fails() {
        let config = Config::default();
        let calls = vec![KernelInvocation::bind(
            Kernel::builtin(BuiltinOp::SetvalC),
            vec![v("f1"), ActualArg::Expression("2.0*x".into())],
            Span::dummy(),
        )];
        let s = schedule(&config, calls);
        let err = PsyGenerator::new(&config).generate("alg_psy", &[s]).unwrap_err();
        assert!(err.to_string().contains("cannot be expressed as a Fortran name"));
    }
}
