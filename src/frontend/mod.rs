//! Frontend: lexer and parsers for kernel metadata and the algorithm layer.
//!
//! ## Input Overview
//!
//! Kernels are Fortran modules whose derived types describe their
//! arguments:
//!
//! ```text
//! type, extends(kernel_type) :: update_field_type
//!   type(arg_type), dimension(2) :: meta_args = (/            &
//!        arg_type(GH_FIELD, GH_REAL, GH_READWRITE, W3),       &
//!        arg_type(GH_FIELD, GH_REAL, GH_READ,      W3) /)
//!   integer :: operates_on = CELL_COLUMN
//! contains
//!   procedure, nopass :: update_field_code
//! end type update_field_type
//! ```
//!
//! The algorithm layer calls them through `invoke`:
//!
//! ```text
//! call invoke(update_field_type(f, inc), update_field_type(f, inc))
//! ```

pub mod token;
pub mod lexer;
pub mod cursor;
pub mod metadata;
pub mod algorithm;
pub mod modules;

// Re-exports
pub use algorithm::{parse_algorithm, resolve_invokes, AlgorithmFile};
pub use lexer::Lexer;
pub use metadata::parse_kernel_module;
pub use modules::ModuleManager;
pub use token::{Token, TokenKind};

use crate::ir::invoke::InvokeCall;
use crate::ir::kernel::KernelRegistry;
use crate::utils::errors::PsyResult;

/// Parse an algorithm file and resolve its invokes against `registry`.
pub fn parse_and_resolve(source: &str, registry: &KernelRegistry) -> PsyResult<(AlgorithmFile, Vec<InvokeCall>)> {
    let file = parse_algorithm(source)?;
    let invokes = resolve_invokes(&file, registry)?;
    Ok((file, invokes))
}
