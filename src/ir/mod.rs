//! Intermediate representation.
//!
//! - Kernel model: signatures, argument descriptors, the registry
//! - Invoke model: resolved kernel invocations and their actuals
//! - Call tree: loops, kernel calls, directives and halo exchanges
//! - Builder: invoke to schedule

pub mod kernel;
pub mod invoke;
pub mod tree;
pub mod builder;

pub use builder::IrBuilder;
pub use invoke::{ActualArg, InvokeCall, KernelInvocation};
pub use kernel::{Kernel, KernelRegistry, KernelSignature};
pub use tree::{CallTree, NodeId, NodeKind, Schedule};
