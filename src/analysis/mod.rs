//! Analysis passes over the call tree.
//!
//! - Field accesses made by each kernel call
//! - Dependences between the loops of an invoke
//! - Parallel-safety of individual loops

pub mod access;
pub mod dependence;
pub mod parallel;

pub use access::{call_accesses, subtree_accesses, Access};
pub use dependence::{analyze_dependencies, DependenceAnalysis};
pub use parallel::{loop_hazards, reduction_keys, Hazard};
