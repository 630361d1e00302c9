//! Data accesses made by kernel calls.

use crate::ir::invoke::KernelInvocation;
use crate::ir::kernel::{AccessMode, ArgumentKind, FunctionSpace};
use crate::ir::tree::{CallTree, NodeId};

/// One argument access by one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Access {
    /// Normalised actual-argument text
    pub key: String,
    pub mode: AccessMode,
    pub kind: ArgumentKind,
    pub space: Option<FunctionSpace>,
    /// Read through a stencil (touches neighbouring columns)
    pub stencil: bool,
}

impl Access {
    pub fn reads(&self) -> bool {
        self.mode.reads()
    }

    pub fn writes(&self) -> bool {
        self.mode.writes()
    }

    /// On a continuous space, where neighbouring cells share dofs.
    pub fn is_continuous(&self) -> bool {
        self.space.map(|s| s.is_continuous()).unwrap_or(false)
    }

    /// Increment of a field on a continuous space: neighbouring cells
    /// update the same dofs.
    pub fn is_shared_increment(&self) -> bool {
        self.mode == AccessMode::Inc && self.is_continuous()
    }
}

/// Accesses of every non-literal declared argument of `call`.
pub fn call_accesses(call: &KernelInvocation) -> Vec<Access> {
    call.args
        .iter()
        .filter(|a| !a.actual.is_literal())
        .map(|a| Access {
            key: a.key(),
            mode: a.access(),
            kind: a.descriptor.kind,
            space: a.descriptor.space,
            stencil: a.descriptor.stencil.is_some(),
        })
        .collect()
}

/// Accesses of every kernel call under `id`, in source order.
pub fn subtree_accesses(tree: &CallTree, id: NodeId) -> Vec<Access> {
    tree.calls_under(id)
        .into_iter()
        .flat_map(|c| call_accesses(&c.invocation))
        .collect()
}

pub fn writes_key(accesses: &[Access], key: &str) -> bool {
    accesses.iter().any(|a| a.key == key && a.writes())
}

pub fn touches_key(accesses: &[Access], key: &str) -> bool {
    accesses.iter().any(|a| a.key == key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::invoke::ActualArg;
    use crate::ir::kernel::{BuiltinOp, Kernel};
    use crate::utils::location::Span;

    #[test]
    fn test_literals_are_not_accesses() {
        let call = KernelInvocation::bind(
            Kernel::builtin(BuiltinOp::SetvalC),
            vec![ActualArg::Variable("F".into()), ActualArg::Literal("0.0".into())],
            Span::dummy(),
        );
        let acc = call_accesses(&call);
        assert_eq!(acc.len(), 1);
        assert_eq!(acc[0].key, "f");
        assert!(acc[0].writes());
        assert!(!acc[0].reads());
        assert!(!acc[0].is_shared_increment());
        assert!(acc[0].is_continuous());
        assert!(writes_key(&acc, "f"));
        assert!(!touches_key(&acc, "g"));
    }
}
