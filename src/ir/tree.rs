//! The call tree: an arena of loops, kernel calls, directives and halo
//! exchanges built for one invoke.
//!
//! Nodes own their children through ordered `NodeId` lists and point back
//! to their parent with a non-owning id, so the structure stays a strict
//! tree while analyses can walk upwards.

use crate::ir::invoke::{InvokeArgument, InvokeCall, KernelInvocation};
use crate::ir::kernel::IterationSpace;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a node in its [`CallTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Upper bound of a generated loop. Lower bounds are always 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "bound", content = "depth", rename_all = "snake_case")]
pub enum UpperBound {
    /// Every owned cell column
    OwnedCells,
    /// Owned cells plus the halo out to this depth
    HaloCells(String),
    /// Every owned degree of freedom
    OwnedDofs,
    /// Number of colours in the mesh colouring
    Colours,
    /// Cells of the current colour, optionally into the halo
    CellsOfColour(Option<String>),
    /// No loop: the kernel sees the whole domain
    Single,
}

impl fmt::Display for UpperBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpperBound::OwnedCells => write!(f, "owned cells"),
            UpperBound::HaloCells(d) => write!(f, "cells to halo depth {}", d),
            UpperBound::OwnedDofs => write!(f, "owned dofs"),
            UpperBound::Colours => write!(f, "colours"),
            UpperBound::CellsOfColour(None) => write!(f, "cells of colour"),
            UpperBound::CellsOfColour(Some(d)) => write!(f, "cells of colour to halo depth {}", d),
            UpperBound::Single => write!(f, "single"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopNode {
    pub space: IterationSpace,
    pub variable: String,
    pub upper: UpperBound,
}

impl LoopNode {
    /// The outer loop of a coloured pair.
    pub fn is_colour_loop(&self) -> bool {
        self.upper == UpperBound::Colours
    }

    /// The inner loop of a coloured pair.
    pub fn is_coloured(&self) -> bool {
        matches!(self.upper, UpperBound::CellsOfColour(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelCallNode {
    pub invocation: KernelInvocation,
    /// Emit the kernel subroutine inside the compute-layer module
    pub module_inline: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectiveKind {
    OmpParallelDo,
    AccParallel,
    AccLoop,
    AccEnterData,
}

impl DirectiveKind {
    pub fn is_acc(&self) -> bool {
        !matches!(self, DirectiveKind::OmpParallelDo)
    }
}

/// A directive with its clauses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    OmpParallelDo {
        schedule: String,
        /// Reduce through per-thread partial sums in a fixed order
        reprod: bool,
        /// Reduction variables (keys of scalar actuals)
        reductions: Vec<String>,
    },
    AccParallel {
        default_present: bool,
    },
    AccLoop {
        independent: bool,
        gang: bool,
        vector: bool,
        collapse: u32,
    },
    AccEnterData {
        /// Actual-argument text of every field and operator copied in
        variables: Vec<String>,
    },
}

impl Directive {
    pub fn kind(&self) -> DirectiveKind {
        match self {
            Directive::OmpParallelDo { .. } => DirectiveKind::OmpParallelDo,
            Directive::AccParallel { .. } => DirectiveKind::AccParallel,
            Directive::AccLoop { .. } => DirectiveKind::AccLoop,
            Directive::AccEnterData { .. } => DirectiveKind::AccEnterData,
        }
    }
}

/// Implicit halo synchronisation before a loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HaloExchangeNode {
    /// Actual-argument text of the field
    pub field: String,
    pub depth: String,
    /// Guarded by a run-time dirty check
    pub conditional: bool,
}

impl HaloExchangeNode {
    pub fn key(&self) -> String {
        self.field.chars().filter(|c| !c.is_whitespace()).map(|c| c.to_ascii_lowercase()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Block { label: String },
    Loop(LoopNode),
    KernelCall(KernelCallNode),
    Directive(Directive),
    HaloExchange(HaloExchangeNode),
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Block { .. } => "Block",
            NodeKind::Loop(_) => "Loop",
            NodeKind::KernelCall(_) => "KernelCall",
            NodeKind::Directive(_) => "Directive",
            NodeKind::HaloExchange(_) => "HaloExchange",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// Arena-backed tree. Detached nodes stay in the arena but are no longer
/// reachable from the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl CallTree {
    pub fn new(label: &str) -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Block { label: label.to_string() },
                parent: None,
                children: Vec::new(),
            }],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn kind_mut(&mut self, id: NodeId) -> &mut NodeKind {
        &mut self.nodes[id.0].kind
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.0 < self.nodes.len() && (id == self.root || self.ancestors(id).last() == Some(&self.root))
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    /// Create an unattached node.
    pub fn add_node(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(Node { kind, parent: None, children: Vec::new() });
        NodeId(self.nodes.len() - 1)
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    pub fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        let children = &mut self.nodes[parent.0].children;
        let index = index.min(children.len());
        children.insert(index, child);
    }

    /// Remove `id` from its parent's child list.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|c| *c != id);
        }
    }

    pub fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|c| *c == id)
    }

    /// Wrap the contiguous siblings `first..=last` in a new node placed
    /// where `first` was.
    pub fn wrap(&mut self, first: NodeId, last: NodeId, kind: NodeKind) -> Option<NodeId> {
        let parent = self.parent(first)?;
        if self.parent(last) != Some(parent) {
            return None;
        }
        let start = self.index_in_parent(first)?;
        let end = self.index_in_parent(last)?;
        if end < start {
            return None;
        }
        let moved: Vec<NodeId> = self.children(parent)[start..=end].to_vec();
        let wrapper = self.add_node(kind);
        for id in &moved {
            self.detach(*id);
        }
        self.insert_child(parent, start, wrapper);
        for id in moved {
            self.append_child(wrapper, id);
        }
        Some(wrapper)
    }

    /// Put `new` in place of `old`; `old` becomes detached.
    pub fn replace(&mut self, old: NodeId, new: NodeId) {
        if let (Some(parent), Some(index)) = (self.parent(old), self.index_in_parent(old)) {
            self.detach(old);
            self.insert_child(parent, index, new);
        }
    }

    /// Parent chain, nearest first.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cur = self.parent(id);
        while let Some(p) = cur {
            out.push(p);
            cur = self.parent(p);
        }
        out
    }

    /// Pre-order traversal from `id`.
    pub fn walk(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.children(n).iter().rev());
        }
        out
    }

    /// Kernel calls reachable from the root, in source order.
    pub fn kernel_calls(&self) -> Vec<NodeId> {
        self.walk(self.root)
            .into_iter()
            .filter(|n| matches!(self.kind(*n), NodeKind::KernelCall(_)))
            .collect()
    }

    pub fn loops(&self) -> Vec<NodeId> {
        self.walk(self.root)
            .into_iter()
            .filter(|n| matches!(self.kind(*n), NodeKind::Loop(_)))
            .collect()
    }

    /// Loops not nested in another loop.
    pub fn outermost_loops(&self) -> Vec<NodeId> {
        self.loops()
            .into_iter()
            .filter(|l| !self.ancestors(*l).iter().any(|a| matches!(self.kind(*a), NodeKind::Loop(_))))
            .collect()
    }

    pub fn as_loop(&self, id: NodeId) -> Option<&LoopNode> {
        match self.kind(id) {
            NodeKind::Loop(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_call(&self, id: NodeId) -> Option<&KernelCallNode> {
        match self.kind(id) {
            NodeKind::KernelCall(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_directive(&self, id: NodeId) -> Option<&Directive> {
        match self.kind(id) {
            NodeKind::Directive(d) => Some(d),
            _ => None,
        }
    }

    /// Innermost loop enclosing `id`.
    pub fn enclosing_loop(&self, id: NodeId) -> Option<NodeId> {
        self.ancestors(id).into_iter().find(|a| self.as_loop(*a).is_some())
    }

    /// Outermost loop that is `id` or encloses it.
    pub fn outermost_loop_of(&self, id: NodeId) -> Option<NodeId> {
        let mut best = self.as_loop(id).map(|_| id);
        for a in self.ancestors(id) {
            if self.as_loop(a).is_some() {
                best = Some(a);
            }
        }
        best
    }

    /// Directives enclosing `id`, nearest first.
    pub fn enclosing_directives(&self, id: NodeId) -> Vec<(NodeId, &Directive)> {
        self.ancestors(id)
            .into_iter()
            .filter_map(|a| self.as_directive(a).map(|d| (a, d)))
            .collect()
    }

    /// Kernel calls in the subtree rooted at `id`.
    pub fn calls_under(&self, id: NodeId) -> Vec<&KernelCallNode> {
        self.walk(id).into_iter().filter_map(|n| self.as_call(n)).collect()
    }

    /// Dotted child-index path from the root (`"1.0"`).
    pub fn path_of(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut cur = id;
        while let Some(i) = self.index_in_parent(cur) {
            parts.push(i.to_string());
            cur = match self.parent(cur) {
                Some(p) => p,
                None => break,
            };
        }
        parts.reverse();
        if parts.is_empty() {
            "root".to_string()
        } else {
            parts.join(".")
        }
    }

    pub fn resolve_path(&self, path: &str) -> Option<NodeId> {
        let mut cur = self.root;
        if path == "root" {
            return Some(cur);
        }
        for part in path.split('.') {
            let i: usize = part.trim().parse().ok()?;
            cur = *self.children(cur).get(i)?;
        }
        Some(cur)
    }

    /// Short human-readable description used in error messages.
    pub fn describe(&self, id: NodeId) -> String {
        let kernels: Vec<&str> = self.calls_under(id).iter().map(|c| c.invocation.name()).collect();
        let what = match self.kind(id) {
            NodeKind::Block { label } => return format!("Block '{}'", label),
            NodeKind::Loop(l) if l.is_colour_loop() => "colour Loop".to_string(),
            NodeKind::Loop(l) => format!("{} Loop", l.space),
            NodeKind::Directive(d) => format!("{:?} Directive", d.kind()),
            NodeKind::HaloExchange(h) => return format!("HaloExchange of {} at {}", h.field, self.path_of(id)),
            NodeKind::KernelCall(_) => "KernelCall".to_string(),
        };
        format!("{} at {} ({})", what, self.path_of(id), kernels.join(", "))
    }

    fn view_node(&self, id: NodeId, depth: usize, out: &mut String) {
        let pad = "    ".repeat(depth);
        let line = match self.kind(id) {
            NodeKind::Block { label } => format!("Schedule[{}]", label),
            NodeKind::Loop(l) => format!("Loop[{}, {}, upper={}]", l.space, l.variable, l.upper),
            NodeKind::KernelCall(c) => {
                let args: Vec<&str> = c.invocation.args.iter().map(|a| a.actual.text()).collect();
                let inline = if c.module_inline { " [inline]" } else { "" };
                format!("KernelCall {}({}){}", c.invocation.name(), args.join(", "), inline)
            }
            NodeKind::Directive(d) => format!("Directive[{:?}]", d.kind()),
            NodeKind::HaloExchange(h) => format!(
                "HaloExchange[{}, depth={}{}]",
                h.field,
                h.depth,
                if h.conditional { ", check_dirty" } else { "" }
            ),
        };
        out.push_str(&pad);
        out.push_str(&line);
        out.push('\n');
        for c in self.children(id) {
            self.view_node(*c, depth + 1, out);
        }
    }

    /// Indented text rendering of the tree.
    pub fn view(&self) -> String {
        let mut out = String::new();
        self.view_node(self.root, 0, &mut out);
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// Read after write
    Flow,
    /// Write after read
    Anti,
    /// Write after write
    Output,
}

/// Ordering constraint between the loops of two calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyEdge {
    pub from: NodeId,
    pub to: NodeId,
    /// Normalised actual-argument text of the shared field
    pub field: String,
    pub kind: DependencyKind,
}

/// The IR of one invoke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub name: String,
    pub invoke: InvokeCall,
    pub tree: CallTree,
    /// Unique invoke arguments in first-appearance order
    pub arguments: Vec<InvokeArgument>,
    pub dependencies: Vec<DependencyEdge>,
}

impl Schedule {
    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    /// Dependency edges touching `id` or anything below it.
    pub fn edges_touching(&self, id: NodeId) -> Vec<&DependencyEdge> {
        let inside = self.tree.walk(id);
        self.dependencies
            .iter()
            .filter(|e| inside.contains(&e.from) || inside.contains(&e.to))
            .collect()
    }

    pub fn view(&self) -> String {
        let mut out = self.tree.view();
        for e in &self.dependencies {
            out.push_str(&format!(
                "  dep {:?} {} -> {} on {}\n",
                e.kind,
                self.tree.path_of(e.from),
                self.tree.path_of(e.to),
                e.field
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loop_node() -> NodeKind {
        NodeKind::Loop(LoopNode {
            space: IterationSpace::CellColumn,
            variable: "cell".into(),
            upper: UpperBound::OwnedCells,
        })
    }

    #[test]
    fn test_append_and_paths() {
        let mut t = CallTree::new("invoke_0");
        let a = t.add_node(loop_node());
        let b = t.add_node(loop_node());
        t.append_child(t.root(), a);
        t.append_child(t.root(), b);
        assert_eq!(t.path_of(b), "1");
        assert_eq!(t.resolve_path("1"), Some(b));
        assert_eq!(t.resolve_path("root"), Some(t.root()));
        assert_eq!(t.resolve_path("7"), None);
        assert_eq!(t.parent(a), Some(t.root()));
    }

    #[test]
    fn test_wrap_contiguous_range() {
        let mut t = CallTree::new("s");
        let ids: Vec<NodeId> = (0..3).map(|_| t.add_node(loop_node())).collect();
        for id in &ids {
            t.append_child(t.root(), *id);
        }
        let w = t
            .wrap(ids[1], ids[2], NodeKind::Directive(Directive::AccParallel { default_present: true }))
            .unwrap();
        assert_eq!(t.children(t.root()), &[ids[0], w]);
        assert_eq!(t.children(w), &[ids[1], ids[2]]);
        assert_eq!(t.path_of(ids[2]), "1.1");
        assert_eq!(t.enclosing_directives(ids[1]).len(), 1);
    }

    #[test]
    fn test_replace_detaches_old() {
        let mut t = CallTree::new("s");
        let a = t.add_node(loop_node());
        t.append_child(t.root(), a);
        let b = t.add_node(loop_node());
        t.replace(a, b);
        assert_eq!(t.children(t.root()), &[b]);
        assert!(!t.contains(a));
        assert!(t.contains(b));
        assert_eq!(t.outermost_loops(), vec![b]);
    }
}
