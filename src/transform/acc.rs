//! OpenACC regions: `parallel` around a contiguous range of siblings and
//! `enter data` at the start of a schedule.

use crate::config::Config;
use crate::ir::tree::{Directive, DirectiveKind, NodeId, NodeKind, Schedule};
use crate::transform::{Target, TransformOptions, Transform};
use crate::utils::errors::PsyResult;

/// Wrap a node (or a run of siblings ending at `to`) in `!$acc parallel`.
#[derive(Debug, Clone, PartialEq)]
pub struct AccParallel {
    /// Last sibling of the wrapped range
    pub to: Option<Target>,
    pub default_present: bool,
}

impl AccParallel {
    pub fn new() -> Self {
        Self { to: None, default_present: true }
    }

    pub fn from_options(options: &TransformOptions) -> PsyResult<Self> {
        let to = match options.string("to")? {
            Some(t) => Some(t.parse::<Target>()?),
            None => None,
        };
        Ok(Self {
            to,
            default_present: options.bool("default_present", true)?,
        })
    }

    /// The wrapped siblings, first to last.
    fn range(&self, schedule: &Schedule, node: NodeId) -> PsyResult<Vec<NodeId>> {
        let tree = &schedule.tree;
        let Some(parent) = tree.parent(node) else {
            return Err(self.inapplicable(schedule, node, "the schedule root cannot be wrapped").into());
        };
        let last = match &self.to {
            Some(target) => target.resolve_one(schedule)?,
            None => node,
        };
        if tree.parent(last) != Some(parent) {
            return Err(self
                .inapplicable(schedule, node, format!("'to' target {} is not a sibling", tree.describe(last)))
                .into());
        }
        let siblings = tree.children(parent);
        let start = siblings.iter().position(|c| *c == node).unwrap_or(0);
        let end = siblings.iter().position(|c| *c == last).unwrap_or(start);
        if end < start {
            return Err(self
                .inapplicable(schedule, node, format!("'to' target {} comes before the start of the range", tree.describe(last)))
                .into());
        }
        Ok(siblings[start..=end].to_vec())
    }
}

impl Default for AccParallel {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for AccParallel {
    fn name(&self) -> &str {
        "acc_parallel"
    }

    fn validate(&self, schedule: &Schedule, node: NodeId, _config: &Config) -> PsyResult<()> {
        let tree = &schedule.tree;
        if let Some(parent) = tree.parent(node) {
            if let Some(Directive::AccParallel { .. }) = tree.as_directive(parent) {
                if tree.children(parent).first() == Some(&node) {
                    return Err(self.already_applied(schedule, node).into());
                }
            }
        }
        let range = self.range(schedule, node)?;
        if let Some((_, d)) = tree.enclosing_directives(node).first() {
            let msg = match d.kind() {
                DirectiveKind::AccParallel => "already inside an OpenACC parallel region",
                DirectiveKind::OmpParallelDo => "inside an OpenMP region",
                _ => "inside another OpenACC construct",
            };
            return Err(self.inapplicable(schedule, node, msg).into());
        }
        for id in range.iter().flat_map(|r| tree.walk(*r)) {
            match tree.kind(id) {
                NodeKind::Directive(d) if d.kind() == DirectiveKind::OmpParallelDo => {
                    return Err(self.inapplicable(schedule, node, "range contains an OpenMP region").into());
                }
                NodeKind::Directive(d) if d.kind() == DirectiveKind::AccParallel => {
                    return Err(self.inapplicable(schedule, node, "range contains an OpenACC parallel region").into());
                }
                NodeKind::Directive(d) if d.kind() == DirectiveKind::AccEnterData => {
                    return Err(self.inapplicable(schedule, node, "range contains the enter data directive").into());
                }
                NodeKind::HaloExchange(h) => {
                    return Err(self
                        .inapplicable(
                            schedule,
                            node,
                            format!("halo exchange of {} cannot run inside a device region", h.field),
                        )
                        .into());
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn apply(&self, schedule: &mut Schedule, node: NodeId, _config: &Config) -> PsyResult<()> {
        let range = self.range(schedule, node)?;
        let (Some(first), Some(last)) = (range.first().copied(), range.last().copied()) else {
            return Ok(());
        };
        schedule.tree.wrap(
            first,
            last,
            NodeKind::Directive(Directive::AccParallel { default_present: self.default_present }),
        );
        Ok(())
    }
}

/// Copy every field and operator of the invoke to the device once, at
/// the start of the schedule.
#[derive(Debug, Clone, Default)]
pub struct AccEnterData;

impl AccEnterData {
    pub fn new() -> Self {
        Self
    }
}

impl Transform for AccEnterData {
    fn name(&self) -> &str {
        "acc_enter_data"
    }

    fn validate(&self, schedule: &Schedule, node: NodeId, _config: &Config) -> PsyResult<()> {
        let tree = &schedule.tree;
        if node != tree.root() {
            return Err(self.inapplicable(schedule, node, "enter data can only be applied to the schedule root").into());
        }
        let present = tree
            .walk(node)
            .into_iter()
            .any(|n| matches!(tree.as_directive(n), Some(Directive::AccEnterData { .. })));
        if present {
            return Err(self.already_applied(schedule, node).into());
        }
        Ok(())
    }

    fn apply(&self, schedule: &mut Schedule, node: NodeId, _config: &Config) -> PsyResult<()> {
        let variables: Vec<String> = schedule
            .arguments
            .iter()
            .filter(|a| a.is_field() || a.is_operator())
            .map(|a| a.actual.text().to_string())
            .collect();
        let id = schedule
            .tree
            .add_node(NodeKind::Directive(Directive::AccEnterData { variables }));
        schedule.tree.insert_child(node, 0, id);
        Ok(())
    }
}
