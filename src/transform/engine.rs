//! Atomic application of transformations to schedules.

use crate::config::Config;
use crate::ir::tree::{NodeId, Schedule};
use crate::transform::{TransformOptions, TransformationKind};
use crate::utils::errors::{InapplicableTransformationError, PsyResult};
use log::{debug, info};

/// A target node, a transformation kind and its options.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformationRequest {
    pub node: NodeId,
    pub kind: TransformationKind,
    pub options: TransformOptions,
}

impl TransformationRequest {
    pub fn new(node: NodeId, kind: TransformationKind) -> Self {
        Self { node, kind, options: TransformOptions::new() }
    }

    pub fn with_options(mut self, options: TransformOptions) -> Self {
        self.options = options;
        self
    }
}

pub struct TransformationEngine<'c> {
    config: &'c Config,
}

impl<'c> TransformationEngine<'c> {
    pub fn new(config: &'c Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        self.config
    }

    /// Apply `kind` to `node`. On any error `schedule` is left exactly as
    /// it was.
    pub fn apply(
        &self,
        schedule: &mut Schedule,
        node: NodeId,
        kind: TransformationKind,
        options: &TransformOptions,
    ) -> PsyResult<()> {
        let transform = kind.instantiate(options)?;
        if !schedule.tree.contains(node) {
            return Err(InapplicableTransformationError::new(
                kind.name(),
                node.to_string(),
                format!("node is not part of {}", schedule.name),
            )
            .into());
        }
        let before = schedule.tree.describe(node);
        transform.validate(schedule, node, self.config)?;

        let mut candidate = schedule.clone();
        transform.apply(&mut candidate, node, self.config)?;
        *schedule = candidate;

        info!("{}: applied {} to {}", schedule.name, kind, before);
        debug!("{}: schedule after {}:\n{}", schedule.name, kind, schedule.view());
        Ok(())
    }

    pub fn apply_request(&self, schedule: &mut Schedule, request: &TransformationRequest) -> PsyResult<()> {
        self.apply(schedule, request.node, request.kind, &request.options)
    }
}
