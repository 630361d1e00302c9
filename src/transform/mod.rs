//! Schedule transformations.
//!
//! Each transformation is a small struct built from an options map. It
//! first checks that it applies to the target node, then rewrites the
//! schedule. The [`TransformationEngine`] runs both steps against a clone
//! and only commits a successful result, so a rejected request never
//! leaves a half-transformed schedule behind.

pub mod target;
pub mod engine;
pub mod parallel;
pub mod colour;
pub mod acc;
pub mod fuse;
pub mod movement;
pub mod inline;
pub mod script;

pub use engine::{TransformationEngine, TransformationRequest};
pub use script::{Script, ScriptStep};
pub use target::Target;

use crate::config::Config;
use crate::ir::tree::{NodeId, Schedule};
use crate::utils::errors::{AlreadyTransformedError, InapplicableTransformationError, PsyResult, ScriptError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Transformation pass trait.
pub trait Transform {
    /// Script identifier of the transformation.
    fn name(&self) -> &str;

    /// Check that the transformation applies to `node`. Must not mutate.
    fn validate(&self, schedule: &Schedule, node: NodeId, config: &Config) -> PsyResult<()>;

    /// Rewrite the schedule. Only called after `validate` succeeded.
    fn apply(&self, schedule: &mut Schedule, node: NodeId, config: &Config) -> PsyResult<()>;

    fn inapplicable(&self, schedule: &Schedule, node: NodeId, message: impl Into<String>) -> InapplicableTransformationError
    where
        Self: Sized,
    {
        InapplicableTransformationError::new(self.name(), schedule.tree.describe(node), message)
    }

    fn already_applied(&self, schedule: &Schedule, node: NodeId) -> AlreadyTransformedError
    where
        Self: Sized,
    {
        AlreadyTransformedError {
            transformation: self.name().to_string(),
            node: schedule.tree.describe(node),
        }
    }
}

/// Every transformation the engine knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformationKind {
    #[serde(rename = "omp_parallel_do")]
    OmpParallelLoop,
    Colour,
    AccParallel,
    AccLoop,
    AccEnterData,
    LoopFuse,
    Move,
    KernelModuleInline,
}

impl TransformationKind {
    pub const ALL: [TransformationKind; 8] = [
        TransformationKind::OmpParallelLoop,
        TransformationKind::Colour,
        TransformationKind::AccParallel,
        TransformationKind::AccLoop,
        TransformationKind::AccEnterData,
        TransformationKind::LoopFuse,
        TransformationKind::Move,
        TransformationKind::KernelModuleInline,
    ];

    /// Identifier used in scripts.
    pub fn name(&self) -> &'static str {
        match self {
            TransformationKind::OmpParallelLoop => "omp_parallel_do",
            TransformationKind::Colour => "colour",
            TransformationKind::AccParallel => "acc_parallel",
            TransformationKind::AccLoop => "acc_loop",
            TransformationKind::AccEnterData => "acc_enter_data",
            TransformationKind::LoopFuse => "loop_fuse",
            TransformationKind::Move => "move",
            TransformationKind::KernelModuleInline => "kernel_module_inline",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }

    /// Option keys accepted by this transformation.
    pub fn option_keys(&self) -> &'static [&'static str] {
        match self {
            TransformationKind::OmpParallelLoop => &["schedule", "reprod", "allow_reassociation"],
            TransformationKind::Colour => &[],
            TransformationKind::AccParallel => &["to", "default_present"],
            TransformationKind::AccLoop => &["independent", "gang", "vector", "collapse"],
            TransformationKind::AccEnterData => &[],
            TransformationKind::LoopFuse => &["with"],
            TransformationKind::Move => &["before", "after"],
            TransformationKind::KernelModuleInline => &[],
        }
    }

    /// Build the transformation from its options.
    pub fn instantiate(&self, options: &TransformOptions) -> PsyResult<Box<dyn Transform>> {
        options.check_keys(*self)?;
        Ok(match self {
            TransformationKind::OmpParallelLoop => Box::new(parallel::OmpParallelLoop::from_options(options)?),
            TransformationKind::Colour => Box::new(colour::Colour::new()),
            TransformationKind::AccParallel => Box::new(acc::AccParallel::from_options(options)?),
            TransformationKind::AccLoop => Box::new(parallel::AccLoop::from_options(options)?),
            TransformationKind::AccEnterData => Box::new(acc::AccEnterData::new()),
            TransformationKind::LoopFuse => Box::new(fuse::LoopFuse::from_options(options)?),
            TransformationKind::Move => Box::new(movement::Move::from_options(options)?),
            TransformationKind::KernelModuleInline => Box::new(inline::KernelModuleInline::new()),
        })
    }
}

impl fmt::Display for TransformationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Options of one transformation request, as given in a script.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransformOptions(BTreeMap<String, serde_json::Value>);

impl TransformOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    fn check_keys(&self, kind: TransformationKind) -> Result<(), ScriptError> {
        let allowed = kind.option_keys();
        match self.0.keys().find(|k| !allowed.contains(&k.as_str())) {
            Some(unknown) => Err(ScriptError::new(format!(
                "unknown option '{}' for {} (accepted: {})",
                unknown,
                kind,
                if allowed.is_empty() { "none".to_string() } else { allowed.join(", ") }
            ))),
            None => Ok(()),
        }
    }

    pub fn bool(&self, key: &str, default: bool) -> Result<bool, ScriptError> {
        match self.0.get(key) {
            None => Ok(default),
            Some(serde_json::Value::Bool(b)) => Ok(*b),
            Some(other) => Err(ScriptError::new(format!("option '{}' must be a boolean, found {}", key, other))),
        }
    }

    pub fn string(&self, key: &str) -> Result<Option<String>, ScriptError> {
        match self.0.get(key) {
            None => Ok(None),
            Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
            Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
            Some(other) => Err(ScriptError::new(format!("option '{}' must be a string, found {}", key, other))),
        }
    }

    pub fn unsigned(&self, key: &str, default: u32) -> Result<u32, ScriptError> {
        match self.0.get(key) {
            None => Ok(default),
            Some(v) => v
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| ScriptError::new(format!("option '{}' must be a non-negative integer, found {}", key, v))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for kind in TransformationKind::ALL {
            assert_eq!(TransformationKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(TransformationKind::from_name("OMP_PARALLEL_DO"), Some(TransformationKind::OmpParallelLoop));
        assert_eq!(TransformationKind::from_name("tile"), None);
    }

    #[test]
    fn test_unknown_option_rejected() {
        let opts = TransformOptions::new().with("chunk", 4);
        let err = TransformationKind::OmpParallelLoop.instantiate(&opts).err().unwrap();
        assert!(err.to_string().contains("unknown option 'chunk'"));
        assert!(TransformationKind::Colour.instantiate(&TransformOptions::new()).is_ok());
    }

    #[test]
    fn test_typed_accessors() {
        let opts = TransformOptions::new().with("reprod", true).with("collapse", 1).with("schedule", "dynamic");
        assert!(opts.bool("reprod", false).unwrap());
        assert!(!opts.bool("missing", false).unwrap());
        assert_eq!(opts.unsigned("collapse", 1).unwrap(), 1);
        assert_eq!(opts.string("schedule").unwrap().as_deref(), Some("dynamic"));
        assert!(opts.bool("schedule", false).is_err());
    }
}
