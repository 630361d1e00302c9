//! JSON transformation scripts.
//!
//! ```json
//! { "steps": [
//!     { "invoke": "*", "transformation": "colour", "target": "loops" },
//!     { "invoke": "invoke_0", "transformation": "omp_parallel_do",
//!       "target": "loop:update_field_type", "options": { "schedule": "dynamic" },
//!       "optional": true }
//! ] }
//! ```

use crate::ir::tree::Schedule;
use crate::transform::{Target, TransformOptions, TransformationEngine, TransformationKind};
use crate::utils::errors::{PsyError, PsyResult, ScriptError};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

fn every_invoke() -> String {
    "*".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptStep {
    /// Invoke name, or `*` for every invoke
    #[serde(default = "every_invoke")]
    pub invoke: String,
    pub transformation: String,
    pub target: String,
    #[serde(default)]
    pub options: TransformOptions,
    /// Skip the step where the transformation does not apply
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    pub steps: Vec<ScriptStep>,
}

/// A step with its names checked.
struct CheckedStep<'s> {
    index: usize,
    step: &'s ScriptStep,
    kind: TransformationKind,
    target: Target,
}

impl Script {
    pub fn from_json(text: &str) -> PsyResult<Self> {
        let script: Script =
            serde_json::from_str(text).map_err(|e| ScriptError::new(format!("invalid script: {}", e)))?;
        script.check()?;
        Ok(script)
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn check(&self) -> Result<Vec<CheckedStep<'_>>, ScriptError> {
        self.steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                let kind = TransformationKind::from_name(&step.transformation).ok_or_else(|| {
                    ScriptError::at_step(index, format!("unknown transformation '{}'", step.transformation))
                })?;
                let target = step
                    .target
                    .parse::<Target>()
                    .map_err(|e| ScriptError::at_step(index, e.message))?;
                Ok(CheckedStep { index, step, kind, target })
            })
            .collect()
    }

    /// Apply every step in order to the matching schedules.
    pub fn apply(&self, schedules: &mut [Schedule], engine: &TransformationEngine) -> PsyResult<()> {
        let steps = self.check()?;
        for checked in &steps {
            let step = checked.step;
            let wanted = step.invoke.trim().to_ascii_lowercase();
            let mut matched_invoke = false;
            let mut found = 0usize;
            let mut applied = 0usize;

            for schedule in schedules.iter_mut().filter(|s| wanted == "*" || s.name == wanted) {
                matched_invoke = true;
                let nodes = checked.target.resolve(schedule);
                if nodes.is_empty() {
                    debug!("step {}: target {} not present in {}", checked.index, checked.target, schedule.name);
                }
                found += nodes.len();
                for node in nodes {
                    // Node ids survive rewrites; only a fused-away loop drops out.
                    if !schedule.tree.contains(node) {
                        continue;
                    }
                    match engine.apply(schedule, node, checked.kind, &step.options) {
                        Ok(()) => applied += 1,
                        Err(e) if step.optional && e.is_transformation_rejection() => {
                            warn!("step {}: skipped {} on {}: {}", checked.index, checked.kind, schedule.name, e);
                        }
                        Err(PsyError::Script(e)) => {
                            return Err(ScriptError::at_step(checked.index, e.message).into());
                        }
                        Err(e) => return Err(e),
                    }
                }
            }

            if !matched_invoke {
                return Err(ScriptError::at_step(checked.index, format!("no invoke named '{}'", step.invoke)).into());
            }
            if found == 0 && !step.optional {
                return Err(
                    ScriptError::at_step(checked.index, format!("target '{}' matches no node", step.target)).into(),
                );
            }
            info!("step {}: {} applied {} time(s)", checked.index, checked.kind, applied);
        }
        Ok(())
    }
}
