//! # psyforge - kernel/invoke source-to-source engine
//!
//! Reads an LFRic-style Fortran algorithm file, resolves the kernels it
//! invokes from their metadata, builds a call tree per invoke, applies
//! user-requested transformations (OpenMP, OpenACC, colouring, fusion,
//! reordering, module inlining) and writes two artefacts: the rewritten
//! algorithm layer and the generated compute (PSy) layer.
//!
//! ## Architecture
//!
//! ```text
//! Algorithm file ─┐
//!                 ├→ Frontend → IR (Schedule per invoke) → Transform → CodeGen → alg + psy
//! Kernel modules ─┘                    ↑
//!                              Analysis (dependences, hazards)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use psyforge::prelude::*;
//!
//! let config = Config::default();
//! let script = Script::from_json(r#"{"steps":[{"transformation":"colour","target":"loops"}]}"#)?;
//! let output = Pipeline::new(&config).run(&source, "alg", Some(&script))?;
//! println!("{}", output.code.psy);
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod frontend;
pub mod ir;
pub mod analysis;
pub mod transform;
pub mod codegen;
pub mod utils;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::codegen::{CodeGenerator, GeneratedCode};
    pub use crate::config::Config;
    pub use crate::frontend::{parse_algorithm, parse_kernel_module, resolve_invokes, AlgorithmFile, ModuleManager};
    pub use crate::ir::{IrBuilder, Kernel, KernelRegistry, KernelSignature, NodeId, Schedule};
    pub use crate::transform::{Script, Target, Transform, TransformationEngine, TransformationKind};
    pub use crate::utils::errors::*;
    pub use crate::{Pipeline, PipelineOutput};
}

use crate::codegen::{CodeGenerator, GeneratedCode};
use crate::config::Config;
use crate::frontend::{parse_algorithm, resolve_invokes, AlgorithmFile, ModuleManager};
use crate::ir::{IrBuilder, KernelRegistry, KernelSignature, Schedule};
use crate::transform::{Script, TransformationEngine};
use crate::utils::errors::PsyResult;
use log::info;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything a run produced, for inspection or output.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub file: AlgorithmFile,
    /// Schedules after transformation
    pub schedules: Vec<Schedule>,
    pub code: GeneratedCode,
}

impl PipelineOutput {
    /// Distinct kernels used by the invokes, in first-use order.
    pub fn kernels(&self) -> Vec<&KernelSignature> {
        let mut out: Vec<&KernelSignature> = Vec::new();
        for s in &self.schedules {
            for call in &s.invoke.calls {
                let sig = call.kernel.signature();
                if !out.iter().any(|k| k.name == sig.name) {
                    out.push(sig);
                }
            }
        }
        out
    }
}

/// Parse, build, transform and generate, in that order.
pub struct Pipeline<'c> {
    config: &'c Config,
}

impl<'c> Pipeline<'c> {
    pub fn new(config: &'c Config) -> Self {
        Self { config }
    }

    /// Run on `source`, loading kernels from the configured search paths.
    pub fn run(&self, source: &str, stem: &str, script: Option<&Script>) -> PsyResult<PipelineOutput> {
        let file = parse_algorithm(source)?;
        let mut modules = ModuleManager::new(self.config.search_paths.clone());
        let registry = modules.load_registry(&file)?;
        self.finish(file, &registry, stem, script)
    }

    /// Run on `source` against an already populated registry.
    pub fn run_with_registry(
        &self,
        source: &str,
        stem: &str,
        registry: &KernelRegistry,
        script: Option<&Script>,
    ) -> PsyResult<PipelineOutput> {
        let file = parse_algorithm(source)?;
        self.finish(file, registry, stem, script)
    }

    fn finish(
        &self,
        file: AlgorithmFile,
        registry: &KernelRegistry,
        stem: &str,
        script: Option<&Script>,
    ) -> PsyResult<PipelineOutput> {
        let invokes = resolve_invokes(&file, registry)?;
        info!("resolved {} invoke(s)", invokes.len());
        let mut schedules = IrBuilder::new(self.config).build_all(&invokes);
        if let Some(script) = script.filter(|s| !s.is_empty()) {
            let engine = TransformationEngine::new(self.config);
            script.apply(&mut schedules, &engine)?;
        }
        let code = CodeGenerator::new(self.config).generate(stem, &file, &schedules)?;
        Ok(PipelineOutput { file, schedules, code })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_builtin_only_pipeline() {
        let config = Config::default();
        let source = "program alg\n  call invoke(setval_c(f, 0.0_r_def))\nend program alg\n";
        let out = Pipeline::new(&config)
            .run_with_registry(source, "alg", &KernelRegistry::new(), None)
            .unwrap();
        assert_eq!(out.code.psy_module, "alg_psy");
        assert!(out.code.algorithm.contains("call invoke_0_setval_c(f)"));
        assert!(out.code.psy.contains("subroutine invoke_0_setval_c(f)"));
        assert_eq!(out.kernels().len(), 1);
    }
}
