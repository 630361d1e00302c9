//! Code generation: the rewritten algorithm layer and the compute layer.
//!
//! Both artefacts are produced in memory; nothing is written unless both
//! succeed.

pub mod names;
pub mod psy;
pub mod algorithm;

pub use algorithm::AlgorithmRewriter;
pub use names::{sanitize, NameTable};
pub use psy::PsyGenerator;

use crate::config::Config;
use crate::frontend::AlgorithmFile;
use crate::ir::tree::Schedule;
use crate::utils::errors::PsyResult;
use log::info;

/// The two generated texts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedCode {
    pub psy_module: String,
    pub algorithm: String,
    pub psy: String,
}

pub struct CodeGenerator<'c> {
    config: &'c Config,
}

impl<'c> CodeGenerator<'c> {
    pub fn new(config: &'c Config) -> Self {
        Self { config }
    }

    /// Generate both layers for an algorithm file named after `stem`.
    pub fn generate(&self, stem: &str, file: &AlgorithmFile, schedules: &[Schedule]) -> PsyResult<GeneratedCode> {
        let psy_module = self.config.psy_module_name(stem);
        let psy = PsyGenerator::new(self.config).generate(&psy_module, schedules)?;
        let algorithm = AlgorithmRewriter::new(self.config).rewrite(file, schedules, &psy_module)?;
        info!(
            "generated {} ({} invoke(s), {} line(s))",
            psy_module,
            schedules.len(),
            psy.lines().count()
        );
        Ok(GeneratedCode { psy_module, algorithm, psy })
    }
}
