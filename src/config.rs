//! Run configuration.
//!
//! Passed by reference to the IR builder, the transformation engine and
//! the code generator. Nothing here is process-wide.

use crate::utils::pretty::DEFAULT_LINE_LENGTH;
use std::path::PathBuf;

/// Configuration for one run of the engine
#[derive(Clone, Debug)]
pub struct Config {
    /// Generate code for distributed memory (halo exchanges, global sums)
    pub distributed_memory: bool,

    /// Wrap generated lines longer than this; `None` disables wrapping
    pub line_length: Option<usize>,

    /// Padding between per-thread partial sums in reproducible reductions
    pub reprod_pad_size: usize,

    /// Suffix appended to the algorithm file stem to name the compute layer
    pub psy_suffix: String,

    /// Directories searched (recursively) for kernel modules
    pub search_paths: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            distributed_memory: true,
            line_length: Some(DEFAULT_LINE_LENGTH),
            reprod_pad_size: 8,
            psy_suffix: "_psy".to_string(),
            search_paths: Vec::new(),
        }
    }
}

impl Config {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn distributed_memory(mut self, enabled: bool) -> Self {
        self.distributed_memory = enabled;
        self
    }

    pub fn line_length(mut self, limit: Option<usize>) -> Self {
        self.line_length = limit;
        self
    }

    pub fn search_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_paths.push(dir.into());
        self
    }

    /// Compute-layer module name for an algorithm file stem.
    pub fn psy_module_name(&self, stem: &str) -> String {
        let base: String = stem
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c.to_ascii_lowercase() } else { '_' })
            .collect();
        format!("{}{}", base, self.psy_suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert!(c.distributed_memory);
        assert_eq!(c.line_length, Some(132));
        assert_eq!(c.reprod_pad_size, 8);
    }

    #[test]
    fn test_builder_and_module_name() {
        let c = Config::new().distributed_memory(false).line_length(None).search_path("kernels");
        assert!(!c.distributed_memory);
        assert_eq!(c.search_paths.len(), 1);
        assert_eq!(c.psy_module_name("Single-Invoke"), "single_invoke_psy");
    }
}
