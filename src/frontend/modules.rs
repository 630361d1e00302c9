//! Locating kernel modules on disk.
//!
//! The manager maps Fortran module names to the files that define them,
//! scanning the configured search directories on first use. Each file
//! is parsed for kernel metadata at most once per run.

use crate::frontend::algorithm::AlgorithmFile;
use crate::frontend::metadata::parse_kernel_module;
use crate::ir::kernel::{BuiltinOp, Kernel, KernelRegistry};
use crate::utils::errors::PsyResult;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const SOURCE_EXTENSIONS: [&str; 4] = ["f90", "F90", "x90", "X90"];

#[derive(Debug, Default)]
pub struct ModuleManager {
    search_paths: Vec<PathBuf>,
    scanned: bool,
    modules: HashMap<String, PathBuf>,
    parsed: HashMap<PathBuf, Vec<Kernel>>,
}

impl ModuleManager {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths, ..Default::default() }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    fn scan(&mut self) -> PsyResult<()> {
        if self.scanned {
            return Ok(());
        }
        self.scanned = true;
        let mut files = Vec::new();
        for dir in &self.search_paths {
            collect_source_files(dir, &mut files);
        }
        files.sort();
        for file in files {
            let text = std::fs::read_to_string(&file)?;
            for name in declared_modules(&text) {
                match self.modules.get(&name) {
                    Some(existing) if existing != &file => {
                        warn!(
                            "module {} defined in both {} and {}; using the first",
                            name,
                            existing.display(),
                            file.display()
                        );
                    }
                    Some(_) => {}
                    None => {
                        self.modules.insert(name, file.clone());
                    }
                }
            }
        }
        debug!("module scan found {} module(s)", self.modules.len());
        Ok(())
    }

    /// File defining module `name`, if any.
    pub fn find_module(&mut self, name: &str) -> PsyResult<Option<PathBuf>> {
        self.scan()?;
        Ok(self.modules.get(&name.to_ascii_lowercase()).cloned())
    }

    /// Kernels declared in `path`, parsing the file on first request.
    pub fn kernels_in(&mut self, path: &Path) -> PsyResult<&[Kernel]> {
        if !self.parsed.contains_key(path) {
            debug!("parsing kernel metadata in {}", path.display());
            let text = std::fs::read_to_string(path)?;
            let kernels = parse_kernel_module(&text)?;
            self.parsed.insert(path.to_path_buf(), kernels);
        }
        Ok(self.parsed.get(path).map(|k| k.as_slice()).unwrap_or(&[]))
    }

    /// Register every kernel type the algorithm layer refers to that can
    /// be found on the search path. Missing kernels are left for the
    /// resolver to report.
    pub fn load_registry(&mut self, alg: &AlgorithmFile) -> PsyResult<KernelRegistry> {
        let mut registry = KernelRegistry::new();
        for name in alg.kernel_names() {
            if BuiltinOp::from_name(&name).is_some() || registry.contains(&name) {
                continue;
            }
            let mut candidates = Vec::new();
            if let Some(module) = alg.module_providing(&name) {
                candidates.push(module.to_string());
            }
            if let Some(stem) = name.strip_suffix("_type") {
                candidates.push(format!("{}_mod", stem));
            }
            for module in candidates {
                let Some(path) = self.find_module(&module)? else { continue };
                let kernels = self.kernels_in(&path)?.to_vec();
                let found = kernels.iter().any(|k| k.name() == name);
                registry.extend(kernels);
                if found {
                    info!("kernel {} from {}", name, path.display());
                    break;
                }
            }
        }
        Ok(registry)
    }
}

fn collect_source_files(dir: &Path, result: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        if path.is_dir() {
            collect_source_files(&path, result);
        } else if path
            .extension()
            .is_some_and(|e| SOURCE_EXTENSIONS.iter().any(|x| e == *x))
        {
            result.push(path);
        }
    }
}

/// Names from `module <name>` statements, ignoring `module procedure`.
fn declared_modules(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    for line in text.lines() {
        let code = line.split('!').next().unwrap_or("").trim().to_ascii_lowercase();
        let mut words = code.split_whitespace();
        if words.next() != Some("module") {
            continue;
        }
        if let Some(name) = words.next() {
            if name != "procedure" && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                names.push(name.to_string());
            }
        }
    }
    names
}
