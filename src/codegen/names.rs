//! Fortran names for generated variables.

use crate::utils::errors::{CodegenError, CodegenErrorKind};
use std::collections::{HashMap, HashSet};

/// Longest name Fortran 2003 accepts.
pub const MAX_NAME_LENGTH: usize = 63;

/// Turn actual-argument text (`state%f1`, `f(1)`) into a Fortran name.
pub fn sanitize(text: &str) -> Result<String, CodegenError> {
    let mut out = String::with_capacity(text.len());
    for c in text.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if c.is_whitespace() {
            continue;
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let out = out.trim_matches('_').to_string();
    match out.chars().next() {
        Some(c) if c.is_ascii_alphabetic() && out.len() <= MAX_NAME_LENGTH => Ok(out),
        _ => Err(CodegenError::new(
            CodegenErrorKind::InvalidIdentifier,
            format!("'{}' cannot be expressed as a Fortran name", text.trim()),
        )),
    }
}

/// Names already used in one generated subroutine.
#[derive(Debug, Default)]
pub struct NameTable {
    taken: HashSet<String>,
    by_key: HashMap<String, String>,
}

impl NameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a generated name so no dummy argument collides with it.
    pub fn reserve(&mut self, name: &str) {
        self.taken.insert(name.to_string());
    }

    /// Name for the data identified by `key`, derived from `text`.
    /// Repeated keys get the same name; colliding names get a suffix.
    pub fn name_for(&mut self, key: &str, text: &str) -> Result<String, CodegenError> {
        if let Some(name) = self.by_key.get(key) {
            return Ok(name.clone());
        }
        let base = sanitize(text)?;
        let mut name = base.clone();
        let mut n = 1;
        while self.taken.contains(&name) {
            n += 1;
            name = format!("{}_{}", base, n);
        }
        self.taken.insert(name.clone());
        self.by_key.insert(key.to_string(), name.clone());
        Ok(name)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.by_key.get(key).map(|s| s.as_str())
    }
}
