//! Node selectors used by scripts and by transformation options.
//!
//! ```text
//! root                  the schedule root
//! 1.0                   child index path from the root
//! loops                 every outermost loop
//! kernel:<name>[#n]     calls of a kernel (n-th only, 1-based)
//! loop:<name>[#n]       innermost loop enclosing those calls
//! ```
//!
//! Kernel names match either the metadata type name or the name with its
//! `_type` suffix removed.

use crate::ir::tree::{NodeId, Schedule};
use crate::utils::errors::ScriptError;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Root,
    Path(Vec<usize>),
    Loops,
    Kernel { name: String, nth: Option<usize> },
    LoopOf { name: String, nth: Option<usize> },
}

impl FromStr for Target {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let lower = text.to_ascii_lowercase();
        if lower == "root" {
            return Ok(Target::Root);
        }
        if lower == "loops" {
            return Ok(Target::Loops);
        }
        if let Some(rest) = lower.strip_prefix("kernel:") {
            let (name, nth) = parse_selector(rest, text)?;
            return Ok(Target::Kernel { name, nth });
        }
        if let Some(rest) = lower.strip_prefix("loop:") {
            let (name, nth) = parse_selector(rest, text)?;
            return Ok(Target::LoopOf { name, nth });
        }
        let path: Result<Vec<usize>, _> = lower.split('.').map(|p| p.trim().parse::<usize>()).collect();
        match path {
            Ok(p) if !p.is_empty() => Ok(Target::Path(p)),
            _ => Err(ScriptError::new(format!("unrecognised target '{}'", text))),
        }
    }
}

fn parse_selector(rest: &str, original: &str) -> Result<(String, Option<usize>), ScriptError> {
    let (name, nth) = match rest.split_once('#') {
        Some((name, n)) => {
            let n: usize = n
                .trim()
                .parse()
                .map_err(|_| ScriptError::new(format!("bad call index in target '{}'", original)))?;
            if n == 0 {
                return Err(ScriptError::new(format!("call indices start at 1 in target '{}'", original)));
            }
            (name, Some(n))
        }
        None => (rest, None),
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(ScriptError::new(format!("missing kernel name in target '{}'", original)));
    }
    Ok((name.to_string(), nth))
}

fn kernel_matches(kernel: &str, wanted: &str) -> bool {
    let kernel = kernel.to_ascii_lowercase();
    kernel == wanted || kernel.strip_suffix("_type") == Some(wanted)
}

impl Target {
    /// Nodes currently selected in `schedule`, in tree order. An empty
    /// result means the target does not exist in this schedule.
    pub fn resolve(&self, schedule: &Schedule) -> Vec<NodeId> {
        let tree = &schedule.tree;
        match self {
            Target::Root => vec![tree.root()],
            Target::Path(parts) => {
                let mut cur = tree.root();
                for &i in parts {
                    match tree.children(cur).get(i) {
                        Some(c) => cur = *c,
                        None => return Vec::new(),
                    }
                }
                vec![cur]
            }
            Target::Loops => tree.outermost_loops(),
            Target::Kernel { name, nth } | Target::LoopOf { name, nth } => {
                let calls: Vec<NodeId> = tree
                    .kernel_calls()
                    .into_iter()
                    .filter(|c| tree.as_call(*c).map(|k| kernel_matches(k.invocation.name(), name)).unwrap_or(false))
                    .collect();
                let chosen: Vec<NodeId> = match nth {
                    Some(n) => calls.get(n - 1).copied().into_iter().collect(),
                    None => calls,
                };
                if matches!(self, Target::Kernel { .. }) {
                    chosen
                } else {
                    let mut loops: Vec<NodeId> = Vec::new();
                    for l in chosen.into_iter().filter_map(|c| tree.enclosing_loop(c)) {
                        if !loops.contains(&l) {
                            loops.push(l);
                        }
                    }
                    loops
                }
            }
        }
    }

    /// Resolve to exactly one node.
    pub fn resolve_one(&self, schedule: &Schedule) -> Result<NodeId, ScriptError> {
        let found = self.resolve(schedule);
        match found.as_slice() {
            [one] => Ok(*one),
            [] => Err(ScriptError::new(format!("target '{}' matches nothing in {}", self, schedule.name))),
            many => Err(ScriptError::new(format!(
                "target '{}' matches {} nodes in {}; add #n to pick one",
                self,
                many.len(),
                schedule.name
            ))),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nth = |n: &Option<usize>| n.map(|n| format!("#{}", n)).unwrap_or_default();
        match self {
            Target::Root => write!(f, "root"),
            Target::Path(p) => {
                let parts: Vec<String> = p.iter().map(|i| i.to_string()).collect();
                write!(f, "{}", parts.join("."))
            }
            Target::Loops => write!(f, "loops"),
            Target::Kernel { name, nth: n } => write!(f, "kernel:{}{}", name, nth(n)),
            Target::LoopOf { name, nth: n } => write!(f, "loop:{}{}", name, nth(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_targets() {
        assert_eq!("root".parse::<Target>().unwrap(), Target::Root);
        assert_eq!(" Loops ".parse::<Target>().unwrap(), Target::Loops);
        assert_eq!("1.0".parse::<Target>().unwrap(), Target::Path(vec![1, 0]));
        assert_eq!(
            "kernel:Update_Field_Type#2".parse::<Target>().unwrap(),
            Target::Kernel { name: "update_field_type".into(), nth: Some(2) }
        );
        assert_eq!(
            "loop:setval_c".parse::<Target>().unwrap(),
            Target::LoopOf { name: "setval_c".into(), nth: None }
        );
    }

    #[test]
    fn test_bad_targets() {
        assert!("kernel:".parse::<Target>().is_err());
        assert!("loop:k#0".parse::<Target>().is_err());
        assert!("loop:k#x".parse::<Target>().is_err());
        assert!("first".parse::<Target>().is_err());
        assert!("1..2".parse::<Target>().is_err());
    }

    #[test]
    fn test_display_round_trip() {
        for s in ["root", "loops", "0.1", "kernel:k_type#3", "loop:setval_c"] {
            assert_eq!(s.parse::<Target>().unwrap().to_string(), s);
        }
    }

    #[test]
    fn test_kernel_name_without_suffix() {
        assert!(kernel_matches("Update_Field_Type", "update_field"));
        assert!(kernel_matches("update_field_type", "update_field_type"));
        assert!(!kernel_matches("update_field_type", "update"));
    }
}
