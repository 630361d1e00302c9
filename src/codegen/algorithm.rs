//! Algorithm-layer rewriting.
//!
//! Every `call invoke(...)` statement becomes a call to its generated
//! subroutine, and each program unit that contained invokes gains a `use`
//! of the compute-layer module. Everything else is copied through.

use crate::config::Config;
use crate::frontend::AlgorithmFile;
use crate::ir::tree::Schedule;
use crate::utils::errors::{PsyError, PsyResult};
use crate::utils::pretty::CodeFormatter;
use log::debug;

/// A replacement of `start..end` in the original text.
#[derive(Debug)]
struct Edit {
    start: usize,
    end: usize,
    text: String,
}

pub struct AlgorithmRewriter<'c> {
    config: &'c Config,
}

impl<'c> AlgorithmRewriter<'c> {
    pub fn new(config: &'c Config) -> Self {
        Self { config }
    }

    /// Rewrite `file` so its invokes call into `psy_module`.
    pub fn rewrite(&self, file: &AlgorithmFile, schedules: &[Schedule], psy_module: &str) -> PsyResult<String> {
        let source = file.source.source();
        if file.invokes.is_empty() {
            return Ok(source.to_string());
        }

        let mut edits = Vec::new();
        let mut per_unit: Vec<(usize, Vec<&str>)> = Vec::new();
        for schedule in schedules {
            let invoke = &schedule.invoke;
            let span = &invoke.span;
            if span.end_offset > source.len() || span.start_offset > span.end_offset {
                return Err(PsyError::Internal(format!("span of {} lies outside the algorithm file", invoke.name)));
            }
            let indent = file.source.indentation_at(span.start_offset);
            let actuals: Vec<&str> = schedule.arguments.iter().map(|a| a.actual.text()).collect();
            let call = format!("call {}({})", schedule.name, actuals.join(", "));
            edits.push(Edit {
                start: span.start_offset,
                end: span.end_offset,
                text: self.format_line(indent, &call, true),
            });
            match per_unit.iter_mut().find(|(u, _)| *u == invoke.unit) {
                Some((_, names)) => names.push(&schedule.name),
                None => per_unit.push((invoke.unit, vec![&schedule.name])),
            }
        }

        for (unit, names) in per_unit {
            let Some(pu) = file.units.get(unit) else {
                return Err(PsyError::Internal(format!("invoke refers to missing program unit {}", unit)));
            };
            let statement = format!("use {}, only: {}", psy_module, names.join(", "));
            debug!("adding '{}' to {}", statement, pu.name);
            edits.push(Edit {
                start: pu.insert_at,
                end: pu.insert_at,
                text: self.format_line(&pu.indent, &statement, false),
            });
        }

        edits.sort_by(|a, b| b.start.cmp(&a.start));
        let mut out = source.to_string();
        for e in edits {
            out.replace_range(e.start..e.end, &e.text);
        }
        Ok(out)
    }

    /// One statement at `indent`, wrapped to the line limit. In place of
    /// an existing statement the leading indentation is already there and
    /// the trailing newline is not ours.
    fn format_line(&self, indent: &str, statement: &str, in_place: bool) -> String {
        let mut f = CodeFormatter::new(indent).with_line_length(self.config.line_length);
        f.indent();
        f.writeln(statement);
        let text = f.finish();
        if !in_place {
            return text;
        }
        let text = text.strip_prefix(indent).unwrap_or(&text);
        text.strip_suffix('\n').unwrap_or(text).to_string()
    }
}
