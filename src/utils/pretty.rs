//! Formatting utilities for generated Fortran.

use std::fmt;

/// Free-form Fortran line limit.
pub const DEFAULT_LINE_LENGTH: usize = 132;

/// An indenting writer for generated source.
///
/// When a line limit is set, lines that would exceed it are broken at
/// the last comma or space that fits and continued with `&`. Directive
/// lines (`!$omp`, `!$acc`) continue with their sentinel; plain comments
/// are left alone.
#[derive(Debug)]
pub struct CodeFormatter {
    output: String,
    indent_level: usize,
    indent_str: String,
    line_length: Option<usize>,
}

impl CodeFormatter {
    pub fn new(indent_str: &str) -> Self {
        Self {
            output: String::new(),
            indent_level: 0,
            indent_str: indent_str.to_string(),
            line_length: None,
        }
    }

    /// Two-space indentation, no line limit.
    pub fn default_indent() -> Self {
        Self::new("  ")
    }

    pub fn with_line_length(mut self, limit: Option<usize>) -> Self {
        self.line_length = limit;
        self
    }

    pub fn indent(&mut self) {
        self.indent_level += 1;
    }

    pub fn dedent(&mut self) {
        if self.indent_level > 0 {
            self.indent_level -= 1;
        }
    }

    /// Write one logical line at the current indentation.
    pub fn writeln(&mut self, s: &str) {
        if s.is_empty() {
            self.output.push('\n');
            return;
        }
        let prefix = self.indent_str.repeat(self.indent_level);
        let line = format!("{}{}", prefix, s);
        match self.line_length {
            Some(limit) if line.len() > limit => self.write_wrapped(&line, limit),
            _ => {
                self.output.push_str(&line);
                self.output.push('\n');
            }
        }
    }

    /// Write a line at the current indentation without wrapping it.
    pub fn writeln_raw(&mut self, s: &str) {
        if !s.is_empty() {
            self.output.push_str(&self.indent_str.repeat(self.indent_level));
            self.output.push_str(s);
        }
        self.output.push('\n');
    }

    pub fn newline(&mut self) {
        self.output.push('\n');
    }

    /// Write a `header` / body / `footer` group with the body indented.
    pub fn block<F: FnOnce(&mut Self)>(&mut self, header: &str, footer: &str, f: F) {
        self.writeln(header);
        self.indent();
        f(self);
        self.dedent();
        self.writeln(footer);
    }

    fn write_wrapped(&mut self, line: &str, limit: usize) {
        let trimmed = line.trim_start();
        let lead = &line[..line.len() - trimmed.len()];
        let continuation = if trimmed.starts_with("!$omp") {
            Some("!$omp& ")
        } else if trimmed.starts_with("!$acc") {
            Some("!$acc& ")
        } else if trimmed.starts_with('!') {
            self.output.push_str(line);
            self.output.push('\n');
            return;
        } else {
            None
        };

        let mut rest = line.to_string();
        let mut first = true;
        loop {
            let body = if first {
                rest.clone()
            } else {
                match continuation {
                    Some(sentinel) => format!("{}{}{}", lead, sentinel, rest),
                    None => format!("{}    & {}", lead, rest),
                }
            };
            // Room left for the trailing " &".
            let budget = limit.saturating_sub(2);
            if body.len() <= limit {
                self.output.push_str(&body);
                self.output.push('\n');
                return;
            }
            match Self::break_point(&body, budget) {
                Some(at) if at > lead.len() + 8 => {
                    let (head, tail) = body.split_at(at);
                    self.output.push_str(head.trim_end());
                    self.output.push_str(" &\n");
                    rest = tail.trim_start().to_string();
                    first = false;
                }
                _ => {
                    // Nothing sensible to break on; emit as is.
                    self.output.push_str(&body);
                    self.output.push('\n');
                    return;
                }
            }
        }
    }

    /// Byte index just after the last `,` or space before `budget`,
    /// ignoring characters inside string literals.
    fn break_point(line: &str, budget: usize) -> Option<usize> {
        let mut in_string: Option<char> = None;
        let mut best = None;
        for (i, c) in line.char_indices() {
            if i >= budget {
                break;
            }
            match in_string {
                Some(q) if c == q => in_string = None,
                Some(_) => {}
                None => match c {
                    '\'' | '"' => in_string = Some(c),
                    ',' | ' ' => best = Some(i + 1),
                    _ => {}
                },
            }
        }
        best
    }

    pub fn finish(self) -> String {
        self.output
    }

    pub fn output(&self) -> &str {
        &self.output
    }
}

impl fmt::Write for CodeFormatter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for line in s.split_inclusive('\n') {
            self.writeln(line.trim_end_matches('\n'));
        }
        Ok(())
    }
}

/// Format a list with separators.
pub fn format_list<T: fmt::Display>(items: &[T], sep: &str) -> String {
    items
        .iter()
        .map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join(sep)
}
