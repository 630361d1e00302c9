//! Source location tracking for error reporting and source rewriting.
//!
//! Spans carry byte offsets as well as line/column pairs: the algorithm
//! layer is regenerated by splicing replacement text into the original
//! source, so offsets must be exact.

use std::fmt;
use serde::{Serialize, Deserialize};

/// A position in source code (line and column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Line number (1-indexed)
    pub line: usize,
    /// Column number (1-indexed)
    pub column: usize,
    /// Byte offset from start of file
    pub offset: usize,
}

impl SourceLocation {
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        Self { line, column, offset }
    }

    /// Location of the first byte of a file.
    pub fn start() -> Self {
        Self { line: 1, column: 1, offset: 0 }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A half-open span in source code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    /// Start line (1-indexed)
    pub start_line: usize,
    /// Start column (1-indexed)
    pub start_column: usize,
    /// End line (1-indexed)
    pub end_line: usize,
    /// End column (1-indexed)
    pub end_column: usize,
    /// Byte offset of start
    pub start_offset: usize,
    /// Byte offset one past the end
    pub end_offset: usize,
}

impl Span {
    pub fn new(start_line: usize, start_column: usize, end_line: usize, end_column: usize) -> Self {
        Self {
            start_line,
            start_column,
            end_line,
            end_column,
            start_offset: 0,
            end_offset: 0,
        }
    }

    pub fn from_locations(start: SourceLocation, end: SourceLocation) -> Self {
        Self {
            start_line: start.line,
            start_column: start.column,
            end_line: end.line,
            end_column: end.column,
            start_offset: start.offset,
            end_offset: end.offset,
        }
    }

    /// Span for generated constructs with no source text.
    pub fn dummy() -> Self {
        Self::default()
    }

    pub fn is_dummy(&self) -> bool {
        self.start_line == 0 && self.end_line == 0
    }

    pub fn start(&self) -> SourceLocation {
        SourceLocation {
            line: self.start_line,
            column: self.start_column,
            offset: self.start_offset,
        }
    }

    pub fn end(&self) -> SourceLocation {
        SourceLocation {
            line: self.end_line,
            column: self.end_column,
            offset: self.end_offset,
        }
    }

    /// Smallest span covering both.
    pub fn merge(&self, other: &Span) -> Span {
        if self.is_dummy() {
            return *other;
        }
        if other.is_dummy() {
            return *self;
        }
        let start = if self.start_offset <= other.start_offset { self.start() } else { other.start() };
        let end = if self.end_offset >= other.end_offset { self.end() } else { other.end() };
        Span::from_locations(start, end)
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.end_offset.saturating_sub(self.start_offset)
    }

    pub fn is_empty(&self) -> bool {
        self.start_offset == self.end_offset
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start_line == self.end_line {
            write!(f, "{}:{}-{}", self.start_line, self.start_column, self.end_column)
        } else {
            write!(
                f,
                "{}:{}-{}:{}",
                self.start_line, self.start_column, self.end_line, self.end_column
            )
        }
    }
}

/// Line index over a source text.
#[derive(Debug, Clone)]
pub struct SourceMap {
    source: String,
    line_starts: Vec<usize>,
}

impl SourceMap {
    pub fn new(source: String) -> Self {
        let mut line_starts = vec![0];
        for (i, c) in source.char_indices() {
            if c == '\n' {
                line_starts.push(i + 1);
            }
        }
        Self { source, line_starts }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn offset_to_location(&self, offset: usize) -> SourceLocation {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(line) => line.saturating_sub(1),
        };
        let column = offset - self.line_starts[line] + 1;
        SourceLocation::new(line + 1, column, offset)
    }

    pub fn span_text(&self, span: &Span) -> &str {
        &self.source[span.start_offset..span.end_offset]
    }

    /// Byte offset just past the newline ending the line containing `offset`
    /// (or the end of the text on the last line).
    pub fn next_line_start(&self, offset: usize) -> usize {
        match self.line_starts.binary_search(&offset) {
            Ok(line) => self.line_starts.get(line + 1).copied(),
            Err(line) => self.line_starts.get(line).copied(),
        }
        .unwrap_or(self.source.len())
    }

    /// Leading whitespace of the line containing `offset`.
    pub fn indentation_at(&self, offset: usize) -> &str {
        let loc = self.offset_to_location(offset);
        let start = self.line_starts[loc.line - 1];
        let line = &self.source[start..];
        let width = line.len() - line.trim_start_matches([' ', '\t']).len();
        &line[..width]
    }

    pub fn line(&self, line_number: usize) -> Option<&str> {
        if line_number == 0 || line_number > self.line_starts.len() {
            return None;
        }
        let start = self.line_starts[line_number - 1];
        let end = self.line_starts
            .get(line_number)
            .copied()
            .unwrap_or(self.source.len());
        Some(self.source[start..end].trim_end_matches(['\n', '\r']))
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_display() {
        let span = Span::new(1, 5, 1, 10);
        assert_eq!(format!("{}", span), "1:5-10");

        let span = Span::new(1, 5, 3, 10);
        assert_eq!(format!("{}", span), "1:5-3:10");
    }

    #[test]
    fn test_span_merge_uses_offsets() {
        let a = Span::from_locations(SourceLocation::new(1, 1, 0), SourceLocation::new(1, 5, 4));
        let b = Span::from_locations(SourceLocation::new(2, 3, 12), SourceLocation::new(2, 9, 18));
        let merged = a.merge(&b);
        assert_eq!(merged.start_offset, 0);
        assert_eq!(merged.end_offset, 18);
        assert_eq!(merged.end_line, 2);
        assert_eq!(Span::dummy().merge(&b), b);
    }

    #[test]
    fn test_source_map() {
        let map = SourceMap::new("line1\n  line2\nline3".to_string());

        assert_eq!(map.line_count(), 3);
        assert_eq!(map.line(2), Some("  line2"));

        let loc = map.offset_to_location(8);
        assert_eq!(loc.line, 2);
        assert_eq!(loc.column, 3);

        assert_eq!(map.next_line_start(2), 6);
        assert_eq!(map.next_line_start(15), 19);
        assert_eq!(map.indentation_at(9), "  ");
    }
}
