use serde::{Deserialize, Serialize};

/// Half-open byte range `[start, end)` into the source text.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy, Default, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub const fn new(start: u32, end: u32) -> Self {
        Span { start, end }
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Smallest span covering both `self` and `other`.
    pub fn cover(self, other: Span) -> Span {
        if self.is_empty() && self.start == 0 {
            return other;
        }
        if other.is_empty() && other.start == 0 {
            return self;
        }
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl From<Span> for miette::SourceSpan {
    fn from(span: Span) -> Self {
        miette::SourceSpan::new((span.start as usize).into(), span.len().max(1) as usize)
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy, Hash)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Default for Position {
    fn default() -> Self {
        Position { line: 1, column: 1 }
    }
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Position { line, column }
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy, Default, Hash)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn contains(&self, position: &Position) -> bool {
        (self.start.line < position.line
            || (self.start.line == position.line && self.start.column <= position.column))
            && (self.end.line > position.line
                || (self.end.line == position.line && self.end.column >= position.column))
    }
}

/// Line-start offset table supplied by the parser.
///
/// Spans are stored as byte offsets and resolved to 1-based line/column
/// lazily through this index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineIndex {
    line_starts: Vec<u32>,
}

impl Default for LineIndex {
    fn default() -> Self {
        Self {
            line_starts: vec![0],
        }
    }
}

impl LineIndex {
    pub fn new(mut line_starts: Vec<u32>) -> Self {
        if line_starts.first() != Some(&0) {
            line_starts.insert(0, 0);
        }
        line_starts.dedup();
        Self { line_starts }
    }

    pub fn from_source(source: &str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(
                source
                    .char_indices()
                    .filter(|(_, c)| *c == '\n')
                    .map(|(i, _)| i as u32 + 1),
            )
            .collect();
        Self { line_starts }
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    pub fn position(&self, offset: u32) -> Position {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        Position {
            line: line as u32 + 1,
            column: offset - self.line_starts[line] + 1,
        }
    }

    pub fn line(&self, offset: u32) -> u32 {
        self.position(offset).line
    }

    pub fn range(&self, span: Span) -> Range {
        Range {
            start: self.position(span.start),
            end: self.position(span.end),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::first_char(0, Position::new(1, 1))]
    #[case::end_of_first_line(5, Position::new(1, 6))]
    #[case::start_of_second_line(6, Position::new(2, 1))]
    #[case::inside_third_line(14, Position::new(3, 3))]
    fn test_position(#[case] offset: u32, #[case] expected: Position) {
        let index = LineIndex::from_source("x = 1\ny = 2\nz = 3\n");
        assert_eq!(index.position(offset), expected);
    }

    #[test]
    fn test_new_inserts_zero() {
        let index = LineIndex::new(vec![4, 9]);
        assert_eq!(index.line_count(), 3);
        assert_eq!(index.line(3), 1);
        assert_eq!(index.line(4), 2);
    }

    #[rstest]
    #[case(Span::new(2, 4), Span::new(6, 9), Span::new(2, 9))]
    #[case(Span::default(), Span::new(6, 9), Span::new(6, 9))]
    fn test_cover(#[case] a: Span, #[case] b: Span, #[case] expected: Span) {
        assert_eq!(a.cover(b), expected);
    }

    #[test]
    fn test_range_contains() {
        let range = Range {
            start: Position::new(1, 3),
            end: Position::new(2, 4),
        };
        assert!(range.contains(&Position::new(1, 9)));
        assert!(!range.contains(&Position::new(2, 5)));
    }
}
