use std::path::PathBuf;

use self::lexer::Span;

pub mod ast;
pub mod intern;
pub mod lexer;
pub mod parser;
pub mod printer;

#[derive(Debug, Clone)]
pub struct SourceFile {
    pub contents: String,
    pub origin: SourceFileOrigin,
}

impl SourceFile {
    pub fn from_memory(contents: impl Into<String>) -> Self {
        Self {
            contents: contents.into(),
            origin: SourceFileOrigin::Memory,
        }
    }

    pub fn value_of_span(&self, span: Span) -> &str {
        &self.contents[span.start..span.end]
    }

    /// One-based line and column of a byte offset
    pub fn line_and_column(&self, position: usize) -> (usize, usize) {
        let position = position.min(self.contents.len());
        let before = &self.contents[..position];
        let line = before.matches('\n').count() + 1;
        let column = position - before.rfind('\n').map(|i| i + 1).unwrap_or(0) + 1;

        (line, column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceFileOrigin {
    Memory,
    File(PathBuf),
}

impl core::fmt::Display for SourceFileOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceFileOrigin::Memory => f.write_str("<memory>"),
            SourceFileOrigin::File(path) => f.write_fmt(format_args!("{}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_and_column_are_one_based() {
        let source = SourceFile::from_memory("let a;\nlet b;");

        assert_eq!(source.line_and_column(0), (1, 1));
        assert_eq!(source.line_and_column(4), (1, 5));
        assert_eq!(source.line_and_column(7), (2, 1));
        assert_eq!(source.line_and_column(11), (2, 5));
    }
}
