//! Error kinds surfaced by every compilation stage. Compilation is all or
//! nothing: the first error aborts the run and is reported by the caller.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("syntax error: {message} ({origin}:{line}:{column})")]
    Syntax {
        message: String,
        origin: String,
        line: usize,
        column: usize,
    },

    #[error("unsupported {node_kind}")]
    UnsupportedNode { node_kind: String },

    #[error("place not found: {id}")]
    PlaceNotFound { id: String },

    #[error("block not found: {id}")]
    BlockNotFound { id: String },

    #[error("block {block} has multiple back edges")]
    MultipleBackEdges { block: String },

    #[error("variable `{name}` accessed before declaration")]
    UseBeforeDeclaration { name: String },

    #[error("internal compiler error: {message}")]
    InvariantViolation { message: String },

    #[error("cannot resolve module `{specifier}` imported from {importer}")]
    ModuleNotFound { specifier: String, importer: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CompileError {
    pub fn unsupported(node_kind: impl Into<String>) -> Self {
        Self::UnsupportedNode {
            node_kind: node_kind.into(),
        }
    }

    /// Whether the error is caused by the input program (or its environment)
    /// rather than by an internal inconsistency of the compiler.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::Syntax { .. }
                | Self::UnsupportedNode { .. }
                | Self::UseBeforeDeclaration { .. }
                | Self::ModuleNotFound { .. }
                | Self::Io { .. }
        )
    }
}

pub type Result<T, E = CompileError> = std::result::Result<T, E>;

/// Builds a [`CompileError::InvariantViolation`]. With the `error-backtrace`
/// feature the message is prefixed with the raising location.
macro_rules! invariant {
    ($($arg:tt)*) => {{
        let message = format!($($arg)*);

        #[cfg(feature = "error-backtrace")]
        let message = format!(
            "{} (at {}:{}:{})",
            message,
            module_path!(),
            file!(),
            line!()
        );

        $crate::error::CompileError::InvariantViolation { message }
    }};
}

pub(crate) use invariant;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_errors_are_distinguished_from_bugs() {
        assert!(CompileError::unsupported("class declaration").is_user_error());
        assert!(
            CompileError::UseBeforeDeclaration {
                name: "x".to_owned()
            }
            .is_user_error()
        );
        assert!(!invariant!("bad phi {}", 3).is_user_error());
        assert!(
            !CompileError::MultipleBackEdges {
                block: "bb1".to_owned()
            }
            .is_user_error()
        );
    }

    #[test]
    fn invariant_message_contains_formatted_text() {
        let error = invariant!("missing block {}", "bb4");

        assert!(error.to_string().starts_with("internal compiler error: missing block bb4"));
    }
}
