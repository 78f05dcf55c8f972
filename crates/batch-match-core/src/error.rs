//! Error types for mapping evaluation and matching.

use thiserror::Error;

/// Errors raised while evaluating declarative mappings.
///
/// Missing fields during path resolution are not errors; they resolve to
/// absence (or an empty sequence over `roots[*]`). A hash-bucket miss during
/// matching is likewise a legitimate outcome, never an error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MappingError {
    /// Malformed path-expression syntax. Fails fast and is surfaced at
    /// mapping-compile time where possible.
    #[error("invalid path expression `{expression}`: {message}")]
    Path { expression: String, message: String },

    /// A transform expression failed to parse or to evaluate.
    #[error("invalid transform expression `{expression}`: {message}")]
    Expression { expression: String, message: String },

    /// A textual selection set could not be parsed.
    #[error("invalid selection set `{input}`: {message}")]
    Selection { input: String, message: String },
}

/// Result type for mapping operations.
pub type MappingResult<T> = Result<T, MappingError>;
