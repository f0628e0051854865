//! Error types for armada-diff.

use thiserror::Error;

/// Errors raised while parsing unified diff text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiffError {
    /// A `@@ ... @@` line could not be parsed.
    #[error("line {line}: malformed hunk header {header:?}")]
    MalformedHunkHeader { line: usize, header: String },

    /// A hunk header appeared before any `---`/`+++` file header.
    #[error("line {line}: hunk found before any file header")]
    HunkWithoutFile { line: usize },

    /// A hunk body line did not start with ` `, `-`, `+` or `\`.
    #[error("line {line}: unexpected line in hunk body {content:?}")]
    UnexpectedLine { line: usize, content: String },

    /// Input ended while a hunk still expected more lines.
    #[error("diff ended inside hunk starting at line {line}")]
    TruncatedHunk { line: usize },
}
