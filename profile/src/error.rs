use thiserror::Error;

/// Errors produced while decoding, merging, or filtering profiles.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// The first non-empty line was not a valid `mode:` header.
    #[error("bad mode line: {0}")]
    BadModeLine(String),

    /// A record line did not match the `file:sl.sc,el.ec stmts count` shape.
    #[error("line {0:?} doesn't match expected format")]
    MalformedLine(String),

    /// A numeric field overflowed its integer type.
    #[error("invalid number {value:?} in line {line:?}")]
    BadNumber { line: String, value: String },

    /// Two records for the same block disagree on the statement count.
    #[error("inconsistent NumStmt in {file}: changed from {from} to {to}")]
    InconsistentNumStmt { file: String, from: u32, to: u32 },

    /// Profiles with different counting modes cannot be combined.
    #[error("cannot merge profiles in mode {left:?} with mode {right:?}")]
    ModeMismatch { left: String, right: String },

    /// A coverfile/skipfile pattern failed to compile.
    #[error("bad file pattern {pattern:?}: {source}")]
    BadPattern {
        pattern: String,
        source: regex::Error,
    },
}
