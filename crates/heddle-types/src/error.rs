//! Parse errors shared by all identifier types

use smol_str::SmolStr;
use std::fmt;

/// What went wrong while parsing an identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseProblem {
    /// Input was empty
    Empty,
    /// Input exceeded the maximum length for the type
    TooLong {
        /// Maximum allowed length in bytes
        max: usize,
        /// Actual length in bytes
        actual: usize,
    },
    /// Input did not match the type's syntax
    Malformed(&'static str),
}

impl fmt::Display for ParseProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseProblem::Empty => write!(f, "must not be empty"),
            ParseProblem::TooLong { max, actual } => {
                write!(f, "too long: {actual} bytes (max {max})")
            }
            ParseProblem::Malformed(msg) => write!(f, "{msg}"),
        }
    }
}

/// Failure to parse one of the identifier types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, miette::Diagnostic)]
#[error("invalid {kind} {input:?}: {problem}")]
pub struct ParseError {
    kind: &'static str,
    input: SmolStr,
    problem: ParseProblem,
}

impl ParseError {
    pub(crate) fn new(kind: &'static str, input: &str, problem: ParseProblem) -> Self {
        Self {
            kind,
            input: SmolStr::new(input),
            problem,
        }
    }

    pub(crate) fn empty(kind: &'static str) -> Self {
        Self::new(kind, "", ParseProblem::Empty)
    }

    pub(crate) fn too_long(kind: &'static str, input: &str, max: usize) -> Self {
        Self::new(
            kind,
            input,
            ParseProblem::TooLong {
                max,
                actual: input.len(),
            },
        )
    }

    pub(crate) fn malformed(kind: &'static str, input: &str, msg: &'static str) -> Self {
        Self::new(kind, input, ParseProblem::Malformed(msg))
    }

    /// Which identifier type failed to parse
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// The problem encountered
    pub fn problem(&self) -> &ParseProblem {
        &self.problem
    }
}
