//! Errors raised while compiling patterns and building route tables

use thiserror::Error;

/// A route pattern that cannot be compiled.
///
/// Carries the full pattern and the offending segment so build output can
/// point at the exact file that needs renaming.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid route pattern `{pattern}` at segment `{segment}`: {reason}")]
pub struct PatternError {
    pub pattern: String,
    pub segment: String,
    pub reason: PatternErrorReason,
}

impl PatternError {
    pub(crate) fn new(pattern: &str, segment: &str, reason: PatternErrorReason) -> Self {
        Self {
            pattern: pattern.to_string(),
            segment: segment.to_string(),
            reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternErrorReason {
    #[error("pattern must start with `/`")]
    MissingLeadingSlash,

    #[error("unbalanced brackets")]
    UnbalancedBrackets,

    #[error("placeholder name `{0}` is not a valid identifier")]
    InvalidName(String),

    #[error("literal text next to a placeholder must be separated by `.` or `-`")]
    MissingSeparator,

    #[error("placeholders in one segment must be separated by literal text")]
    AdjacentPlaceholders,

    #[error("a rest placeholder must be the whole final segment")]
    MisplacedRest,

    #[error("duplicate placeholder name `{0}`")]
    DuplicateName(String),

    #[error("regex compilation failed: {0}")]
    Regex(String),
}

/// Failure while assembling a [`RouteTable`](crate::RouteTable).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteTableError {
    #[error(transparent)]
    Pattern(#[from] PatternError),

    /// Two routes differ only in placeholder names, so neither can win.
    #[error("routes `{first}` and `{second}` have identical specificity")]
    Ambiguous { first: String, second: String },
}
