//! Errors raised while building and evaluating Seldonian specifications.
use thiserror::Error;

use crate::interval::Interval;


/// A malformed constraint string.
///
/// Parse errors are fatal to building a specification and are never
/// retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("constraint is empty")]
    Empty,

    #[error("unexpected character '{found}' at offset {offset}")]
    UnexpectedChar { found: char, offset: usize },

    #[error("unexpected token '{found}' at offset {offset}")]
    UnexpectedToken { found: String, offset: usize },

    #[error("unexpected end of constraint")]
    UnexpectedEnd,

    #[error("unbalanced parentheses")]
    UnbalancedParentheses,

    #[error("a constraint may contain at most one inequality, found {0}")]
    MultipleInequalities(usize),

    #[error("'{0}' is not a supported comparison; use '<=' or '>='")]
    InvalidComparison(String),

    #[error("operator '{0}' is not supported")]
    UnsupportedOperator(String),

    #[error("'{name}' is not a measure function of the {regime} regime")]
    UnknownMeasure { name: String, regime: String },

    #[error("'{0}' is not one of the sensitive columns")]
    UnknownSensitiveAttribute(String),

    #[error("conditional expressions '(measure | [...])' are only \
             supported in supervised learning")]
    FilterOutsideSupervised,

    #[error("{name}() expects {expected} argument(s), got {found}")]
    Arity { name: String, expected: String, found: usize },

    #[error("delta must lie in (0, 1), got {0}")]
    InvalidDelta(f64),
}

/// Errors raised by the bound engine, the optimizer, and the safety test.
#[derive(Debug, Error)]
pub enum SeldonianError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("no rows left to estimate {measure} on filter {filter}")]
    InsufficientData { measure: String, filter: String },

    #[error("cannot divide by interval {divisor}, which contains zero")]
    DivisionBound { divisor: Interval },

    #[error("regime mismatch: {0}")]
    RegimeMismatch(String),

    #[error("the safety test must run on the safety partition, got the {0} partition")]
    PartitionMisuse(String),

    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SeldonianError>;


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_converts() {
        let err: SeldonianError = ParseError::MultipleInequalities(2).into();

        assert!(matches!(err,
                         SeldonianError::Parse(ParseError::MultipleInequalities(2))));
        assert!(err.to_string().contains("at most one inequality"));
    }
}
