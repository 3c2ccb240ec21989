//! Constraint compilation errors
//!
//! Every way an expression can be rejected before it is ever evaluated.
//! Evaluation problems are not errors: they become diagnostics on the owning
//! tag and the evaluator falls back to `false` or `0`.

use thiserror::Error;

/// Errors raised while compiling constraint text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// Nothing to compile
    #[error("Empty expression")]
    Empty,

    /// An opening parenthesis was never closed
    #[error("Unmatched '(' in \"{0}\"")]
    UnmatchedOpen(String),

    /// A closing parenthesis has no opening partner
    #[error("Unmatched ')' in \"{0}\"")]
    UnmatchedClose(String),

    /// A string literal was never closed
    #[error("Unmatched '\"' in \"{0}\"")]
    UnmatchedQuote(String),

    /// Text that fits none of the grammar's shapes
    #[error("Unsupported construct: {0}")]
    Unsupported(String),

    /// A `{N}` reference with nothing behind it
    #[error("Reference {0} not found")]
    UnresolvedPlaceholder(String),

    /// A `{N}` reference that does not stand for exactly one value
    #[error("Reference {0} resolved incorrectly")]
    AmbiguousReference(String),

    /// Call of a function that does not exist
    #[error("Unsupported function '{0}'")]
    UnknownFunction(String),

    /// Wrong argument count or shape for a known function
    #[error("Invalid parameters for function '{function}': {args}")]
    InvalidArguments { function: String, args: String },

    /// `hasTag` naming a tag that does not exist
    #[error("Tag '{0}' not found")]
    UnknownTag(String),

    /// `hasNet` naming an unknown network
    #[error("Unknown network '{0}'")]
    UnknownNetwork(String),

    /// `getConfig` with a key outside the whitelist
    #[error("Unsupported configuration parameter: {0}")]
    UnknownConfigKey(String),

    /// `^` applied to a single operand
    #[error("Two or more arguments required for ^")]
    TooFewOperands,

    /// A non-boolean function used where a condition is expected
    #[error("'{0}' does not yield a boolean")]
    NotBoolean(String),

    /// A non-numeric function used where a number is expected
    #[error("'{0}' does not yield a number")]
    NotNumeric(String),

    /// A parameter list containing an empty item
    #[error("Empty parameter in '{0}'")]
    EmptyArgument(String),

    /// A quoted item with trailing text after its closing quote
    #[error("Malformed string literal: {0}")]
    MalformedString(String),
}
