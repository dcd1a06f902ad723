// src/error.rs
// Error types for the Anvil aggregation engine

use thiserror::Error;

/// Errors surfaced by the aggregation engine.
///
/// All evaluation errors are fail-fast: a pipeline run either completes
/// or fails as a whole, there is no partial output.
#[derive(Debug, Error)]
pub enum AnvilError {
    /// Malformed pipeline or stage specification
    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    /// Pipeline references an operator or stage the engine doesn't implement
    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    /// An operator received an operand of an unsupported type
    #[error("Type error: {0}")]
    ExpressionType(String),

    /// Division or modulo by zero
    #[error("Arithmetic error: {0}")]
    Arithmetic(String),

    /// $unwind applied to a value that is not an array
    #[error("Unwind error: {0}")]
    UnwindPath(String),

    /// Malformed $match filter
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// aggregate() was called on a collection that doesn't exist
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    /// JSON (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, AnvilError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AnvilError::UnknownOperator("$frobnicate".to_string());
        assert_eq!(err.to_string(), "Unknown operator: $frobnicate");

        let err = AnvilError::Arithmetic("$divide by zero".to_string());
        assert!(err.to_string().contains("divide by zero"));
    }

    #[test]
    fn test_serde_error_conversion() {
        let bad: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: AnvilError = bad.unwrap_err().into();
        assert!(matches!(err, AnvilError::Serialization(_)));
    }
}
