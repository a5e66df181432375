//! Error types for Ripple operation graphs.

use crate::types::DataType;
use alloc::string::String;
use thiserror::Error;

/// Result type alias for Ripple operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors raised while building, attaching or propagating through an operation graph.
///
/// Invalid-state errors (`AlreadyAttached`, `NotSupported`) are fatal to the call that
/// raised them but leave the graph usable. `Inconsistent` reports an upstream that
/// broke the change-notification contract. `TypeMismatch` and `Evaluation` come from
/// per-item logic and propagate out of the notification that triggered them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// The operation is already attached to a source.
    #[error("Operation {operation} is already attached to a source")]
    AlreadyAttached { operation: &'static str },

    /// The operator variant is explicitly not implemented.
    #[error("Operation {operation} is not supported")]
    NotSupported { operation: &'static str },

    /// A structural notification does not match the recorded state.
    #[error("Inconsistent change notification in {operation}: {message}")]
    Inconsistent {
        operation: &'static str,
        message: String,
    },

    /// A mutation addressed a position outside the sequence.
    #[error("Index {index} out of bounds for sequence of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// A lambda body referenced a name no enclosing context binds.
    #[error("Variable not bound in evaluation context: {name}")]
    UnboundVariable { name: String },

    /// A value had an unexpected runtime type.
    #[error(
        "Type mismatch: expected {expected}, got {}",
        .got.map_or("null", |t| t.name())
    )]
    TypeMismatch {
        expected: DataType,
        got: Option<DataType>,
    },

    /// User supplied per-item logic failed.
    #[error("Evaluation failed: {message}")]
    Evaluation { message: String },
}

impl Error {
    /// Creates an already-attached error.
    pub fn already_attached(operation: &'static str) -> Self {
        Error::AlreadyAttached { operation }
    }

    /// Creates a not-supported error.
    pub fn not_supported(operation: &'static str) -> Self {
        Error::NotSupported { operation }
    }

    /// Creates an inconsistency error.
    pub fn inconsistent(operation: &'static str, message: impl Into<String>) -> Self {
        Error::Inconsistent {
            operation,
            message: message.into(),
        }
    }

    /// Creates an index out of bounds error.
    pub fn index_out_of_bounds(index: usize, len: usize) -> Self {
        Error::IndexOutOfBounds { index, len }
    }

    /// Creates an unbound variable error.
    pub fn unbound_variable(name: impl Into<String>) -> Self {
        Error::UnboundVariable { name: name.into() }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(expected: DataType, got: Option<DataType>) -> Self {
        Error::TypeMismatch { expected, got }
    }

    /// Creates an evaluation error.
    pub fn evaluation(message: impl Into<String>) -> Self {
        Error::Evaluation {
            message: message.into(),
        }
    }

    /// Returns true for errors caused by calling an operation in the wrong state.
    pub fn is_invalid_state(&self) -> bool {
        matches!(
            self,
            Error::AlreadyAttached { .. } | Error::NotSupported { .. }
        )
    }

    /// Returns true if an upstream broke the notification contract.
    pub fn is_inconsistency(&self) -> bool {
        matches!(self, Error::Inconsistent { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_error_display() {
        let err = Error::type_mismatch(DataType::Boolean, Some(DataType::Int64));
        assert_eq!(err.to_string(), "Type mismatch: expected boolean, got int64");

        let err = Error::type_mismatch(DataType::Int64, None);
        assert!(err.to_string().ends_with("got null"));

        let err = Error::not_supported("then_by");
        assert!(err.to_string().contains("then_by"));

        let err = Error::unbound_variable("x");
        assert!(err.to_string().contains("x"));

        let err = Error::index_out_of_bounds(5, 2);
        assert_eq!(err.to_string(), "Index 5 out of bounds for sequence of length 2");
    }

    #[test]
    fn test_error_classifiers() {
        assert!(Error::already_attached("order_by").is_invalid_state());
        assert!(Error::not_supported("then_by").is_invalid_state());
        assert!(!Error::evaluation("boom").is_invalid_state());
        assert!(Error::inconsistent("lambdas", "range out of bounds").is_inconsistency());
    }
}
