//! Error taxonomy for the traceability engine
//!
//! Four families of failures cross the engine boundary: malformed input,
//! missing records, denied mutations, and broken structural invariants.
//! Invariant violations indicate a bug in a caller or a prior migration
//! and are logged loudly at the point of detection before being returned.

use thiserror::Error;

/// Result alias used throughout the core.
pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed input, recoverable by the caller. Names the violated field.
    #[error("validation failed on `{field}`: {message}")]
    Validation { field: &'static str, message: String },

    /// Unknown relation, work item, user or artifact.
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    /// The actor lacks the required permission letter on the artifact.
    /// Never silently downgraded to a no-op.
    #[error("permission denied: user {user_id} lacks `{action}` on api {api_id}")]
    Permission {
        user_id: uuid::Uuid,
        api_id: u32,
        action: char,
    },

    /// A structural invariant is broken (kind ordering, non-converging
    /// permission repair). Fatal for the current operation.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl CoreError {
    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        CoreError::Validation {
            field,
            message: message.into(),
        }
    }

    pub(crate) fn not_found(what: &'static str, id: impl ToString) -> Self {
        CoreError::NotFound {
            what,
            id: id.to_string(),
        }
    }

    /// Constructs an [`CoreError::InvariantViolation`] and logs it at error
    /// level, since it indicates a bug rather than bad user input.
    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        let message = message.into();
        log::error!("invariant violation: {}", message);
        CoreError::InvariantViolation(message)
    }
}
