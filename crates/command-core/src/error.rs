//! Error taxonomy shared by the store and the server.
//!
//! Mirrors the error taxonomy from the spec: a validation error never
//! reaches the store; a store error is either "no such row" or "conditional
//! update matched nothing" (lease conflict) or a genuine backend failure.

use thiserror::Error;

/// A request field was missing or ill-typed. Maps to HTTP 400.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ValidationError(String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

/// Failure modes for a [`crate::store::CommandStore`] operation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `get`/conditional-update target does not exist. Maps to HTTP 404.
    #[error("command not found")]
    NotFound,

    /// `create` called with an id that already exists.
    #[error("command id already exists")]
    Conflict,

    /// A driver-level error (disk full, closed connection, corrupt schema).
    /// Fatal from the caller's point of view; surfaces as HTTP 500.
    #[error("command store error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Top-level error type returned by [`crate::store::CommandStore`] callers
/// that also need to report validation failures (i.e. the server).
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("command not found")]
    NotFound,

    #[error("lease is not current")]
    LeaseConflict,

    #[error(transparent)]
    Store(anyhow::Error),
}

impl From<StoreError> for CommandError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => CommandError::NotFound,
            StoreError::Conflict => CommandError::Validation(ValidationError::new(
                "command id already exists",
            )),
            StoreError::Backend(err) => CommandError::Store(err),
        }
    }
}
