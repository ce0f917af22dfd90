//! Typed error hierarchy for the EcoSphere backend.
//!
//! `EcoError` carries the domain failures that map onto a specific HTTP
//! status. Storage and plumbing failures stay as `anyhow::Error` and are
//! wrapped in `EcoError::Other`, which the API layer renders as a 500.

use thiserror::Error;

/// Errors raised by domain operations (database methods, services, jobs).
#[derive(Debug, Error)]
pub enum EcoError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("{0} not found")]
    Missing(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Authentication credentials were not provided or are invalid")]
    Unauthorized,

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("AI provider error: {0}")]
    Provider(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EcoError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        EcoError::NotFound { entity, id }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        EcoError::Validation(message.into())
    }
}
