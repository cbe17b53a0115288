//! Error types for Vigil.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VigilError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VigilError {
    #[error("alert not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    /// Storage collaborator unavailable. The transition did not happen and
    /// the caller must retry.
    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("dispatch failure: {0}")]
    Dispatch(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl VigilError {
    /// Stable machine-readable code, used in API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            VigilError::NotFound(_) => "not_found",
            VigilError::Conflict(_) => "conflict",
            VigilError::Validation(_) => "validation_error",
            VigilError::Persistence(_) => "persistence_failure",
            VigilError::Dispatch(_) => "dispatch_failure",
            VigilError::Internal(_) => "internal_error",
        }
    }

    /// HTTP status the daemon answers with
    pub fn http_status(&self) -> u16 {
        match self {
            VigilError::NotFound(_) => 404,
            VigilError::Conflict(_) => 409,
            VigilError::Validation(_) => 422,
            VigilError::Persistence(_) => 503,
            VigilError::Dispatch(_) => 502,
            VigilError::Internal(_) => 500,
        }
    }

    /// Whether the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, VigilError::Persistence(_) | VigilError::Dispatch(_))
    }
}

impl From<serde_json::Error> for VigilError {
    fn from(e: serde_json::Error) -> Self {
        VigilError::Internal(format!("json: {}", e))
    }
}
