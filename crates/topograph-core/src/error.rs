//! Core error taxonomy.
//!
//! Variants group into the four caller-visible classes (not-found,
//! validation, timeout, size-exceeded) plus pass-through wrappers for the
//! collaborator errors. HTTP collaborators map classes to status codes via
//! [`CoreError::status_code`].

use thiserror::Error;
use topograph_model::CodecError;

pub type CoreResult<T> = Result<T, CoreError>;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CoreError {
    // --- not found (404) ---
    #[error("{0}")]
    DocumentNotFound(String),
    #[error("{0}")]
    StartNodeNotFound(String),
    #[error("{0}")]
    TraceNodeNotFound(String),
    #[error("{0}")]
    NotFound(String),

    // --- validation (409) ---
    #[error("{0}")]
    ProcessAlreadyStarted(String),
    #[error("{0}")]
    StatusError(String),
    #[error("{0}")]
    InappropriateStatus(String),
    #[error("{0}")]
    GraphBuildingError(String),
    #[error("{0}")]
    Validation(String),

    // --- timeout (408) ---
    #[error("{0}")]
    Timeout(String),

    // --- size exceeded (510) ---
    #[error("{description}: size {size} exceeds {max_size}")]
    SizeExceeded {
        description: String,
        size: usize,
        max_size: usize,
    },

    // --- collaborators ---
    #[error(transparent)]
    Store(StoreErrorWrapper),
    #[error(transparent)]
    Inventory(#[from] topograph_inventory::InventoryError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// Store errors keep their own classification: not-found, conflict and
/// timeout surface with the matching status code instead of a blanket 500.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct StoreErrorWrapper(#[from] pub topograph_store::StoreError);

impl From<topograph_store::StoreError> for CoreError {
    fn from(err: topograph_store::StoreError) -> Self {
        use topograph_store::StoreError;
        match err {
            StoreError::NotFound(msg) => CoreError::NotFound(msg),
            StoreError::Timeout(msg) => CoreError::Timeout(msg),
            // Revision conflicts are not retried; they surface as
            // validation errors per the propagation policy.
            StoreError::Conflict(msg) => CoreError::Validation(msg),
            other => CoreError::Store(StoreErrorWrapper(other)),
        }
    }
}

impl CoreError {
    /// HTTP status the web layer maps this error to.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            CoreError::DocumentNotFound(_)
            | CoreError::StartNodeNotFound(_)
            | CoreError::TraceNodeNotFound(_)
            | CoreError::NotFound(_) => 404,
            CoreError::ProcessAlreadyStarted(_)
            | CoreError::StatusError(_)
            | CoreError::InappropriateStatus(_)
            | CoreError::GraphBuildingError(_)
            | CoreError::Validation(_) => 409,
            CoreError::Timeout(_) => 408,
            CoreError::SizeExceeded { .. } => 510,
            CoreError::Store(_) | CoreError::Inventory(_) | CoreError::Codec(_)
            | CoreError::Serialization(_) => 500,
        }
    }

    /// The k-shortest-paths engine's double-timeout error.
    #[must_use]
    pub fn path_timeout() -> Self {
        CoreError::Timeout(
            "The request could not be completed within the allotted time. \
             Most likely there is no connection between the elements"
                .to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(CoreError::DocumentNotFound("x".into()).status_code(), 404);
        assert_eq!(CoreError::StatusError("x".into()).status_code(), 409);
        assert_eq!(CoreError::Timeout("x".into()).status_code(), 408);
        assert_eq!(
            CoreError::SizeExceeded {
                description: "Response size exceeded".into(),
                size: 10,
                max_size: 5
            }
            .status_code(),
            510
        );
    }

    #[test]
    fn store_errors_keep_their_class() {
        use topograph_store::StoreError;
        let err: CoreError = StoreError::NotFound("gone".into()).into();
        assert_eq!(err.status_code(), 404);
        let err: CoreError = StoreError::Conflict("rev".into()).into();
        assert_eq!(err.status_code(), 409);
        let err: CoreError = StoreError::Timeout("killed".into()).into();
        assert_eq!(err.status_code(), 408);
    }
}
