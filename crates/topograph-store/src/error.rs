//! Store error taxonomy.

use thiserror::Error;
use topograph_util::retry::Retryable;

/// ArangoDB error numbers the adapter branches on.
mod error_num {
    pub const CONFLICT: i64 = 1200;
    pub const DOCUMENT_NOT_FOUND: i64 = 1202;
    pub const COLLECTION_NOT_FOUND: i64 = 1203;
    pub const QUERY_KILLED: i64 = 1500;
    pub const DATABASE_NOT_FOUND: i64 = 1228;
    pub const DUPLICATE_NAME: i64 = 1207;
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the graph store adapter.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StoreError {
    /// Network failure or request timeout; transient.
    #[error("store transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Database, collection, view or document missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Revision mismatch or unique-constraint violation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Query aborted by the server (long graph traversals).
    #[error("query timed out: {0}")]
    Timeout(String),

    /// The object to create already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Any other error reported by the store.
    #[error("store error {error_num} ({code}): {message}")]
    Api {
        code: u16,
        error_num: i64,
        message: String,
    },

    /// Response body did not match the expected shape.
    #[error("store response decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl StoreError {
    /// Maps an API error body onto the taxonomy.
    #[must_use]
    pub fn from_api(code: u16, error_num: i64, message: String) -> Self {
        match (code, error_num) {
            (404, _)
            | (_, error_num::DOCUMENT_NOT_FOUND)
            | (_, error_num::COLLECTION_NOT_FOUND)
            | (_, error_num::DATABASE_NOT_FOUND) => StoreError::NotFound(message),
            (409, error_num::DUPLICATE_NAME) | (_, error_num::DUPLICATE_NAME) => {
                StoreError::AlreadyExists(message)
            }
            (409, _) | (412, _) | (_, error_num::CONFLICT) => StoreError::Conflict(message),
            (408, _) | (410, _) | (_, error_num::QUERY_KILLED) => StoreError::Timeout(message),
            _ => StoreError::Api {
                code,
                error_num,
                message,
            },
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, StoreError::Timeout(_))
    }
}

impl Retryable for StoreError {
    fn is_transient(&self) -> bool {
        match self {
            StoreError::Transport(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            StoreError::Api { code, .. } => matches!(code, 502 | 503 | 504),
            // Conflicts are not retried: the caller decides (spec: revision
            // mismatches surface as validation errors).
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_codes_map_to_taxonomy() {
        assert!(matches!(
            StoreError::from_api(404, 1202, "gone".into()),
            StoreError::NotFound(_)
        ));
        assert!(matches!(
            StoreError::from_api(409, 1200, "rev".into()),
            StoreError::Conflict(_)
        ));
        assert!(matches!(
            StoreError::from_api(409, 1207, "dup".into()),
            StoreError::AlreadyExists(_)
        ));
        assert!(matches!(
            StoreError::from_api(410, 1500, "killed".into()),
            StoreError::Timeout(_)
        ));
        assert!(matches!(
            StoreError::from_api(500, 4, "other".into()),
            StoreError::Api { .. }
        ));
    }

    #[test]
    fn conflicts_are_not_transient() {
        assert!(!StoreError::from_api(409, 1200, "rev".into()).is_transient());
        assert!(StoreError::from_api(503, 0, "unavailable".into()).is_transient());
    }
}
