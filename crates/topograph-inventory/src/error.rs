//! Inventory client errors.

use thiserror::Error;
use topograph_util::retry::Retryable;

pub type InventoryResult<T> = Result<T, InventoryError>;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Channel could not be established.
    #[error("inventory transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// RPC-level failure.
    #[error("inventory rpc error: {0}")]
    Status(Box<tonic::Status>),

    /// The referenced entity does not exist in the inventory.
    #[error("inventory entity not found: {0}")]
    NotFound(String),

    /// A request precondition failed locally (empty id list, bad chunk size).
    #[error("invalid inventory request: {0}")]
    InvalidRequest(String),

    /// A parameter value could not be decoded against its TPRM.
    #[error(transparent)]
    Codec(#[from] topograph_model::CodecError),
}

impl From<tonic::Status> for InventoryError {
    fn from(status: tonic::Status) -> Self {
        match status.code() {
            tonic::Code::NotFound => InventoryError::NotFound(status.message().to_string()),
            _ => InventoryError::Status(Box::new(status)),
        }
    }
}

impl Retryable for InventoryError {
    fn is_transient(&self) -> bool {
        match self {
            InventoryError::Transport(_) => true,
            InventoryError::Status(status) => matches!(
                status.code(),
                tonic::Code::Unavailable
                    | tonic::Code::DeadlineExceeded
                    | tonic::Code::ResourceExhausted
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_is_transient_not_found_is_not() {
        let unavailable: InventoryError = tonic::Status::unavailable("down").into();
        assert!(unavailable.is_transient());
        let not_found: InventoryError = tonic::Status::not_found("no mo").into();
        assert!(matches!(not_found, InventoryError::NotFound(_)));
        assert!(!not_found.is_transient());
    }
}
