//! Updater errors.

use thiserror::Error;

pub type UpdaterResult<T> = Result<T, UpdaterError>;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum UpdaterError {
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("malformed change message: {0}")]
    Malformed(String),

    #[error("payload decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// The projection this worker serves was deleted mid-turn; the worker
    /// unsubscribes and exits.
    #[error("projection {0} deleted")]
    ProjectionDeleted(String),

    #[error(transparent)]
    Core(#[from] topograph_core::CoreError),

    #[error(transparent)]
    Store(#[from] topograph_store::StoreError),

    #[error(transparent)]
    Inventory(#[from] topograph_inventory::InventoryError),
}

impl From<topograph_model::CodecError> for UpdaterError {
    fn from(err: topograph_model::CodecError) -> Self {
        UpdaterError::Core(topograph_core::CoreError::Codec(err))
    }
}
