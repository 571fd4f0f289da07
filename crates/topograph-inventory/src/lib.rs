//! # Topograph inventory client
//!
//! Read-only gRPC view of the source inventory: the TMO schema tree, TPRM
//! definitions, and chunk-streamed MOs with their parameters. All methods
//! are idempotent and safe to retry; the shared bounded policy retries
//! `UNAVAILABLE`.
//!
//! Proto int64 ids map straight to `i64`; the inventory's other "absent"
//! encodings (`0` ids, empty strings) are normalized in [`convert`]. Values
//! of `multiple = true` parameters arrive as opaque hex blobs and are
//! decoded by the model codec against the owning TPRM.
//!
//! The change stream shares this crate's proto file: `ListMO`/`ListTMO`/
//! `ListTPRM`/`ListPRM` payload messages are re-exported for the updater.

pub mod api;
pub mod client;
pub mod config;
pub mod convert;
pub mod error;

#[allow(clippy::all, missing_docs)]
pub mod proto {
    tonic::include_proto!("inventory");
}

pub use api::{InventoryApi, MosQuery, TmoTree};
pub use client::InventoryClient;
pub use config::InventoryConfig;
pub use error::{InventoryError, InventoryResult};
