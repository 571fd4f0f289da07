//! # Topograph graph store adapter
//!
//! Typed wrapper over the ArangoDB HTTP API: databases, vertex/edge
//! collections, named graphs, analyzers, inverted indexes, search-alias
//! views, bulk document operations with per-document outcomes, and AQL
//! cursors streamed batch by batch.
//!
//! The rest of the workspace speaks only against these handles; no other
//! crate builds store URLs or touches the wire format. Transient transport
//! failures are retried with the shared bounded policy; everything else maps
//! onto [`StoreError`] so callers can branch on not-found / conflict /
//! timeout without string matching.

pub mod client;
pub mod collection;
pub mod config;
pub mod cursor;
pub mod database;
pub mod error;

pub use client::GraphClient;
pub use collection::{BulkItem, BulkOptions, Collection};
pub use config::StoreConfig;
pub use cursor::Cursor;
pub use database::{Database, EdgeDefinition, QueryOptions};
pub use error::{StoreError, StoreResult};

/// What to do when a requested database/collection/graph does not exist (or,
/// for creation, already exists).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatePolicy {
    /// Create the missing object.
    Create,
    /// Surface [`StoreError::NotFound`] / the store's conflict error.
    RaiseError,
    /// Resolve to `None`.
    ReturnNone,
}
