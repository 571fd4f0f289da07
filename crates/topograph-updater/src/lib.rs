//! # Topograph change-stream updater
//!
//! One worker per projection consumes the inventory change topic and applies
//! the minimal vertex/edge mutations that preserve the builder's invariants:
//! groupings, breadcrumbs, virtual spread and path edges all stay intact
//! event by event.
//!
//! The [`supervisor`] owns the worker fleet: it polls the registry, spawns a
//! worker for each new projection, refreshes status gauges, and cancels
//! workers whose projection disappeared.

pub mod cache;
pub mod config;
pub mod consumer;
pub mod decode;
pub mod error;
pub mod handlers;
pub mod supervisor;
pub mod worker;

pub use error::{UpdaterError, UpdaterResult};

/// Cascade result of one per-class handler: entities that must be re-issued
/// as another operation within the same message-handling turn.
#[derive(Debug, Default)]
pub struct OperationResponse<T> {
    pub update: Vec<T>,
    pub create: Vec<T>,
    pub delete: Vec<T>,
}

impl<T> OperationResponse<T> {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.update.is_empty() && self.create.is_empty() && self.delete.is_empty()
    }
}
