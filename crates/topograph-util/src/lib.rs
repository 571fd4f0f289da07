//! Shared runtime utilities for Topograph.
//!
//! Two small concerns live here so the transport crates (store, inventory,
//! updater) do not depend on each other:
//!
//! - [`retry`]: the single bounded-retry policy every blocking edge of the
//!   service uses (store queries, inventory RPCs, consumer polls).
//! - [`env`]: typed environment-variable helpers with defaults.

pub mod env;
pub mod retry;

pub use retry::{with_retry, Retryable, RetryPolicy};
