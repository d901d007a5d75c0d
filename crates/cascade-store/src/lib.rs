//! SQLite persistence for Cascade.
//!
//! Provides `SqliteStore`, the reference implementation of the
//! `ConfigurationStore` and `ExecutionSink` collaborator traits: agents,
//! deployments, and flow versions written synchronously by the orchestrator,
//! execution records written by the recorder queue's consumer. All writes
//! are upserts keyed by entity id.

pub mod error;
pub mod store;

pub use error::{Result, StoreError};
pub use store::SqliteStore;
