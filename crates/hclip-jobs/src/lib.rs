//! Durable job record store.
//!
//! This crate provides:
//! - Per-id atomic record updates
//! - One JSON document per job, written via temp file and rename
//! - Startup reconciliation of jobs left in flight

pub mod error;
pub mod metrics;
pub mod store;

pub use error::{JobStoreError, JobStoreResult};
pub use store::JobStore;
