//! Local artifact storage.
//!
//! This crate provides:
//! - Job-scoped directories for source, intermediate and clip files
//! - Atomic JSON writes for intermediate results
//! - Cross-device safe moves of uploaded files
//! - Job artifact deletion

pub mod error;
pub mod fs_utils;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use fs_utils::{move_file, write_atomic};
pub use store::{ArtifactStore, JobPaths};
