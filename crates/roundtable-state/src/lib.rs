//! Roundtable-State: persistence layer for roundtable
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: durable, content-addressed team snapshots and named artifacts.
//!
//! ## Key Components
//!
//! - `SnapshotStore`: whole-round snapshots addressed by SHA-256 digest, with a `latest` pointer
//! - `ArtifactStore`: named documents produced by roles (requirements, plans, code)
//! - `FsSnapshotStore` / `FsArtifactStore`: filesystem backends with atomic writes
//! - `fakes`: in-memory implementations for tests

mod error;
pub mod fakes;
mod fs;
pub mod storage_traits;

pub use error::StorageError;
pub use fs::{FsArtifactStore, FsSnapshotStore};
pub use storage_traits::{
    validate_artifact_name, ArtifactHandle, ArtifactStore, ContentDigest, SnapshotId,
    SnapshotRecord, SnapshotStore, StorageResult,
};
