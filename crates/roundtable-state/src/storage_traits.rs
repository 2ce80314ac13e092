//! Storage trait definitions for roundtable
//!
//! These traits define the persistence abstractions the coordination layer
//! depends on:
//! - `SnapshotStore`: whole-team snapshots committed once per round
//! - `ArtifactStore`: named documents externalized by roles
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::path::{Component, Path};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl From<ContentDigest> for String {
    fn from(d: ContentDigest) -> Self {
        d.0
    }
}

impl std::str::FromStr for ContentDigest {
    type Err = StorageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ContentDigest::try_from(s.trim().to_string())
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// SnapshotStore: whole-round team snapshots
// ---------------------------------------------------------------------------

/// Snapshots are addressed by the digest of their serialized document.
pub type SnapshotId = ContentDigest;

/// Index entry describing one committed snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: SnapshotId,
    /// Free-form label, e.g. `"round-3"`.
    pub label: String,
    pub size_bytes: u64,
    pub committed_at: DateTime<Utc>,
}

/// Durable store for serialized team snapshots.
///
/// Guarantees:
/// - `save(doc)` returns a record whose `id` is the SHA-256 digest of `doc`.
/// - `load(id)` returns the exact bytes previously saved, or
///   `StorageError::Corrupt` if they no longer hash to `id`.
/// - After a successful `save`, `latest()` points at that snapshot.
/// - `list()` returns records in commit order (oldest first).
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist a snapshot document and move the `latest` pointer to it.
    async fn save(&self, label: &str, document: &[u8]) -> StorageResult<SnapshotRecord>;

    /// Load the document for `id`. Returns `StorageError::NotFound` if absent.
    async fn load(&self, id: &SnapshotId) -> StorageResult<Vec<u8>>;

    /// Most recently committed snapshot, if any.
    async fn latest(&self) -> StorageResult<Option<SnapshotRecord>>;

    /// All committed snapshots, oldest first.
    async fn list(&self) -> StorageResult<Vec<SnapshotRecord>>;
}

/// Verify that `bytes` still hash to `id`.
pub(crate) fn verify_snapshot(id: &SnapshotId, bytes: &[u8]) -> StorageResult<()> {
    let actual = ContentDigest::from_bytes(bytes);
    if &actual != id {
        return Err(StorageError::Corrupt {
            digest: id.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ArtifactStore: named documents
// ---------------------------------------------------------------------------

/// Handle returned when an artifact is saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHandle {
    /// Relative name, e.g. `"src/train.py"` or `"requirements.md"`.
    pub name: String,
    pub digest: ContentDigest,
    pub size_bytes: u64,
    pub saved_at: DateTime<Utc>,
}

/// Store for documents produced by roles.
///
/// Semantics:
/// - `save` overwrites any previous content under the same name; the name
///   keeps its original position in `list()`.
/// - `get` returns `Ok(None)` for a name that was never saved.
/// - `list` returns one handle per name in first-save order.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn save(&self, name: &str, content: &str) -> StorageResult<ArtifactHandle>;

    async fn get(&self, name: &str) -> StorageResult<Option<String>>;

    async fn list(&self) -> StorageResult<Vec<ArtifactHandle>>;
}

/// Reject names that are empty, absolute, or contain `..` components.
pub fn validate_artifact_name(name: &str) -> StorageResult<()> {
    let invalid = || StorageError::InvalidName {
        name: name.to_string(),
    };
    if name.trim().is_empty() {
        return Err(invalid());
    }
    let path = Path::new(name);
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => return Err(invalid()),
        }
    }
    Ok(())
}
