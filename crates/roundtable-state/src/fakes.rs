//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemorySnapshotStore` and `MemoryArtifactStore` that satisfy the
//! trait contracts without touching the filesystem, plus
//! `FailingArtifactStore` for exercising non-fatal persistence failures.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemorySnapshotStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SnapshotState {
    blobs: HashMap<String, Vec<u8>>,
    index: Vec<SnapshotRecord>,
}

/// In-memory snapshot store backed by a `HashMap<digest, bytes>` and an
/// ordered index.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    state: Mutex<SnapshotState>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the stored bytes for `id` (simulates on-disk corruption).
    pub fn corrupt(&self, id: &SnapshotId, bytes: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.blobs.insert(id.as_str().to_string(), bytes.to_vec());
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, label: &str, document: &[u8]) -> StorageResult<SnapshotRecord> {
        let record = SnapshotRecord {
            id: ContentDigest::from_bytes(document),
            label: label.to_string(),
            size_bytes: document.len() as u64,
            committed_at: Utc::now(),
        };
        let mut state = self.state.lock().unwrap();
        state
            .blobs
            .insert(record.id.as_str().to_string(), document.to_vec());
        state.index.push(record.clone());
        Ok(record)
    }

    async fn load(&self, id: &SnapshotId) -> StorageResult<Vec<u8>> {
        let state = self.state.lock().unwrap();
        let bytes = state
            .blobs
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                digest: id.as_str().to_string(),
            })?;
        verify_snapshot(id, &bytes)?;
        Ok(bytes)
    }

    async fn latest(&self) -> StorageResult<Option<SnapshotRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state.index.last().cloned())
    }

    async fn list(&self) -> StorageResult<Vec<SnapshotRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state.index.clone())
    }
}

// ---------------------------------------------------------------------------
// MemoryArtifactStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ArtifactState {
    contents: HashMap<String, String>,
    handles: Vec<ArtifactHandle>,
}

/// In-memory artifact store keyed by name.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    state: Mutex<ArtifactState>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an artifact synchronously (test setup helper).
    pub fn with_artifact(self, name: &str, content: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            upsert(&mut state, name, content);
        }
        self
    }
}

fn upsert(state: &mut ArtifactState, name: &str, content: &str) -> ArtifactHandle {
    let handle = ArtifactHandle {
        name: name.to_string(),
        digest: ContentDigest::from_bytes(content.as_bytes()),
        size_bytes: content.len() as u64,
        saved_at: Utc::now(),
    };
    state.contents.insert(name.to_string(), content.to_string());
    match state.handles.iter_mut().find(|h| h.name == name) {
        Some(existing) => *existing = handle.clone(),
        None => state.handles.push(handle.clone()),
    }
    handle
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn save(&self, name: &str, content: &str) -> StorageResult<ArtifactHandle> {
        validate_artifact_name(name)?;
        let mut state = self.state.lock().unwrap();
        Ok(upsert(&mut state, name, content))
    }

    async fn get(&self, name: &str) -> StorageResult<Option<String>> {
        let state = self.state.lock().unwrap();
        Ok(state.contents.get(name).cloned())
    }

    async fn list(&self) -> StorageResult<Vec<ArtifactHandle>> {
        let state = self.state.lock().unwrap();
        Ok(state.handles.clone())
    }
}

// ---------------------------------------------------------------------------
// FailingArtifactStore
// ---------------------------------------------------------------------------

/// Artifact store whose every operation fails with an I/O error.
#[derive(Debug, Default)]
pub struct FailingArtifactStore;

fn unavailable() -> StorageError {
    StorageError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        "artifact backend unavailable",
    ))
}

#[async_trait]
impl ArtifactStore for FailingArtifactStore {
    async fn save(&self, _name: &str, _content: &str) -> StorageResult<ArtifactHandle> {
        Err(unavailable())
    }

    async fn get(&self, _name: &str) -> StorageResult<Option<String>> {
        Err(unavailable())
    }

    async fn list(&self) -> StorageResult<Vec<ArtifactHandle>> {
        Err(unavailable())
    }
}
