use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tokio::task;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::*;

/// Write `data` to `path` atomically: temp file in the same directory, then rename.
fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
    let dir = path.parent().ok_or_else(|| {
        StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("path has no parent: {}", path.display()),
        ))
    })?;
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn read_index<T: serde::de::DeserializeOwned>(path: &Path) -> StorageResult<Vec<T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(StorageError::Io(e)),
    }
}

// ---------------------------------------------------------------------------
// FsSnapshotStore
// ---------------------------------------------------------------------------

/// Filesystem-backed snapshot store with git-style 2-char sharding.
///
/// Layout:
/// - `<root>/objects/<first 2 hex chars>/<remaining hex chars>`: snapshot documents
/// - `<root>/index.json`: ordered `SnapshotRecord` list
/// - `<root>/LATEST`: hex digest of the most recent snapshot
pub struct FsSnapshotStore {
    root: PathBuf,
    // Serializes index/pointer rewrites.
    write_lock: Mutex<()>,
}

impl FsSnapshotStore {
    /// Create a store rooted at `root`. Creates `root/objects/` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("objects"))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn object_path(&self, id: &SnapshotId) -> PathBuf {
        let hex = id.as_str();
        self.root.join("objects").join(&hex[..2]).join(&hex[2..])
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    fn latest_path(&self) -> PathBuf {
        self.root.join("LATEST")
    }
}

#[async_trait]
impl SnapshotStore for FsSnapshotStore {
    async fn save(&self, label: &str, document: &[u8]) -> StorageResult<SnapshotRecord> {
        let _guard = self.write_lock.lock().await;
        let record = SnapshotRecord {
            id: ContentDigest::from_bytes(document),
            label: label.to_string(),
            size_bytes: document.len() as u64,
            committed_at: Utc::now(),
        };

        let object = self.object_path(&record.id);
        let index_path = self.index_path();
        let latest_path = self.latest_path();
        let document = document.to_vec();
        let entry = record.clone();
        task::spawn_blocking(move || -> StorageResult<()> {
            if !object.exists() {
                write_atomic(&object, &document)?;
            }
            let mut index: Vec<SnapshotRecord> = read_index(&index_path)?;
            index.push(entry.clone());
            write_atomic(&index_path, &serde_json::to_vec_pretty(&index)?)?;
            // Pointer moves last: a crash before this line leaves LATEST on the previous commit.
            write_atomic(&latest_path, entry.id.as_str().as_bytes())
        })
        .await??;

        debug!(snapshot = %record.id.short(), label, "snapshot written");
        Ok(record)
    }

    async fn load(&self, id: &SnapshotId) -> StorageResult<Vec<u8>> {
        let path = self.object_path(id);
        let bytes = task::spawn_blocking(move || fs::read(path)).await?.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound {
                    digest: id.as_str().to_string(),
                }
            } else {
                StorageError::Io(e)
            }
        })?;
        verify_snapshot(id, &bytes)?;
        Ok(bytes)
    }

    async fn latest(&self) -> StorageResult<Option<SnapshotRecord>> {
        let latest_path = self.latest_path();
        let index_path = self.index_path();
        task::spawn_blocking(move || -> StorageResult<Option<SnapshotRecord>> {
            let pointer = match fs::read_to_string(latest_path) {
                Ok(s) => s.parse::<SnapshotId>()?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(StorageError::Io(e)),
            };
            let index: Vec<SnapshotRecord> = read_index(&index_path)?;
            Ok(index.into_iter().rev().find(|r| r.id == pointer))
        })
        .await?
    }

    async fn list(&self) -> StorageResult<Vec<SnapshotRecord>> {
        let index_path = self.index_path();
        task::spawn_blocking(move || read_index::<SnapshotRecord>(&index_path)).await?
    }
}

// ---------------------------------------------------------------------------
// FsArtifactStore
// ---------------------------------------------------------------------------

/// Filesystem-backed artifact store.
///
/// Layout:
/// - `<root>/files/<name>`: artifact contents at their relative name
/// - `<root>/manifest.json`: `ArtifactHandle` list in first-save order
pub struct FsArtifactStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FsArtifactStore {
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("files"))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.root.join("files").join(name)
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join("manifest.json")
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn save(&self, name: &str, content: &str) -> StorageResult<ArtifactHandle> {
        validate_artifact_name(name)?;
        let _guard = self.write_lock.lock().await;

        let handle = ArtifactHandle {
            name: name.to_string(),
            digest: ContentDigest::from_bytes(content.as_bytes()),
            size_bytes: content.len() as u64,
            saved_at: Utc::now(),
        };
        let file = self.file_path(name);
        let manifest_path = self.manifest_path();
        let content = content.to_string();
        let entry = handle.clone();
        task::spawn_blocking(move || -> StorageResult<()> {
            write_atomic(&file, content.as_bytes())?;
            let mut manifest: Vec<ArtifactHandle> = read_index(&manifest_path)?;
            match manifest.iter_mut().find(|h| h.name == entry.name) {
                Some(existing) => *existing = entry,
                None => manifest.push(entry),
            }
            write_atomic(&manifest_path, &serde_json::to_vec_pretty(&manifest)?)
        })
        .await??;
        Ok(handle)
    }

    async fn get(&self, name: &str) -> StorageResult<Option<String>> {
        validate_artifact_name(name)?;
        let path = self.file_path(name);
        match task::spawn_blocking(move || fs::read_to_string(path)).await? {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn list(&self) -> StorageResult<Vec<ArtifactHandle>> {
        let manifest_path = self.manifest_path();
        task::spawn_blocking(move || read_index::<ArtifactHandle>(&manifest_path)).await?
    }
}
