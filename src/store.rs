//! Snapshot persistence.
//!
//! The snapshot is the ordered list of circulars the user has already been
//! told about.  The engine only ever reads a copy and then hands back a full
//! replacement or an append; it never edits entries in place.
//!
//! Both mutations are all-or-nothing with respect to concurrent readers: a
//! reader sees the snapshot from before or after a mutation, never a mix.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::source::Circular;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot i/o failed: {0}")]
    Io(#[from] io::Error),

    #[error("snapshot file is corrupt: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot lock poisoned")]
    Poisoned,
}

/// Key-ordered local store holding the snapshot.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn read_all(&self) -> Result<Vec<Circular>, StoreError>;

    /// Discard the current snapshot and store `items` in its place.
    async fn replace_all(&self, items: &[Circular]) -> Result<(), StoreError>;

    /// Extend the current snapshot with `items`.
    async fn append_all(&self, items: &[Circular]) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Process-local store.  Not persistent.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RwLock<Vec<Circular>>,
}

impl MemoryStore {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: Vec<Circular>) -> Self {
        Self {
            items: RwLock::new(items),
        }
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn read_all(&self) -> Result<Vec<Circular>, StoreError> {
        let items = self.items.read().map_err(|_| StoreError::Poisoned)?;
        Ok(items.clone())
    }

    async fn replace_all(&self, items: &[Circular]) -> Result<(), StoreError> {
        let mut current = self.items.write().map_err(|_| StoreError::Poisoned)?;
        *current = items.to_vec();
        Ok(())
    }

    async fn append_all(&self, items: &[Circular]) -> Result<(), StoreError> {
        let mut current = self.items.write().map_err(|_| StoreError::Poisoned)?;
        current.extend_from_slice(items);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON file
// ---------------------------------------------------------------------------

/// On-disk layout of [`JsonFileStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFile {
    /// Time of the last successful commit; `None` before the first one.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub circulars: Vec<Circular>,
}

/// Snapshot persisted as a single JSON document.
///
/// Writes go to a sibling temp file that is renamed over the target, so the
/// file on disk is always either the old or the new snapshot.  A missing file
/// reads as an empty snapshot.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the whole document, including its metadata.
    pub async fn load(&self) -> Result<SnapshotFile, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(SnapshotFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, circulars: Vec<Circular>) -> Result<(), StoreError> {
        let doc = SnapshotFile {
            updated_at: Some(Utc::now()),
            circulars,
        };
        let bytes = serde_json::to_vec_pretty(&doc)?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        tokio::fs::create_dir_all(dir).await?;

        // Data must be on disk before the rename makes it visible, and the
        // rename itself must be on disk before the commit counts.
        let tmp = self.path.with_extension("json.tmp");
        write_and_sync(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        sync_dir(dir).await?;

        debug!(path = %self.path.display(), count = doc.circulars.len(), "snapshot written");
        Ok(())
    }
}

async fn write_and_sync(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> io::Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await
}

// Directories cannot be opened as files on other platforms.
#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn read_all(&self) -> Result<Vec<Circular>, StoreError> {
        Ok(self.load().await?.circulars)
    }

    async fn replace_all(&self, items: &[Circular]) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.write(items.to_vec()).await
    }

    async fn append_all(&self, items: &[Circular]) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut circulars = self.load().await?.circulars;
        circulars.extend_from_slice(items);
        self.write(circulars).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn c(id: u64, name: &str) -> Circular {
        Circular::new(id, name, format!("https://example.com/{id}"))
    }

    #[tokio::test]
    async fn memory_store_replace_and_append() {
        let store = MemoryStore::new();
        assert!(store.read_all().await.unwrap().is_empty());

        store.append_all(&[c(1, "A")]).await.unwrap();
        store.append_all(&[c(2, "B")]).await.unwrap();
        assert_eq!(store.read_all().await.unwrap(), vec![c(1, "A"), c(2, "B")]);

        store.replace_all(&[c(3, "C")]).await.unwrap();
        assert_eq!(store.read_all().await.unwrap(), vec![c(3, "C")]);
    }

    #[tokio::test]
    async fn file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("snapshot.json"));

        assert!(store.read_all().await.unwrap().is_empty());
        assert_eq!(store.load().await.unwrap().updated_at, None);
    }

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("snapshot.json");

        let store = JsonFileStore::new(&path);
        store.append_all(&[c(1, "A"), c(2, "B")]).await.unwrap();
        store.append_all(&[c(3, "C")]).await.unwrap();

        let reopened = JsonFileStore::new(&path);
        let doc = reopened.load().await.unwrap();
        assert_eq!(doc.circulars, vec![c(1, "A"), c(2, "B"), c(3, "C")]);
        assert!(doc.updated_at.is_some());
    }

    #[tokio::test]
    async fn file_store_replace_discards_previous_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("snapshot.json"));

        store.append_all(&[c(1, "A"), c(2, "B"), c(3, "C")]).await.unwrap();
        store.replace_all(&[c(1, "A")]).await.unwrap();

        assert_eq!(store.read_all().await.unwrap(), vec![c(1, "A")]);
    }

    #[tokio::test]
    async fn file_store_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("snapshot.json"));

        store.replace_all(&[c(1, "A")]).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["snapshot.json".to_string()]);
    }

    #[tokio::test]
    async fn file_store_overwrites_interrupted_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let store = JsonFileStore::new(&path);
        store.append_all(&[c(1, "A")]).await.unwrap();
        std::fs::write(dir.path().join("snapshot.json.tmp"), b"{ \"circulars\": [").unwrap();

        store.append_all(&[c(2, "B")]).await.unwrap();

        assert_eq!(store.read_all().await.unwrap(), vec![c(1, "A"), c(2, "B")]);
        assert!(!dir.path().join("snapshot.json.tmp").exists());
    }

    #[tokio::test]
    async fn write_and_sync_replaces_whole_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"a much longer previous content").unwrap();

        write_and_sync(&path, b"short").await.unwrap();
        sync_dir(dir.path()).await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"short");
    }

    #[tokio::test]
    async fn file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let err = JsonFileStore::new(&path).read_all().await.unwrap_err();

        assert!(matches!(err, StoreError::Json(_)));
    }
}
