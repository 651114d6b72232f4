//! Durable byte storage behind the question bank and the score ledger
//!
//! Both persisted collections follow load-all / write-all semantics, so the
//! store only needs to hand back the last complete snapshot and replace it
//! with a new one. [`JsonFile`] does the replacement by writing a sibling
//! temporary file, syncing it to disk and renaming it over the target, so a
//! crash or power loss mid-write leaves the previous snapshot intact.

use std::{
    collections::VecDeque,
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};

use crate::error::PersistenceFailure;

/// Storage for one serialized snapshot
#[async_trait]
pub trait Store: Send + Sync {
    /// Reads the last written snapshot, `None` if nothing was written yet
    ///
    /// # Errors
    ///
    /// Returns any I/O error other than the snapshot not existing.
    async fn read(&self) -> io::Result<Option<Vec<u8>>>;

    /// Replaces the stored snapshot
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error. The previous snapshot must remain
    /// readable when this fails.
    async fn write(&self, bytes: &[u8]) -> io::Result<()>;
}

/// Loads and decodes a snapshot, falling back to the default value
///
/// A missing store yields the default silently; an unreadable or corrupt
/// one yields the default and is logged, never propagated.
pub async fn load_or_default<T: DeserializeOwned + Default>(store: &dyn Store, what: &str) -> T {
    match store.read().await {
        Ok(None) => {
            info!(what, "no stored snapshot, starting empty");
            T::default()
        }
        Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(e) => {
                error!(what, error = %e, "stored snapshot is corrupt, starting empty");
                T::default()
            }
        },
        Err(e) => {
            error!(what, error = %e, "failed to read stored snapshot, starting empty");
            T::default()
        }
    }
}

/// Encodes a snapshot as pretty JSON and writes it
///
/// # Errors
///
/// Returns [`PersistenceFailure`] if encoding or writing fails.
pub async fn save<T: Serialize + ?Sized>(
    store: &dyn Store,
    value: &T,
) -> Result<(), PersistenceFailure> {
    let bytes = serde_json::to_vec_pretty(value)?;
    store.write(&bytes).await?;
    Ok(())
}

/// A snapshot kept in a JSON file on disk
#[derive(Debug, Clone)]
pub struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    /// Creates a store backed by the file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the snapshot file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temporary_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl Store for JsonFile {
    async fn read(&self) -> io::Result<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write(&self, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temporary = self.temporary_path();
        let mut file = tokio::fs::File::create(&temporary).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temporary, &self.path).await?;
        debug!(path = %self.path.display(), len = bytes.len(), "snapshot written");
        Ok(())
    }
}

/// An in-memory store, shared between clones
///
/// Write failures can be queued up front to exercise degraded paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    snapshot: Option<Vec<u8>>,
    failures: VecDeque<io::ErrorKind>,
    writes: usize,
}

impl MemoryStore {
    /// Creates a store already holding `bytes`
    pub fn with_snapshot(bytes: impl Into<Vec<u8>>) -> Self {
        let store = Self::default();
        store.lock().snapshot = Some(bytes.into());
        store
    }

    /// Makes the next `count` writes fail with `kind`
    pub fn fail_next_writes(&self, count: usize, kind: io::ErrorKind) {
        self.lock().failures.extend(std::iter::repeat_n(kind, count));
    }

    /// The currently stored snapshot
    pub fn snapshot(&self) -> Option<Vec<u8>> {
        self.lock().snapshot.clone()
    }

    /// Number of successful writes so far
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn read(&self) -> io::Result<Option<Vec<u8>>> {
        Ok(self.lock().snapshot.clone())
    }

    async fn write(&self, bytes: &[u8]) -> io::Result<()> {
        let mut inner = self.lock();
        if let Some(kind) = inner.failures.pop_front() {
            return Err(io::Error::new(kind, "injected write failure"));
        }
        inner.snapshot = Some(bytes.to_vec());
        inner.writes += 1;
        Ok(())
    }
}
