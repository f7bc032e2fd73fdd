//! Object-store writers.
//!
//! Puts are at-least-once: writing the same bytes under the same key twice leaves
//! one object with those bytes.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid object key {0:?}")]
    InvalidKey(String),

    #[error("put of {key} failed: {message}")]
    PutFailed { key: String, message: String },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Destination for emitted files.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key`, replacing any existing object.
    async fn put(&self, key: &str, bytes: &[u8]) -> StoreResult<()>;

    /// Fetch an object, if present.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Human-readable location, for logs.
    fn location(&self) -> String;
}

fn validate_key(key: &str) -> StoreResult<()> {
    let path = Path::new(key);
    let ok = !key.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

/// Object store backed by a local directory: `<root>/<bucket>/<key>`.
///
/// Objects are staged as `.<name>.tmp` and renamed into place, so a reader never
/// sees a partial object.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    bucket_dir: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, bucket: &str) -> StoreResult<Self> {
        validate_key(bucket)?;
        Ok(Self {
            bucket_dir: root.into().join(bucket),
        })
    }

    pub fn bucket_dir(&self) -> &Path {
        &self.bucket_dir
    }

    fn object_path(&self, key: &str) -> StoreResult<PathBuf> {
        validate_key(key)?;
        Ok(self.bucket_dir.join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> StoreResult<()> {
        let final_path = self.object_path(key)?;
        let parent = final_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.bucket_dir.clone());
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|source| StoreError::Io {
                path: parent.clone(),
                source,
            })?;

        let file_name = final_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| StoreError::InvalidKey(key.to_string()))?;
        let temp_path = parent.join(format!(".{}.tmp", file_name));

        if let Err(source) = tokio::fs::write(&temp_path, bytes).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(StoreError::Io {
                path: temp_path,
                source,
            });
        }
        if let Err(source) = tokio::fs::rename(&temp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            warn!(path = %temp_path.display(), "Cleaned up orphaned temp object");
            return Err(StoreError::Io {
                path: final_path,
                source,
            });
        }

        info!(path = %final_path.display(), bytes = bytes.len(), "Object written");
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = self.object_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    fn location(&self) -> String {
        self.bucket_dir.display().to_string()
    }
}

/// In-process object store. Puts can be made to fail on demand.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    failures_remaining: AtomicUsize,
    passes_before_failure: AtomicUsize,
    put_calls: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` puts fail without storing anything.
    pub fn fail_next_puts(&self, count: usize) {
        self.passes_before_failure.store(0, Ordering::SeqCst);
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Let `successes` puts through, then fail one.
    pub fn fail_puts_after(&self, successes: usize) {
        self.passes_before_failure.store(successes, Ordering::SeqCst);
        self.failures_remaining.store(1, Ordering::SeqCst);
    }

    /// Number of put calls, failed ones included.
    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .ok()
            .and_then(|objects| objects.get(key).cloned())
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> StoreResult<()> {
        validate_key(key)?;
        self.put_calls.fetch_add(1, Ordering::SeqCst);

        let passed = self
            .passes_before_failure
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let injected = !passed
            && self
                .failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if injected {
            debug!(key, "Injected put failure");
            return Err(StoreError::PutFailed {
                key: key.to_string(),
                message: "injected failure".to_string(),
            });
        }

        let mut objects = self.objects.lock().map_err(|_| StoreError::PutFailed {
            key: key.to_string(),
            message: "object map lock poisoned".to_string(),
        })?;
        objects.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        validate_key(key)?;
        Ok(self.object(key))
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
