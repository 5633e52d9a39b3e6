//! In-memory storage backend for testing.

use super::FileInfoStream;
use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::models::FileInfo;
use crate::path::validate as validate_path;
use async_stream::stream;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// In-memory storage backend for testing.
///
/// Blobs are stored in a `HashMap` behind a [`RwLock`], so all trait methods
/// can operate on `&self` without external synchronisation. Individual paths
/// can be rigged to fail on write or delete, to exercise rollback paths.
///
/// # Examples
///
/// ```
/// use tankobon_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([("c1-0", b"page")]);
/// assert!(backend.exists(Path::new("c1-0")).await?);
///
/// backend.write(Path::new("c1-1"), b"page").await?;
/// assert!(backend.exists(Path::new("c1-1")).await?);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    storage: RwLock<HashMap<PathBuf, (OffsetDateTime, Vec<u8>)>>,
    failing_writes: std::sync::Mutex<HashSet<PathBuf>>,
    failing_deletes: std::sync::Mutex<HashSet<PathBuf>>,
}

impl MockBackend {
    /// Create a mock backend pre-populated with blobs.
    ///
    /// Panics if any path fails validation (e.g. path traversal). If test
    /// setup is wrong, then test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = HashMap::new();
        let now = OffsetDateTime::now_utc();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                // The panic here is DELIBERATE. MockBackend is intended to be
                // used in tests; panics are expected. There is no error result.
                panic!("MockBackend::with_files: invalid path {}", path.display());
            };
            map.insert(validated, (now, data.into()));
        }
        Self {
            name: "mock".to_string(),
            storage: RwLock::new(map),
            failing_writes: Default::default(),
            failing_deletes: Default::default(),
        }
    }

    /// Change the name of the mock backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Make every write to `path` fail with an I/O error.
    pub fn fail_writes_to(&self, path: impl Into<PathBuf>) {
        self.failing_writes.lock().unwrap_or_else(|e| e.into_inner()).insert(path.into());
    }

    /// Make every delete of `path` fail with an I/O error (the blob stays).
    pub fn fail_deletes_of(&self, path: impl Into<PathBuf>) {
        self.failing_deletes.lock().unwrap_or_else(|e| e.into_inner()).insert(path.into());
    }

    /// Number of blobs currently stored.
    pub async fn len(&self) -> usize {
        self.storage.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.storage.read().await.is_empty()
    }

    fn rigged(set: &std::sync::Mutex<HashSet<PathBuf>>, path: &Path) -> bool {
        set.lock().unwrap_or_else(|e| e.into_inner()).contains(path)
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };

        Box::pin(stream! {
            // Snapshot matching entries under the read lock, then drop it
            // before yielding to avoid holding the lock across yield points.
            let entries: Vec<FileInfo> = {
                let guard = self.storage.read().await;
                guard
                    .iter()
                    .filter(|(path, _)| match &validated_prefix {
                        Some(pfx) => path.starts_with(pfx),
                        None => true,
                    })
                    .map(|(path, (inserted, data))| FileInfo::new(path.clone(), data.len() as u64, *inserted))
                    .collect()
            };
            for info in entries {
                yield Ok(info);
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        Ok(self.storage.read().await.contains_key(&path))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        let (_inserted, data) =
            self.storage.read().await.get(&path).cloned().ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))?;
        Ok(data)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = validate_path(path)?;
        if Self::rigged(&self.failing_writes, &path) {
            exn::bail!(ErrorKind::Io(std::io::Error::other(format!("rigged write failure: {}", path.display()))));
        }
        self.storage.write().await.insert(path, (OffsetDateTime::now_utc(), data.to_vec()));
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        if Self::rigged(&self.failing_deletes, &path) {
            exn::bail!(ErrorKind::Io(std::io::Error::other(format!("rigged delete failure: {}", path.display()))));
        }
        self.storage.write().await.remove(&path).map(|_| ()).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let path = validate_path(path)?;
        let guard = self.storage.read().await;
        let (inserted, data) = guard.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(FileInfo::new(path.clone(), data.len() as u64, *inserted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_and_read() {
        let backend = MockBackend::default();
        backend.write(Path::new("c1-0"), b"hello").await.unwrap();
        assert_eq!(backend.read(Path::new("c1-0")).await.unwrap(), b"hello");
        assert_eq!(backend.len().await, 1);
    }

    #[tokio::test]
    async fn test_read_not_found() {
        let backend = MockBackend::default();
        let err = backend.read(Path::new("c1-0")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete() {
        let backend = MockBackend::with_files([("c1-0", Vec::from(*b"data"))]);
        backend.delete(Path::new("c1-0")).await.unwrap();
        assert!(backend.is_empty().await);
        let err = backend.delete(Path::new("c1-0")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rigged_failures() {
        let backend = MockBackend::with_files([("c1-0", Vec::from(*b"data"))]);
        backend.fail_writes_to("c1-1");
        backend.fail_deletes_of("c1-0");
        let err = backend.write(Path::new("c1-1"), b"data").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(backend.delete(Path::new("c1-0")).await.is_err());
        assert!(backend.exists(Path::new("c1-0")).await.unwrap());
        assert!(!backend.exists(Path::new("c1-1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_stat_and_list() {
        let backend = MockBackend::with_files([("c1-0", Vec::from(*b"12345")), ("coverArt-m1", Vec::from(*b"1"))]);
        let info = backend.stat(Path::new("c1-0")).await.unwrap();
        assert_eq!(info.size, 5);
        assert_eq!(backend.list(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let backend = MockBackend::default();
        assert!(backend.read(Path::new("../etc/passwd")).await.is_err());
        assert!(backend.write(Path::new("../escape"), b"bad").await.is_err());
    }

    #[test]
    #[should_panic(expected = "invalid path")]
    fn test_with_files_panics_on_bad_path() {
        MockBackend::with_files([("../escape", Vec::from(*b"bad"))]);
    }
}
