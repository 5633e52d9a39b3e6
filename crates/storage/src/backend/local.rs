//! Local filesystem storage backend.
//!
//! Blobs are stored as plain files in a configured directory and accessed
//! via `tokio::fs`. Writes go through a hidden sibling file which is synced
//! and then renamed over the destination, so a crash mid-write never leaves
//! a truncated page image behind under its real name.

use crate::backend::FileInfoStream;
use crate::error::ErrorKind;
use crate::{FileInfo, StorageBackend, error::Result, path::validate as validate_path};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use std::ffi::OsString;
use std::fs::{Metadata, create_dir_all as sync_create_dir};
use std::path::{Path, PathBuf};
use tokio::fs::{self, DirEntry};
use tokio::io::AsyncWriteExt;

/// Suffix of in-progress writes. Never listed, never valid blob names.
const PARTIAL_SUFFIX: &str = ".partial";

enum WalkEntry {
    File(FileInfo),
    Descend(PathBuf),
    Skip,
}

/// Local filesystem storage backend.
///
/// # Examples
///
/// ```no_run
/// use tankobon_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("pages", "/var/lib/tankobon/blobs")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalBackend {
    name: String,
    /// Root directory for all blobs
    root: PathBuf,
}
impl LocalBackend {
    /// Create a new local filesystem backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute, or exists but is not a
    /// directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Use non-async here; it'll only happen once at startup and it's
            // not worth the hassle of making the constructor async.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, &root))?;
        }
        Ok(Self { name: name.into(), root })
    }

    /// Get the absolute path for a relative storage path.
    fn absolute_path(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let validated = validate_path(path.as_ref())?;
        Ok(self.root.join(validated))
    }

    /// Convert an absolute path back to a relative storage path.
    fn relative_path(&self, absolute: impl AsRef<Path>) -> Result<PathBuf> {
        let absolute = absolute.as_ref();
        if !absolute.is_absolute() {
            exn::bail!(ErrorKind::BackendError(format!(
                "attempting to get relative path of non-absolute path `{:?}`",
                absolute
            )))
        }
        let relative = absolute.strip_prefix(&self.root).or_raise(|| {
            ErrorKind::BackendError(format!("path `{:?}` is not within root `{:?}`", absolute, self.root))
        })?;
        validate_path(relative)
    }

    /// Hidden sibling that a write is staged in before being renamed.
    fn partial_path(abs_path: &Path) -> PathBuf {
        let mut name = OsString::from(".");
        name.push(abs_path.file_name().unwrap_or_default());
        name.push(PARTIAL_SUFFIX);
        abs_path.with_file_name(name)
    }

    fn is_partial(path: &Path) -> bool {
        path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with('.') && n.ends_with(PARTIAL_SUFFIX))
    }

    fn metadata(path: &Path, metadata: Metadata) -> Result<FileInfo> {
        let modified = metadata.modified().map_err(ErrorKind::Io)?.into();
        Ok(FileInfo::new(PathBuf::from(path), metadata.len(), modified))
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }

    /// Flush directory entries (creations, renames, removals) to disk.
    #[cfg(unix)]
    async fn sync_dir(dir: &Path) -> Result<()> {
        let handle = fs::File::open(dir).await.map_err(|e| Self::map_io_error(e, dir))?;
        Ok(handle.sync_all().await.map_err(ErrorKind::Io)?)
    }

    #[cfg(not(unix))]
    async fn sync_dir(_dir: &Path) -> Result<()> {
        Ok(())
    }

    async fn process_entry(&self, entry: DirEntry, prefix: Option<&Path>) -> Result<WalkEntry> {
        let path = entry.path();
        let metadata = entry.metadata().await.map_err(|e| Self::map_io_error(e, &path))?;
        if Self::is_partial(&path) {
            return Ok(WalkEntry::Skip);
        }
        let relative = self.relative_path(&path)?;
        if let Some(pfx) = prefix
            && !relative.starts_with(pfx)
        {
            return Ok(WalkEntry::Skip);
        }
        if metadata.is_dir() {
            return Ok(WalkEntry::Descend(path));
        }
        if metadata.is_file() {
            return Ok(WalkEntry::File(Self::metadata(&relative, metadata)?));
        }
        // Note: silently drop what is most likely a broken symlink.
        Ok(WalkEntry::Skip)
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Result::Err(e) })),
        };

        // Walk from the parent directory of the prefix, so the prefix "a/c1"
        // matches "a/c1" and "a/c1/x" but not "a/c10" (component-based).
        let start_dir = validated_prefix
            .as_ref()
            .map(|prefix| self.root.join(prefix).parent().unwrap_or(&self.root).to_path_buf())
            .unwrap_or_else(|| self.root.clone());
        let mut stack = vec![start_dir];

        Box::pin(stream! {
            'dirs: while let Some(current) = stack.pop() {
                let mut entries = match fs::read_dir(&current).await {
                    Ok(entries) => entries,
                    // Listing a directory that doesn't exist is an empty
                    // listing, not an error.
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(err) => {
                        yield Err(exn::Exn::from(Self::map_io_error(err, &current)));
                        continue 'dirs;
                    }
                };

                'entries: loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break 'entries,
                        Err(e) => { yield Err(exn::Exn::from(Self::map_io_error(e, &current))); continue 'entries; },
                    };
                    match self.process_entry(entry, validated_prefix.as_deref()).await {
                        Ok(WalkEntry::File(f)) => yield Ok(f),
                        Ok(WalkEntry::Descend(d)) => stack.push(d),
                        Ok(WalkEntry::Skip) => {},
                        Err(e) => yield Err(e),
                    };
                }
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::try_exists(&abs_path).await.map_err(ErrorKind::Io)?)
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::read(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        let parent = abs_path.parent().unwrap_or(&self.root).to_path_buf();
        fs::create_dir_all(&parent).await.map_err(|e| Self::map_io_error(e, path))?;

        let partial = Self::partial_path(&abs_path);
        let mut file = fs::File::create(&partial).await.map_err(|e| Self::map_io_error(e, path))?;
        let staged = async {
            file.write_all(data).await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        if let Err(e) = staged {
            _ = fs::remove_file(&partial).await;
            exn::bail!(Self::map_io_error(e, path));
        }
        if let Err(e) = fs::rename(&partial, &abs_path).await {
            _ = fs::remove_file(&partial).await;
            exn::bail!(Self::map_io_error(e, path));
        }
        Self::sync_dir(&parent).await?;
        tracing::debug!(backend = %self.name, path = %path.display(), bytes = data.len(), "Wrote blob");
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        fs::remove_file(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        Self::sync_dir(abs_path.parent().unwrap_or(&self.root)).await?;
        tracing::debug!(backend = %self.name, path = %path.display(), "Deleted blob");
        Ok(())
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let abs_path = self.absolute_path(path)?;
        let metadata = fs::metadata(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        Self::metadata(path, metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_new_requires_absolute_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(LocalBackend::new("name", temp_dir.path()).is_ok());
        assert!(LocalBackend::new("name", "relative/path").is_err());
        assert!(LocalBackend::new("name", "./relative").is_err());
    }

    #[test]
    fn test_new_creates_missing_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("blobs/nested");
        LocalBackend::new("name", &root).unwrap();
        assert!(root.is_dir());
    }

    #[test]
    fn test_absolute_and_relative_paths() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("name", temp_dir.path()).unwrap();
        let expected = temp_dir.path().join("c1-0");
        assert_eq!(backend.absolute_path(Path::new("c1-0")).unwrap(), expected);
        assert_eq!(backend.relative_path(&expected).unwrap(), Path::new("c1-0"));
        assert!(backend.absolute_path(Path::new("../etc/passwd")).is_err());
        assert!(backend.relative_path(PathBuf::from("/other/c1-0")).is_err());
    }

    #[test]
    fn test_partial_path_is_hidden_sibling() {
        let partial = LocalBackend::partial_path(Path::new("/blobs/c1-0"));
        assert_eq!(partial, Path::new("/blobs/.c1-0.partial"));
        assert!(LocalBackend::is_partial(&partial));
        assert!(!LocalBackend::is_partial(Path::new("/blobs/c1-0")));
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("name", temp_dir.path()).unwrap();
        backend.write(Path::new("c1-0"), b"\x89PNG page").await.unwrap();
        assert_eq!(backend.read(Path::new("c1-0")).await.unwrap(), b"\x89PNG page");
        // Staging file is gone after the rename
        assert!(!temp_dir.path().join(".c1-0.partial").exists());
    }

    #[tokio::test]
    async fn test_write_replaces_existing_blob() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("name", temp_dir.path()).unwrap();
        backend.write(Path::new("c1-0"), b"first").await.unwrap();
        backend.write(Path::new("c1-0"), b"second").await.unwrap();
        assert_eq!(backend.read(Path::new("c1-0")).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_write_creates_directories() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("name", temp_dir.path()).unwrap();
        backend.write(Path::new("a/b/c1-0"), b"data").await.unwrap();
        assert!(backend.exists(Path::new("a/b/c1-0")).await.unwrap());
    }

    #[tokio::test]
    async fn test_exists() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("name", temp_dir.path()).unwrap();
        assert!(!backend.exists(Path::new("c1-0")).await.unwrap());
        backend.write(Path::new("c1-0"), b"data").await.unwrap();
        assert!(backend.exists(Path::new("c1-0")).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("name", temp_dir.path()).unwrap();
        backend.write(Path::new("c1-0"), b"data").await.unwrap();
        backend.delete(Path::new("c1-0")).await.unwrap();
        assert!(!backend.exists(Path::new("c1-0")).await.unwrap());
        let err = backend.delete(Path::new("c1-0")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stat() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("name", temp_dir.path()).unwrap();
        backend.write(Path::new("coverArt-m1"), b"12345").await.unwrap();
        let info = backend.stat(Path::new("coverArt-m1")).await.unwrap();
        assert_eq!(info.path, PathBuf::from("coverArt-m1"));
        assert_eq!(info.size, 5);
    }

    #[tokio::test]
    async fn test_list_skips_partial_writes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("name", temp_dir.path()).unwrap();
        backend.write(Path::new("c1-0"), b"data").await.unwrap();
        backend.write(Path::new("c1-1"), b"data").await.unwrap();
        // Left behind by a crash halfway through a write
        std::fs::write(temp_dir.path().join(".c1-2.partial"), b"trunc").unwrap();
        let files = backend.list(None).await.unwrap();
        assert_eq!(files.len(), 2);
    }

    #[tokio::test]
    async fn test_list_with_prefix() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("name", temp_dir.path()).unwrap();
        backend.write(Path::new("a/c1-0"), b"data").await.unwrap();
        backend.write(Path::new("a/c1-1"), b"data").await.unwrap();
        backend.write(Path::new("b/c2-0"), b"data").await.unwrap();
        assert_eq!(backend.list(None).await.unwrap().len(), 3);
        let files = backend.list(Some(Path::new("a/"))).await.unwrap();
        assert_eq!(files.len(), 2);
        assert!(backend.list(Some(Path::new("nonexistent/"))).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_path_security() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("name", temp_dir.path()).unwrap();
        assert!(backend.read(Path::new("../etc/passwd")).await.is_err());
        assert!(backend.write(Path::new("../escape"), b"data").await.is_err());
        assert!(backend.delete(Path::new("../../file")).await.is_err());
    }
}
