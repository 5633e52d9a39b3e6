//! Blob keys.
//!
//! Page images are stored as `{chapter_id}-{page_index}` and cover images as
//! `coverArt-{manga_id}`, both directly under the storage root.

use crate::error::{ErrorKind, Result};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use tankobon_model::{ChapterId, MangaId};

const COVER_PREFIX: &str = "coverArt-";

/// Address of a single blob in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlobKey {
    /// One page image of a chapter (zero-based index).
    Page { chapter: ChapterId, index: u32 },
    /// The cover image of a manga.
    Cover(MangaId),
}
impl BlobKey {
    pub fn page(chapter: &ChapterId, index: u32) -> Self {
        Self::Page { chapter: chapter.clone(), index }
    }

    pub fn cover(manga: &MangaId) -> Self {
        Self::Cover(manga.clone())
    }

    /// Storage path for this key.
    ///
    /// Identifiers are opaque, so anything that would not survive as a single
    /// path component (separators, `..`, null bytes) is rejected instead of
    /// silently landing in a subdirectory. Chapter IDs starting with the
    /// cover prefix are rejected too, as their pages would read back as covers.
    pub fn path(&self) -> Result<PathBuf> {
        let id = match self {
            Self::Page { chapter, .. } => chapter.as_str(),
            Self::Cover(manga) => manga.as_str(),
        };
        if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\', '\0']) {
            exn::bail!(ErrorKind::InvalidKey(id.to_string()));
        }
        if matches!(self, Self::Page { .. }) && id.starts_with(COVER_PREFIX) {
            exn::bail!(ErrorKind::InvalidKey(id.to_string()));
        }
        Ok(PathBuf::from(self.to_string()))
    }

    /// Recognise a stored path as a blob key. Anything that isn't a
    /// top-level page or cover blob yields `None`.
    pub fn parse(path: &Path) -> Option<Self> {
        if path.components().count() != 1 {
            return None;
        }
        let name = path.to_str()?;
        if let Some(manga) = name.strip_prefix(COVER_PREFIX) {
            return (!manga.is_empty()).then(|| Self::Cover(MangaId::from(manga)));
        }
        // Chapter IDs are frequently UUIDs, so split on the *last* hyphen.
        let (chapter, index) = name.rsplit_once('-')?;
        if chapter.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let index = index.parse().ok()?;
        Some(Self::Page { chapter: ChapterId::from(chapter), index })
    }
}
impl Display for BlobKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Page { chapter, index } => write!(f, "{chapter}-{index}"),
            Self::Cover(manga) => write!(f, "{COVER_PREFIX}{manga}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        let chapter = ChapterId::from("1b6f5a1e-3c2d-4e5f-8a9b-0c1d2e3f4a5b");
        assert_eq!(
            BlobKey::page(&chapter, 7).path().unwrap(),
            Path::new("1b6f5a1e-3c2d-4e5f-8a9b-0c1d2e3f4a5b-7")
        );
        assert_eq!(BlobKey::cover(&MangaId::from("m42")).path().unwrap(), Path::new("coverArt-m42"));
    }

    #[test]
    fn test_parse_page_with_hyphenated_id() {
        let key = BlobKey::parse(Path::new("1b6f5a1e-3c2d-4e5f-8a9b-0c1d2e3f4a5b-12")).unwrap();
        assert_eq!(key, BlobKey::page(&ChapterId::from("1b6f5a1e-3c2d-4e5f-8a9b-0c1d2e3f4a5b"), 12));
    }

    #[test]
    fn test_parse_cover() {
        let key = BlobKey::parse(Path::new("coverArt-m-42")).unwrap();
        assert_eq!(key, BlobKey::cover(&MangaId::from("m-42")));
    }

    #[test]
    fn test_parse_rejects_foreign_files() {
        assert!(BlobKey::parse(Path::new("README.md")).is_none());
        assert!(BlobKey::parse(Path::new("chapter-")).is_none());
        assert!(BlobKey::parse(Path::new("-3")).is_none());
        assert!(BlobKey::parse(Path::new("nested/c1-0")).is_none());
        assert!(BlobKey::parse(Path::new("coverArt-")).is_none());
        assert!(BlobKey::parse(Path::new("c1-+3")).is_none());
    }

    #[test]
    fn test_unsafe_ids_are_rejected() {
        assert!(BlobKey::page(&ChapterId::from("../etc"), 0).path().is_err());
        assert!(BlobKey::page(&ChapterId::from("a/b"), 0).path().is_err());
        assert!(BlobKey::cover(&MangaId::from("")).path().is_err());
        assert!(BlobKey::cover(&MangaId::from("..")).path().is_err());
    }

    #[test]
    fn test_page_ids_cannot_pose_as_covers() {
        let err = BlobKey::page(&ChapterId::from("coverArt-m1"), 0).path().unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidKey(id) if id == "coverArt-m1"));
        // Only the exact prefix is reserved.
        assert!(BlobKey::page(&ChapterId::from("coverart-m1"), 0).path().is_ok());
        assert!(BlobKey::cover(&MangaId::from("coverArt-m1")).path().is_ok());
    }
}
