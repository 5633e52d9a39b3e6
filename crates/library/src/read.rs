//! Reading cached chapters back, for offline use.

use crate::Coordinator;
use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use tankobon_model::{ChapterId, MangaId};
use tankobon_storage::BlobKey;

impl Coordinator {
    /// Bytes of one page of a committed chapter.
    ///
    /// Pages of a chapter that is still downloading are off limits, even the
    /// ones already stored.
    pub async fn read_page(&self, chapter: &ChapterId, index: u32) -> Result<Vec<u8>> {
        let record = self
            .inner
            .repo
            .get_chapter(chapter)
            .await
            .or_raise(|| ErrorKind::Cache)?
            .ok_or_raise(|| ErrorKind::NotCached)?;
        if index >= record.pages_count {
            exn::bail!(ErrorKind::PageOutOfRange { index, pages: record.pages_count });
        }
        let path = BlobKey::page(chapter, index).path().or_raise(|| ErrorKind::Storage)?;
        self.inner.backend.read(&path).await.or_raise(|| ErrorKind::Storage)
    }

    /// Bytes of a manga's cover, if it was stored alongside its chapters.
    pub async fn read_cover(&self, manga: &MangaId) -> Result<Vec<u8>> {
        let path = BlobKey::cover(manga).path().or_raise(|| ErrorKind::Storage)?;
        match self.inner.backend.read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.is_not_found() => Err(err).or_raise(|| ErrorKind::NotCached),
            Err(err) => Err(err).or_raise(|| ErrorKind::Storage),
        }
    }

    /// Move a manga's reading position, or clear it with `None`.
    ///
    /// Clearing the position of a manga without cached chapters stops
    /// tracking it altogether, cover included.
    pub async fn set_last_read_chapter(&self, manga: &MangaId, chapter: Option<&ChapterId>) -> Result<()> {
        let _guard = self.inner.index.lock(manga).await;
        let deleted = self.inner.repo.set_last_read_chapter(manga, chapter).await.or_raise(|| ErrorKind::Cache)?;
        if deleted && !self.inner.forget_manga(manga).await {
            exn::bail!(ErrorKind::Storage);
        }
        Ok(())
    }
}
