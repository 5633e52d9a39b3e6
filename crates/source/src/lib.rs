//! The remote side of the chapter cache.
//!
//! Whatever serves chapter metadata, page image URLs and the images
//! themselves sits behind [`ChapterSource`]. The coordinator only ever talks
//! to the network through it, which keeps HTTP clients, rate limiting and
//! authentication out of the cache.

pub mod error;
#[cfg(any(test, feature = "mock"))]
mod mock;

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tankobon_model::{ChapterId, ChapterMetadata, MangaId};

#[cfg(any(test, feature = "mock"))]
pub use crate::mock::MockSource;

pub type SourceHandle = Arc<dyn ChapterSource + Send + Sync>;

/// Remote catalogue of chapters.
///
/// Every method may fail with [`Network`](error::ErrorKind::Network), which
/// is worth retrying, or [`NotFound`](error::ErrorKind::NotFound), which is
/// not. Retrying is the caller's business; implementations should make a
/// single attempt per call.
#[async_trait]
pub trait ChapterSource: Send + Sync {
    /// Attributes of a chapter, including whether it is hosted elsewhere.
    async fn fetch_chapter_metadata(&self, chapter: &ChapterId) -> Result<ChapterMetadata>;

    /// Image URLs of every page of a chapter, in reading order.
    async fn fetch_page_urls(&self, chapter: &ChapterId) -> Result<Vec<String>>;

    /// Raw bytes of a single page image.
    async fn fetch_page_bytes(&self, url: &str) -> Result<Vec<u8>>;

    /// Raw bytes of a manga's cover image.
    async fn fetch_cover_bytes(&self, manga: &MangaId) -> Result<Vec<u8>>;
}
