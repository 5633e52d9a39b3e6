//! In-memory chapter source for testing.

use crate::ChapterSource;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tankobon_model::{ChapterId, ChapterMetadata, MangaId};
use tokio::sync::Notify;

/// A checkpoint in front of a single page fetch.
///
/// The fetch announces that it has [`reached`](Self::reached) the gate and
/// then waits until the test [`open`](Self::open)s it. Lets a test act at an
/// exact point in a download (cancel after page 3, start a second download
/// while the first is still running, ...).
#[derive(Debug, Default)]
pub struct Gate {
    reached: Notify,
    opened: Notify,
}
impl Gate {
    /// Wait until a fetch is parked at this gate.
    pub async fn reached(&self) {
        self.reached.notified().await;
    }

    /// Let the parked fetch (or the next one to arrive) through.
    pub fn open(&self) {
        self.opened.notify_one();
    }
}

#[derive(Debug, Default)]
struct Calls {
    metadata: AtomicUsize,
    page_urls: AtomicUsize,
    pages: AtomicUsize,
    covers: AtomicUsize,
}

/// In-memory chapter source for testing.
///
/// Chapters are registered up front together with their page images; page
/// URLs are derived from the chapter ID with [`page_url`](Self::page_url).
/// Individual URLs can be rigged to fail transiently or be gated, and every
/// call is counted so tests can assert on network traffic.
///
/// # Examples
///
/// ```
/// use tankobon_model::{ChapterId, ChapterMetadata};
/// use tankobon_source::{ChapterSource, MockSource};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let source = MockSource::default().with_chapter(ChapterMetadata::new("c1", "m1", "en"), [b"page 0".to_vec()]);
/// let urls = source.fetch_page_urls(&ChapterId::from("c1")).await?;
/// assert_eq!(source.fetch_page_bytes(&urls[0]).await?, b"page 0");
/// assert_eq!(source.page_fetches(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MockSource {
    chapters: HashMap<ChapterId, (ChapterMetadata, Vec<String>)>,
    pages: HashMap<String, Vec<u8>>,
    covers: HashMap<MangaId, Vec<u8>>,
    transient: Mutex<HashMap<String, u32>>,
    gates: Mutex<HashMap<String, Arc<Gate>>>,
    calls: Calls,
}

impl MockSource {
    /// URL under which page `index` of `chapter` is served.
    pub fn page_url(chapter: &str, index: usize) -> String {
        format!("mock://{chapter}/{index}")
    }

    /// Register a chapter and its page images, in reading order.
    pub fn with_chapter(mut self, metadata: ChapterMetadata, pages: impl IntoIterator<Item = Vec<u8>>) -> Self {
        let mut urls = Vec::new();
        for (index, page) in pages.into_iter().enumerate() {
            let url = Self::page_url(metadata.id.as_str(), index);
            self.pages.insert(url.clone(), page);
            urls.push(url);
        }
        self.chapters.insert(metadata.id.clone(), (metadata, urls));
        self
    }

    /// Register the cover image of a manga.
    pub fn with_cover(mut self, manga: impl Into<MangaId>, bytes: impl Into<Vec<u8>>) -> Self {
        self.covers.insert(manga.into(), bytes.into());
        self
    }

    /// Make the next `times` fetches of `key` fail with a network error.
    ///
    /// `key` is either a page URL or a chapter ID (which rigs both the
    /// metadata and the page URL lookups of that chapter).
    pub fn fail_transiently(&self, key: impl Into<String>, times: u32) {
        self.transient.lock().unwrap_or_else(|e| e.into_inner()).insert(key.into(), times);
    }

    /// Park the next fetch of `url` until the returned gate is opened.
    pub fn gate(&self, url: impl Into<String>) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.gates.lock().unwrap_or_else(|e| e.into_inner()).insert(url.into(), Arc::clone(&gate));
        gate
    }

    /// Number of chapter metadata lookups so far.
    pub fn metadata_fetches(&self) -> usize {
        self.calls.metadata.load(Ordering::SeqCst)
    }

    /// Number of page URL lookups so far.
    pub fn page_url_fetches(&self) -> usize {
        self.calls.page_urls.load(Ordering::SeqCst)
    }

    /// Number of page image fetches so far, failed attempts included.
    pub fn page_fetches(&self) -> usize {
        self.calls.pages.load(Ordering::SeqCst)
    }

    /// Number of cover image fetches so far.
    pub fn cover_fetches(&self) -> usize {
        self.calls.covers.load(Ordering::SeqCst)
    }

    /// Total number of calls made to this source.
    pub fn total_calls(&self) -> usize {
        self.metadata_fetches() + self.page_url_fetches() + self.page_fetches() + self.cover_fetches()
    }

    fn take_transient_failure(&self, key: &str) -> Result<()> {
        let mut transient = self.transient.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(remaining) = transient.get_mut(key)
            && *remaining > 0
        {
            *remaining -= 1;
            tracing::debug!(key, remaining = *remaining, "Failing fetch on purpose");
            exn::bail!(ErrorKind::Network(format!("rigged failure: {key}")));
        }
        Ok(())
    }

    fn chapter(&self, chapter: &ChapterId) -> Result<&(ChapterMetadata, Vec<String>)> {
        self.take_transient_failure(chapter.as_str())?;
        self.chapters
            .get(chapter)
            .ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(format!("chapter {chapter}"))))
    }
}

#[async_trait]
impl ChapterSource for MockSource {
    async fn fetch_chapter_metadata(&self, chapter: &ChapterId) -> Result<ChapterMetadata> {
        self.calls.metadata.fetch_add(1, Ordering::SeqCst);
        Ok(self.chapter(chapter)?.0.clone())
    }

    async fn fetch_page_urls(&self, chapter: &ChapterId) -> Result<Vec<String>> {
        self.calls.page_urls.fetch_add(1, Ordering::SeqCst);
        Ok(self.chapter(chapter)?.1.clone())
    }

    async fn fetch_page_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.calls.pages.fetch_add(1, Ordering::SeqCst);
        let gate = self.gates.lock().unwrap_or_else(|e| e.into_inner()).remove(url);
        if let Some(gate) = gate {
            gate.reached.notify_one();
            gate.opened.notified().await;
        }
        self.take_transient_failure(url)?;
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(format!("page {url}"))))
    }

    async fn fetch_cover_bytes(&self, manga: &MangaId) -> Result<Vec<u8>> {
        self.calls.covers.fetch_add(1, Ordering::SeqCst);
        self.covers
            .get(manga)
            .cloned()
            .ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(format!("cover of {manga}"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> MockSource {
        MockSource::default()
            .with_chapter(ChapterMetadata::new("c1", "m1", "en"), [b"p0".to_vec(), b"p1".to_vec()])
            .with_cover("m1", b"cover".to_vec())
    }

    #[tokio::test]
    async fn test_serves_registered_chapters() {
        let source = source();
        let chapter = ChapterId::from("c1");
        let meta = source.fetch_chapter_metadata(&chapter).await.unwrap();
        assert_eq!(meta.manga_id, MangaId::from("m1"));
        let urls = source.fetch_page_urls(&chapter).await.unwrap();
        assert_eq!(urls, vec![MockSource::page_url("c1", 0), MockSource::page_url("c1", 1)]);
        assert_eq!(source.fetch_page_bytes(&urls[1]).await.unwrap(), b"p1");
        assert_eq!(source.fetch_cover_bytes(&MangaId::from("m1")).await.unwrap(), b"cover");
        assert_eq!(source.total_calls(), 4);
    }

    #[tokio::test]
    async fn test_unknown_things_are_not_found() {
        let source = source();
        let err = source.fetch_page_urls(&ChapterId::from("c9")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        let err = source.fetch_cover_bytes(&MangaId::from("m9")).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_transient_failures_run_out() {
        let source = source();
        let url = MockSource::page_url("c1", 0);
        source.fail_transiently(&url, 2);
        assert!(source.fetch_page_bytes(&url).await.unwrap_err().is_retryable());
        assert!(source.fetch_page_bytes(&url).await.unwrap_err().is_retryable());
        assert_eq!(source.fetch_page_bytes(&url).await.unwrap(), b"p0");
        assert_eq!(source.page_fetches(), 3);
    }

    #[tokio::test]
    async fn test_gate_parks_fetch_until_opened() {
        let source = Arc::new(source());
        let url = MockSource::page_url("c1", 1);
        let gate = source.gate(&url);
        let task = tokio::spawn({
            let source = Arc::clone(&source);
            async move { source.fetch_page_bytes(&url).await.unwrap() }
        });
        gate.reached().await;
        assert!(!task.is_finished());
        gate.open();
        assert_eq!(task.await.unwrap(), b"p1");
    }
}
