use crate::ids::{ChapterId, MangaId};
use std::ops::Deref;
use time::UtcDateTime;

/// Chapter attributes as reported by the source, before any page has been
/// downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterMetadata {
    pub id: ChapterId,
    pub manga_id: MangaId,
    /// Translated language tag, e.g. `"en"` or `"pt-br"`.
    pub translated_language: String,
    /// Chapters hosted elsewhere only carry a link to the external reader and
    /// have no pages of their own.
    pub external_url: Option<String>,
    /// Chapter number exactly as published. Kept as text because extras are
    /// numbered like `"77.6"` and oneshots have no number at all.
    pub chapter: Option<String>,
    pub volume: Option<String>,
    pub title: Option<String>,
    pub created_at: UtcDateTime,
    pub updated_at: UtcDateTime,
}
impl ChapterMetadata {
    pub fn new(id: impl Into<ChapterId>, manga_id: impl Into<MangaId>, translated_language: impl Into<String>) -> Self {
        let now = UtcDateTime::now();
        Self {
            id: id.into(),
            manga_id: manga_id.into(),
            translated_language: translated_language.into(),
            external_url: None,
            chapter: None,
            volume: None,
            title: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_chapter(mut self, chapter: impl Into<String>) -> Self {
        self.chapter = Some(chapter.into());
        self
    }

    pub fn with_external_url(mut self, url: impl Into<String>) -> Self {
        self.external_url = Some(url.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Numeric value of the chapter number, for sorting. `None` for oneshots
    /// and for numbers that aren't numbers.
    pub fn ordinal(&self) -> Option<f64> {
        self.chapter.as_deref().and_then(|c| c.trim().parse::<f64>().ok())
    }

    /// Only chapters hosted by the source itself have pages to download.
    pub fn is_downloadable(&self) -> bool {
        self.external_url.is_none()
    }

    /// Promote to a committed record once all pages are stored.
    pub fn into_record(self, pages_count: u32) -> ChapterRecord {
        ChapterRecord { metadata: self, pages_count, cached_at: UtcDateTime::now() }
    }
}

/// A chapter whose pages are all present in the blob store.
///
/// Only ever constructed by a completed download (or read back from the
/// metadata store), so holding one means `pages_count` page blobs exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterRecord {
    metadata: ChapterMetadata,
    pub pages_count: u32,
    pub cached_at: UtcDateTime,
}
impl ChapterRecord {
    /// Rebuild a record from persisted columns.
    pub fn from_parts(metadata: ChapterMetadata, pages_count: u32, cached_at: UtcDateTime) -> Self {
        Self { metadata, pages_count, cached_at }
    }

    pub fn metadata(&self) -> &ChapterMetadata {
        &self.metadata
    }

    pub fn into_metadata(self) -> ChapterMetadata {
        self.metadata
    }

    /// Page indices covered by this record, in reading order.
    pub fn page_indices(&self) -> std::ops::Range<u32> {
        0..self.pages_count
    }
}
impl Deref for ChapterRecord {
    type Target = ChapterMetadata;
    fn deref(&self) -> &ChapterMetadata {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some("12"), Some(12.0))]
    #[case(Some("77.6"), Some(77.6))]
    #[case(Some(" 3 "), Some(3.0))]
    #[case(Some("Extra"), None)]
    #[case(None, None)]
    fn test_ordinal(#[case] chapter: Option<&str>, #[case] expected: Option<f64>) {
        let mut meta = ChapterMetadata::new("c1", "m1", "en");
        meta.chapter = chapter.map(str::to_string);
        assert_eq!(meta.ordinal(), expected);
    }

    #[test]
    fn test_external_chapters_are_not_downloadable() {
        let meta = ChapterMetadata::new("c1", "m1", "en");
        assert!(meta.is_downloadable());
        let meta = meta.with_external_url("https://example.com/read/c1");
        assert!(!meta.is_downloadable());
    }

    #[test]
    fn test_record_derefs_to_metadata() {
        let record = ChapterMetadata::new("c1", "m1", "en").with_chapter("4").into_record(18);
        assert_eq!(record.id, ChapterId::from("c1"));
        assert_eq!(record.manga_id, MangaId::from("m1"));
        assert_eq!(record.pages_count, 18);
        assert_eq!(record.page_indices().count(), 18);
    }
}
