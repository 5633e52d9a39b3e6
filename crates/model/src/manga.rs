use crate::ids::{ChapterId, MangaId};
use time::UtcDateTime;

/// A manga tracked by the reader.
///
/// A manga is kept either because chapters of it were saved for offline
/// reading, or merely because the user read something (`last_read_chapter`).
/// Those are independent: a manga can be tracked without ever downloading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MangaRecord {
    pub id: MangaId,
    pub last_read_chapter: Option<ChapterId>,
    pub saved_for_offline: bool,
    pub added_at: UtcDateTime,
}
impl MangaRecord {
    pub fn new(id: impl Into<MangaId>) -> Self {
        Self {
            id: id.into(),
            last_read_chapter: None,
            saved_for_offline: false,
            added_at: UtcDateTime::now(),
        }
    }

    /// With no cached chapters and nothing read, there is no reason to keep
    /// the record around.
    pub fn is_garbage(&self, cached_chapters: usize) -> bool {
        cached_chapters == 0 && self.last_read_chapter.is_none()
    }
}
