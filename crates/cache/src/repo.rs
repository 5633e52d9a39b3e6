//! Repository for chapter and manga records.
//!
//! They're tightly coupled: a chapter can't exist without its manga, and a
//! manga with no chapters and nothing read is garbage. Every operation that
//! can leave a manga empty tidies it up in the same transaction.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{ChapterRow, MangaRow};
use exn::ResultExt;
use sqlx::SqlitePool;
use std::collections::HashSet;
use tankobon_model::{ChapterId, ChapterRecord, MangaId, MangaRecord};
use time::UtcDateTime;

/// Outcome of deleting a chapter record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deletion {
    /// There was no record for that chapter.
    NotFound,
    /// The record was deleted. If it was the last chapter of a manga that
    /// nobody is reading, the manga record went with it.
    Deleted { manga_id: MangaId, manga_deleted: bool },
}

/// How many pages a committed chapter claims to have.
///
/// Enough to check a chapter against the blob store without loading every
/// attribute of every chapter.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ChapterPages {
    #[sqlx(try_from = "String")]
    pub chapter_id: ChapterId,
    #[sqlx(try_from = "String")]
    pub manga_id: MangaId,
    #[sqlx(try_from = "i64")]
    pub pages_count: u32,
}

/// Repository for managing chapter and manga records in the metadata store.
///
/// # Relationships
///
/// - Many chapters reference one manga
/// - Committing a chapter creates (or flags) its manga as saved for offline
/// - Deleting a manga cascades to delete all of its chapters
/// - Deleting the last chapter of a manga with no last-read pointer deletes the manga
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Commit a fully downloaded chapter.
    ///
    /// Upserts the parent manga (flagged as saved for offline) and the chapter
    /// record in a single transaction. Once this returns, the chapter counts as
    /// cached for every reader of the database.
    pub async fn commit_chapter(&self, record: &ChapterRecord) -> Result<()> {
        let row = ChapterRow::from(record);
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/upsert_manga_for_offline.sql"))
            .bind(&row.manga_id)
            .bind(row.cached_at)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/upsert_chapter.sql"))
            .bind(row.chapter_id)
            .bind(row.manga_id)
            .bind(row.pages_count)
            .bind(row.translated_language)
            .bind(row.external_url)
            .bind(row.chapter)
            .bind(row.volume)
            .bind(row.title)
            .bind(row.created_at)
            .bind(row.updated_at)
            .bind(row.cached_at)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    // =========================================================================
    // Get/Fetch
    // =========================================================================

    /// Get the record of a committed chapter.
    pub async fn get_chapter(&self, chapter: &ChapterId) -> Result<Option<ChapterRecord>> {
        let row: Option<ChapterRow> = sqlx::query_as(include_str!("../queries/get_chapter.sql"))
            .bind(chapter.as_str())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(ChapterRecord::try_from).transpose()
    }

    /// Check whether a chapter has been committed.
    pub async fn chapter_exists(&self, chapter: &ChapterId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(include_str!("../queries/chapter_exists.sql"))
            .bind(chapter.as_str())
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(exists)
    }

    /// Get a tracked manga.
    pub async fn get_manga(&self, manga: &MangaId) -> Result<Option<MangaRecord>> {
        let row: Option<MangaRow> = sqlx::query_as(include_str!("../queries/get_manga.sql"))
            .bind(manga.as_str())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(MangaRecord::try_from).transpose()
    }

    // =========================================================================
    // Listing
    // =========================================================================

    /// List every committed chapter of a manga, in reading order.
    ///
    /// Numbered chapters come first sorted by their numeric value, oneshots
    /// and other unnumbered chapters last.
    pub async fn list_chapters_for_manga(&self, manga: &MangaId) -> Result<Vec<ChapterRecord>> {
        let rows: Vec<ChapterRow> = sqlx::query_as(include_str!("../queries/list_chapters_for_manga.sql"))
            .bind(manga.as_str())
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(ChapterRecord::try_from).collect()
    }

    /// List the IDs of every committed chapter of a manga.
    ///
    /// This is more efficient than [`list_chapters_for_manga`](Self::list_chapters_for_manga)
    /// when you only need membership (e.g., for rebuilding the memory index).
    pub async fn list_chapter_ids_for_manga(&self, manga: &MangaId) -> Result<HashSet<ChapterId>> {
        let ids: Vec<String> = sqlx::query_scalar(include_str!("../queries/list_chapter_ids_for_manga.sql"))
            .bind(manga.as_str())
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(ids.into_iter().map(ChapterId::from).collect())
    }

    /// List the IDs of every committed chapter across all manga.
    pub async fn list_all_chapter_ids(&self) -> Result<Vec<ChapterId>> {
        let ids: Vec<String> = sqlx::query_scalar(include_str!("../queries/list_all_chapter_ids.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(ids.into_iter().map(ChapterId::from).collect())
    }

    /// List the page count of every committed chapter across all manga.
    pub async fn list_page_counts(&self) -> Result<Vec<ChapterPages>> {
        sqlx::query_as(include_str!("../queries/list_page_counts.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    /// List all tracked manga IDs, oldest first.
    pub async fn list_manga_ids(&self) -> Result<Vec<MangaId>> {
        let ids: Vec<String> = sqlx::query_scalar(include_str!("../queries/list_manga_ids.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(ids.into_iter().map(MangaId::from).collect())
    }

    // =========================================================================
    // Update
    // =========================================================================

    /// Point a manga's reading progress at a chapter, or clear it.
    ///
    /// Setting a pointer starts tracking the manga if it wasn't already.
    /// Clearing it may leave the manga with no reason to exist, in which case
    /// it is deleted; returns `true` if that happened.
    pub async fn set_last_read_chapter(&self, manga: &MangaId, chapter: Option<&ChapterId>) -> Result<bool> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let deleted = match chapter {
            Some(chapter) => {
                sqlx::query(include_str!("../queries/set_last_read_chapter.sql"))
                    .bind(manga.as_str())
                    .bind(chapter.as_str())
                    .bind(UtcDateTime::now().unix_timestamp())
                    .execute(&mut *tx)
                    .await
                    .or_raise(|| ErrorKind::Database)?;
                false
            },
            None => {
                let cleared = sqlx::query(include_str!("../queries/clear_last_read_chapter.sql"))
                    .bind(manga.as_str())
                    .execute(&mut *tx)
                    .await
                    .or_raise(|| ErrorKind::Database)?;
                cleared.rows_affected() > 0
                    && sqlx::query(include_str!("../queries/delete_manga_if_garbage.sql"))
                        .bind(manga.as_str())
                        .execute(&mut *tx)
                        .await
                        .or_raise(|| ErrorKind::Database)?
                        .rows_affected()
                        > 0
            },
        };
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(deleted)
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete a chapter record.
    ///
    /// If that was the manga's last chapter, the manga is no longer saved for
    /// offline reading; if on top of that nobody is reading it, the manga
    /// record is deleted as well. All in one transaction.
    pub async fn delete_chapter(&self, chapter: &ChapterId) -> Result<Deletion> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let manga_id: Option<String> = sqlx::query_scalar(include_str!("../queries/get_chapter_manga.sql"))
            .bind(chapter.as_str())
            .fetch_optional(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let Some(manga_id) = manga_id else {
            return Ok(Deletion::NotFound);
        };
        sqlx::query(include_str!("../queries/delete_chapter.sql"))
            .bind(chapter.as_str())
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/unflag_empty_manga.sql"))
            .bind(&manga_id)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let garbage = sqlx::query(include_str!("../queries/delete_manga_if_garbage.sql"))
            .bind(&manga_id)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(Deletion::Deleted {
            manga_id: manga_id.into(),
            manga_deleted: garbage.rows_affected() > 0,
        })
    }

    /// Delete a manga if it has no chapters and no last-read pointer.
    ///
    /// Returns `true` if the manga was deleted.
    pub async fn delete_manga_if_garbage(&self, manga: &MangaId) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/delete_manga_if_garbage.sql"))
            .bind(manga.as_str())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }
}
