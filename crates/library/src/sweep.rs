//! Orphan sweep.
//!
//! A crash can leave the blob store and the metadata store disagreeing: pages
//! of a download that never committed, covers of a manga that is gone, or (if
//! blobs were removed by hand) a chapter record whose pages are missing. A
//! sweep brings them back in line. Run it at startup, before any downloads.

use crate::Coordinator;
use crate::error::{ErrorKind, Result};
use async_stream::stream;
use exn::ResultExt;
use futures::Stream;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tankobon_cache::Deletion;
use tankobon_model::{ChapterId, MangaId};
use tankobon_storage::BlobKey;

/// Progress events emitted by [`Coordinator::sweep`].
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started): exactly once.
/// 2. [`IncompleteChapter`](Self::IncompleteChapter): zero or more times.
/// 3. [`OrphanedPage`](Self::OrphanedPage) and [`OrphanedCover`](Self::OrphanedCover):
///    zero or more times, in listing order.
/// 4. [`Complete`](Self::Complete): exactly once.
///
/// Failing to list blobs or query the metadata store terminates the stream
/// early, in which case [`Complete`](Self::Complete) is never emitted. Failing
/// to delete a single blob is yielded as an `Err` item and sweeping goes on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepEvent {
    Started,
    /// A chapter record claimed pages that aren't stored. The record and
    /// whatever pages it did have were removed.
    IncompleteChapter { chapter: ChapterId, missing: u32 },
    /// A page blob without a committed chapter was deleted.
    OrphanedPage { path: PathBuf },
    /// A cover blob of an untracked manga was deleted.
    OrphanedCover { path: PathBuf },
    /// Sweep finished; `removed` counts every event above.
    Complete { removed: u64 },
}

impl Coordinator {
    /// Remove blobs and records that don't form a complete chapter.
    ///
    /// Chapters that are being downloaded while the sweep runs are left alone.
    pub fn sweep(&self) -> impl Stream<Item = Result<SweepEvent>> + '_ {
        // `rustfmt` does not format macros that use braces. Wrap in parentheses!
        stream!({
            yield Ok(SweepEvent::Started);
            let inner = &self.inner;

            // Listing first: anything written after this point belongs to a
            // download we'll see in the active set below.
            let blobs = match inner.backend.list(None).await.or_raise(|| ErrorKind::Storage) {
                Ok(blobs) => blobs,
                Err(e) => {
                    yield Err(e);
                    return;
                },
            };
            let active: HashSet<ChapterId> = self.active_downloads().into_iter().collect();
            let counts = match inner.repo.list_page_counts().await.or_raise(|| ErrorKind::Cache) {
                Ok(counts) => counts,
                Err(e) => {
                    yield Err(e);
                    return;
                },
            };
            let mut mangas: HashSet<MangaId> = match inner.repo.list_manga_ids().await.or_raise(|| ErrorKind::Cache) {
                Ok(mangas) => mangas.into_iter().collect(),
                Err(e) => {
                    yield Err(e);
                    return;
                },
            };
            let stored: HashSet<BlobKey> = blobs.iter().filter_map(|blob| BlobKey::parse(&blob.path)).collect();
            let mut removed = 0u64;

            let mut committed: HashMap<ChapterId, u32> = HashMap::new();
            for entry in counts {
                if active.contains(&entry.chapter_id) {
                    continue;
                }
                let missing = u32::try_from(
                    (0..entry.pages_count)
                        .filter(|index| !stored.contains(&BlobKey::page(&entry.chapter_id, *index)))
                        .count(),
                )
                .unwrap_or(entry.pages_count);
                if missing == 0 {
                    committed.insert(entry.chapter_id, entry.pages_count);
                    continue;
                }
                // Scoped so the manga lock is released before yielding.
                let deleted = {
                    let _guard = inner.index.lock(&entry.manga_id).await;
                    inner.index.remove(&entry.manga_id, &entry.chapter_id);
                    let deletion = inner.repo.delete_chapter(&entry.chapter_id).await.or_raise(|| ErrorKind::Cache);
                    if let Ok(Deletion::Deleted { manga_id, manga_deleted: true }) = &deletion {
                        mangas.remove(manga_id);
                        inner.forget_manga(manga_id).await;
                    }
                    if deletion.is_ok() {
                        inner.delete_pages(&entry.chapter_id, entry.pages_count).await;
                    }
                    deletion
                };
                if let Err(e) = deleted {
                    yield Err(e);
                    continue;
                }
                tracing::warn!(chapter = %entry.chapter_id, missing, "Removed chapter with missing pages");
                removed += 1;
                yield Ok(SweepEvent::IncompleteChapter { chapter: entry.chapter_id, missing });
            }

            for blob in blobs {
                let event = match BlobKey::parse(&blob.path) {
                    Some(BlobKey::Page { chapter, index }) => {
                        let orphaned = !active.contains(&chapter)
                            && committed.get(&chapter).is_none_or(|pages| index >= *pages);
                        if !orphaned {
                            continue;
                        }
                        SweepEvent::OrphanedPage { path: blob.path.clone() }
                    },
                    Some(BlobKey::Cover(manga)) if !mangas.contains(&manga) => {
                        SweepEvent::OrphanedCover { path: blob.path.clone() }
                    },
                    Some(BlobKey::Cover(_)) => continue,
                    None => {
                        tracing::debug!(path = %blob.path.display(), "Ignoring unrecognised blob");
                        continue;
                    },
                };
                match inner.backend.delete(&blob.path).await {
                    Ok(()) => {},
                    // Rolled back or deleted since the listing.
                    Err(e) if e.is_not_found() => continue,
                    Err(e) => {
                        yield Err(e).or_raise(|| ErrorKind::Storage);
                        continue;
                    },
                }
                removed += 1;
                yield Ok(event);
            }

            tracing::info!(removed, "Sweep complete");
            yield Ok(SweepEvent::Complete { removed });
        })
    }
}
