//! In-memory index of cached chapters.
//!
//! A session-scoped accelerator for "which chapters of this manga are
//! cached?", answered synchronously for the UI. Never the source of truth:
//! it can be rebuilt from the metadata store at any time (see
//! [`Coordinator::reconcile`](crate::Coordinator::reconcile)).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use tankobon_model::{ChapterId, MangaId};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct MemoryIndex {
    entries: RwLock<HashMap<MangaId, HashSet<ChapterId>>>,
    // Held across reconcile's database read and replace, and across commit,
    // rollback and delete, so index writes for a manga can't interleave.
    locks: Mutex<HashMap<MangaId, Arc<AsyncMutex<()>>>>,
}

impl MemoryIndex {
    /// Chapters of `manga` believed to be cached.
    pub fn cached_chapter_ids(&self, manga: &MangaId) -> HashSet<ChapterId> {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).get(manga).cloned().unwrap_or_default()
    }

    pub fn contains(&self, manga: &MangaId, chapter: &ChapterId) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(manga)
            .is_some_and(|chapters| chapters.contains(chapter))
    }

    /// Manga that currently have an entry.
    pub fn manga_ids(&self) -> Vec<MangaId> {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).keys().cloned().collect()
    }

    pub(crate) fn insert(&self, manga: &MangaId, chapter: &ChapterId) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.entry(manga.clone()).or_default().insert(chapter.clone());
    }

    pub(crate) fn remove(&self, manga: &MangaId, chapter: &ChapterId) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if let Some(chapters) = entries.get_mut(manga) {
            chapters.remove(chapter);
            if chapters.is_empty() {
                entries.remove(manga);
            }
        }
    }

    /// Replace the entry of a manga wholesale.
    pub(crate) fn replace(&self, manga: &MangaId, chapters: HashSet<ChapterId>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        match chapters.is_empty() {
            true => entries.remove(manga),
            false => entries.insert(manga.clone(), chapters),
        };
    }

    /// Drop entries of every manga not in `keep`.
    pub(crate) fn retain(&self, keep: &HashSet<MangaId>) {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).retain(|manga, _| keep.contains(manga));
    }

    /// Serialize index updates for a manga.
    pub(crate) async fn lock(&self, manga: &MangaId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(manga.clone()).or_default())
        };
        lock.lock_owned().await
    }
}
