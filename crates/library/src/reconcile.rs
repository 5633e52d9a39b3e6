//! Rebuilding the memory index from the metadata store.

use crate::Coordinator;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::collections::HashSet;
use tankobon_model::{ChapterId, MangaId};
use tracing::instrument;

impl Coordinator {
    /// Replace the index entry of a manga with what the metadata store says.
    ///
    /// Picks up chapters committed by another coordinator sharing the same
    /// database, and drops chapters deleted behind our back.
    #[instrument(skip_all, fields(manga = %manga))]
    pub async fn reconcile(&self, manga: &MangaId) -> Result<HashSet<ChapterId>> {
        let _guard = self.inner.index.lock(manga).await;
        let chapters = self.inner.repo.list_chapter_ids_for_manga(manga).await.or_raise(|| ErrorKind::Cache)?;
        self.inner.index.replace(manga, chapters.clone());
        tracing::debug!(chapters = chapters.len(), "Reconciled manga");
        Ok(chapters)
    }

    /// Rebuild the whole index, e.g. on a cold start.
    ///
    /// Returns the number of manga known to the metadata store.
    #[instrument(skip_all)]
    pub async fn reconcile_all(&self) -> Result<usize> {
        let mangas = self.inner.repo.list_manga_ids().await.or_raise(|| ErrorKind::Cache)?;
        for manga in &mangas {
            self.reconcile(manga).await?;
        }
        let known: HashSet<MangaId> = mangas.into_iter().collect();
        self.inner.index.retain(&known);
        tracing::info!(mangas = known.len(), "Rebuilt cache index");
        Ok(known.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, collect, source};
    use crate::{DownloadState, Options};
    use std::sync::Arc;
    use tankobon_config::Config;

    #[tokio::test]
    async fn test_reconcile_picks_up_sibling_changes() {
        let h = Harness::new(source(&[("c1", "m1", 2), ("c2", "m1", 2)])).await;
        let sibling = h.sibling();
        let manga = MangaId::from("m1");

        collect(sibling.start_download(&ChapterId::from("c1")).await).await;
        assert!(h.coordinator.cached_chapter_ids(&manga).is_empty());
        let chapters = h.coordinator.reconcile(&manga).await.unwrap();
        assert_eq!(chapters, HashSet::from([ChapterId::from("c1")]));
        assert!(h.coordinator.index().contains(&manga, &ChapterId::from("c1")));

        collect(h.coordinator.start_download(&ChapterId::from("c2")).await).await;
        sibling.delete_chapter(&ChapterId::from("c1")).await.unwrap();
        assert_eq!(h.coordinator.cached_chapter_ids(&manga).len(), 2);
        h.coordinator.reconcile(&manga).await.unwrap();
        assert_eq!(h.coordinator.cached_chapter_ids(&manga), HashSet::from([ChapterId::from("c2")]));
    }

    #[tokio::test]
    async fn test_reconcile_all_drops_vanished_manga() {
        let h = Harness::new(source(&[("c1", "m1", 1), ("c2", "m2", 1)])).await;
        collect(h.coordinator.start_download(&ChapterId::from("c1")).await).await;
        collect(h.coordinator.start_download(&ChapterId::from("c2")).await).await;

        let cold = h.sibling();
        assert!(cold.index().manga_ids().is_empty());
        assert_eq!(cold.reconcile_all().await.unwrap(), 2);
        assert!(cold.index().contains(&MangaId::from("m2"), &ChapterId::from("c2")));

        cold.delete_chapter(&ChapterId::from("c2")).await.unwrap();
        assert_eq!(h.coordinator.reconcile_all().await.unwrap(), 1);
        assert_eq!(h.coordinator.index().manga_ids(), vec![MangaId::from("m1")]);
    }

    #[tokio::test]
    async fn test_open_rebuilds_index_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.blob_root = dir.path().join("pages");
        config.storage.database = dir.path().join("db").join("cache.sqlite");
        config.downloads.retry_backoff_ms = 1;
        let chapter = ChapterId::from("c1");
        let manga = MangaId::from("m1");

        let coordinator = Coordinator::open(&config, Arc::new(source(&[("c1", "m1", 2)]))).await.unwrap();
        assert_eq!(Options::from(&config.downloads).retry.max_attempts, config.downloads.max_attempts);
        let states = collect(coordinator.start_download(&chapter).await).await;
        assert_eq!(states.last(), Some(&DownloadState::Cached));
        assert!(dir.path().join("pages").join("c1-1").is_file());
        coordinator.repository().get_chapter(&chapter).await.unwrap().unwrap();
        drop(coordinator);

        let reopened = Coordinator::open(&config, Arc::new(source(&[]))).await.unwrap();
        assert_eq!(reopened.cached_chapter_ids(&manga), HashSet::from([chapter.clone()]));
        assert_eq!(reopened.read_page(&chapter, 1).await.unwrap(), b"c1:1");
    }
}
