//! Chapter download coordinator.
//!
//! Owns every [`DownloadState`] transition. A download fetches the chapter's
//! metadata and page list, writes each page to the blob store, and only once
//! every page is stored commits the chapter record. Anything short of that
//! (an error, a cancellation) is rolled back so the chapter is either fully
//! cached or not at all.

use crate::error::{ErrorKind, Result};
use crate::index::MemoryIndex;
use crate::retry::RetryPolicy;
use crate::state::{DownloadState, FailureReason};
use async_stream::stream;
use exn::ResultExt;
use futures::Stream;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tankobon_cache::{Database, Deletion, Repository};
use tankobon_config::{Config, DownloadConfig, NetworkPolicy};
use tankobon_model::{ChapterId, ChapterMetadata, ChapterRecord, MangaId};
use tankobon_source::SourceHandle;
use tankobon_storage::backend::LocalBackend;
use tankobon_storage::{BackendHandle, BlobKey};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Knobs of a [`Coordinator`] that aren't collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub retry: RetryPolicy,
    pub network: NetworkPolicy,
    pub fetch_cover_art: bool,
}
impl Default for Options {
    fn default() -> Self {
        Self::from(&DownloadConfig::default())
    }
}
impl From<&DownloadConfig> for Options {
    fn from(config: &DownloadConfig) -> Self {
        Self {
            retry: RetryPolicy::from(config),
            network: config.network,
            fetch_cover_art: config.fetch_cover_art,
        }
    }
}

/// A running download, as seen by everyone but the task doing it.
struct Slot {
    token: CancellationToken,
    state: watch::Receiver<DownloadState>,
}

pub(crate) struct Inner {
    pub(crate) backend: BackendHandle,
    pub(crate) repo: Repository,
    pub(crate) source: SourceHandle,
    pub(crate) index: MemoryIndex,
    pub(crate) options: Options,
    // Parent of every download's token; cancelled on shutdown.
    root: CancellationToken,
    downloads: Mutex<HashMap<ChapterId, Slot>>,
}

/// What a download attempt has touched so far, for rollback.
///
/// The record is committed in a single transaction at the very end, so an
/// attempt that fails never owns a record; only its page blobs need undoing.
#[derive(Default)]
struct Attempt {
    manga: Option<MangaId>,
    // Pages `0..written` may exist because of this attempt.
    written: u32,
}

enum Outcome {
    Committed(ChapterRecord),
    AlreadyCached,
}

/// Downloads chapters into the cache and keeps track of what's cached.
///
/// Cheap to clone; clones share the same downloads, index and stores.
///
/// # Examples
///
/// ```no_run
/// use futures::StreamExt;
/// use tankobon_library::{Coordinator, DownloadState};
/// use tankobon_model::ChapterId;
///
/// # async fn example(coordinator: Coordinator) {
/// let states = coordinator.start_download(&ChapterId::from("a54c491c")).await;
/// futures::pin_mut!(states);
/// while let Some(state) = states.next().await {
///     if let DownloadState::Downloading { fetched, total } = state {
///         println!("{fetched}/{total}");
///     }
/// }
/// # }
/// ```
#[derive(Clone)]
pub struct Coordinator {
    pub(crate) inner: Arc<Inner>,
}

impl Coordinator {
    pub fn new(backend: BackendHandle, repo: Repository, source: SourceHandle, options: Options) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                repo,
                source,
                index: MemoryIndex::default(),
                options,
                root: CancellationToken::new(),
                downloads: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Open the stores named by `config` and rebuild the index from them.
    pub async fn open(config: &Config, source: SourceHandle) -> Result<Self> {
        let backend = LocalBackend::new("pages", &config.storage.blob_root).or_raise(|| ErrorKind::Storage)?;
        if let Some(parent) = config.storage.database.parent() {
            tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Cache)?;
        }
        let db = Database::connect(&config.storage.database).await.or_raise(|| ErrorKind::Cache)?;
        let coordinator = Self::new(
            Arc::new(backend),
            Repository::from(&db),
            source,
            Options::from(&config.downloads),
        );
        coordinator.reconcile_all().await?;
        Ok(coordinator)
    }

    /// Chapters of `manga` known to be cached, straight from the index.
    pub fn cached_chapter_ids(&self, manga: &MangaId) -> HashSet<ChapterId> {
        self.inner.index.cached_chapter_ids(manga)
    }

    pub fn index(&self) -> &MemoryIndex {
        &self.inner.index
    }

    pub fn repository(&self) -> &Repository {
        &self.inner.repo
    }

    /// Chapters with a download in flight.
    pub fn active_downloads(&self) -> Vec<ChapterId> {
        self.inner.slots().keys().cloned().collect()
    }

    // =========================================================================
    // Downloads
    // =========================================================================

    /// Download a chapter, streaming its states until a terminal one.
    ///
    /// Single-flight: while a download of the chapter is running, this
    /// attaches to it instead of starting another. A chapter that is already
    /// cached yields [`Cached`](DownloadState::Cached) without any network
    /// traffic.
    #[instrument(skip_all, fields(chapter = %chapter))]
    pub async fn start_download(&self, chapter: &ChapterId) -> impl Stream<Item = DownloadState> + Send + 'static {
        if let Some(state) = self.inner.subscribe(chapter) {
            return states(state);
        }
        match self.inner.repo.chapter_exists(chapter).await {
            Ok(true) => return states(settled(DownloadState::Cached)),
            Ok(false) => {},
            // The download re-checks and reports the failure properly.
            Err(err) => tracing::warn!(error = ?err, "Could not check chapter cache"),
        }
        if !self.inner.options.network.is_online() {
            tracing::debug!("Refusing to download while offline");
            return states(settled(DownloadState::Failed { reason: FailureReason::Offline }));
        }
        states(self.inner.spawn_download(chapter))
    }

    /// Cancel the download of a chapter and wait until it's rolled back.
    ///
    /// Does nothing if the chapter isn't being downloaded.
    #[instrument(skip_all, fields(chapter = %chapter))]
    pub async fn cancel_download(&self, chapter: &ChapterId) {
        let slot = self.inner.slots().get(chapter).map(|slot| (slot.token.clone(), slot.state.clone()));
        if let Some((token, state)) = slot {
            token.cancel();
            finished(state).await;
        }
    }

    /// Remove a chapter from the cache.
    ///
    /// Cancels any running download of it first. If this was the last chapter
    /// of a manga that isn't being read, the manga and its cover go too.
    #[instrument(skip_all, fields(chapter = %chapter))]
    pub async fn delete_chapter(&self, chapter: &ChapterId) -> Result<()> {
        self.cancel_download(chapter).await;
        let Some(record) = self.inner.repo.get_chapter(chapter).await.or_raise(|| ErrorKind::Cache)? else {
            tracing::debug!("Chapter not cached; nothing to delete");
            return Ok(());
        };
        let _guard = self.inner.index.lock(&record.manga_id).await;
        self.inner.index.remove(&record.manga_id, chapter);
        let deletion = self.inner.repo.delete_chapter(chapter).await.or_raise(|| ErrorKind::Cache)?;
        let mut failed = self.inner.delete_pages(chapter, record.pages_count).await;
        if let Deletion::Deleted { manga_id, manga_deleted: true } = deletion {
            failed |= !self.inner.forget_manga(&manga_id).await;
        }
        if failed {
            exn::bail!(ErrorKind::Storage);
        }
        tracing::info!(manga = %record.manga_id, pages = record.pages_count, "Deleted chapter");
        Ok(())
    }

    /// Cancel every running download and wait for their rollbacks.
    ///
    /// Downloads requested afterwards are cancelled as soon as they start.
    #[instrument(skip_all)]
    pub async fn shutdown(&self) {
        self.inner.root.cancel();
        let running: Vec<_> = self.inner.slots().values().map(|slot| slot.state.clone()).collect();
        tracing::info!(downloads = running.len(), "Shutting down");
        futures::future::join_all(running.into_iter().map(finished)).await;
    }

    // =========================================================================
    // Fire-and-observe
    // =========================================================================

    /// Current state of a chapter, then every change while a download runs.
    pub async fn observe(&self, chapter: &ChapterId) -> impl Stream<Item = DownloadState> + Send + 'static {
        if let Some(state) = self.inner.subscribe(chapter) {
            return states(state);
        }
        let current = match self.inner.repo.chapter_exists(chapter).await {
            Ok(true) => DownloadState::Cached,
            Ok(false) => DownloadState::NotCached,
            Err(err) => {
                tracing::warn!(chapter = %chapter, error = ?err, "Could not check chapter cache");
                DownloadState::NotCached
            },
        };
        states(settled(current))
    }

    /// Start downloading in the background; follow along with [`observe`](Self::observe).
    pub fn request_download(&self, chapter: ChapterId) {
        let this = self.clone();
        tokio::spawn(async move {
            // The download runs in its own task; nobody needs these states.
            drop(this.start_download(&chapter).await);
        });
    }

    pub fn request_cancel(&self, chapter: ChapterId) {
        let this = self.clone();
        tokio::spawn(async move { this.cancel_download(&chapter).await });
    }

    pub fn request_delete(&self, chapter: ChapterId) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(err) = this.delete_chapter(&chapter).await {
                tracing::warn!(chapter = %chapter, error = ?err, "Could not delete chapter");
            }
        });
    }
}

impl Inner {
    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<ChapterId, Slot>> {
        self.downloads.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn subscribe(&self, chapter: &ChapterId) -> Option<watch::Receiver<DownloadState>> {
        self.slots().get(chapter).map(|slot| slot.state.clone())
    }

    /// Attach to the running download of `chapter`, or start one.
    fn spawn_download(self: &Arc<Self>, chapter: &ChapterId) -> watch::Receiver<DownloadState> {
        let mut slots = self.slots();
        if let Some(slot) = slots.get(chapter) {
            return slot.state.clone();
        }
        let (tx, rx) = watch::channel(DownloadState::Queued);
        let token = self.root.child_token();
        slots.insert(chapter.clone(), Slot { token: token.clone(), state: rx.clone() });
        drop(slots);
        tokio::spawn(Arc::clone(self).run(chapter.clone(), tx, token));
        rx
    }

    /// Body of a download task. Always ends by publishing a terminal state
    /// and releasing the slot.
    async fn run(self: Arc<Self>, chapter: ChapterId, tx: watch::Sender<DownloadState>, token: CancellationToken) {
        let mut attempt = Attempt::default();
        let terminal = match self.download(&chapter, &tx, &token, &mut attempt).await {
            Ok(Outcome::Committed(record)) => {
                tracing::info!(chapter = %chapter, manga = %record.manga_id, pages = record.pages_count, "Chapter cached");
                self.fetch_cover_art(&record.manga_id, &token).await;
                DownloadState::Cached
            },
            Ok(Outcome::AlreadyCached) => DownloadState::Cached,
            Err(err) => {
                self.rollback(&chapter, &attempt).await;
                match (&*err, err.failure_reason()) {
                    (ErrorKind::NotDownloadable, _) => {
                        tracing::info!(chapter = %chapter, "Chapter has no pages to download");
                        DownloadState::NotDownloadable
                    },
                    (_, Some(reason)) => {
                        tracing::warn!(chapter = %chapter, error = ?err, "Download failed");
                        DownloadState::Failed { reason }
                    },
                    (_, None) => {
                        tracing::info!(chapter = %chapter, "Download cancelled");
                        DownloadState::NotCached
                    },
                }
            },
        };
        // Publishing and releasing the slot together means nobody can attach
        // to a finished download and wait for states that never come.
        let mut slots = self.slots();
        tx.send_replace(terminal);
        slots.remove(&chapter);
    }

    async fn download(
        &self,
        chapter: &ChapterId,
        tx: &watch::Sender<DownloadState>,
        token: &CancellationToken,
        attempt: &mut Attempt,
    ) -> Result<Outcome> {
        if token.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        if let Some(record) = self.repo.get_chapter(chapter).await.or_raise(|| ErrorKind::Cache)? {
            let _guard = self.index.lock(&record.manga_id).await;
            self.index.insert(&record.manga_id, chapter);
            return Ok(Outcome::AlreadyCached);
        }

        let retry = &self.options.retry;
        let metadata: ChapterMetadata =
            retry.run(token, "chapter metadata", || self.source.fetch_chapter_metadata(chapter)).await?;
        attempt.manga = Some(metadata.manga_id.clone());
        if !metadata.is_downloadable() {
            exn::bail!(ErrorKind::NotDownloadable);
        }
        let urls = retry.run(token, "page urls", || self.source.fetch_page_urls(chapter)).await?;
        let total = u32::try_from(urls.len()).or_raise(|| ErrorKind::NotDownloadable)?;
        if total == 0 {
            exn::bail!(ErrorKind::NotDownloadable);
        }
        tx.send_replace(DownloadState::Downloading { fetched: 0, total });

        for (index, url) in (0..total).zip(&urls) {
            if token.is_cancelled() {
                exn::bail!(ErrorKind::Cancelled);
            }
            let bytes = retry.run(token, "page", || self.source.fetch_page_bytes(url)).await?;
            let path = BlobKey::page(chapter, index).path().or_raise(|| ErrorKind::Storage)?;
            // A failed write may still leave the blob behind.
            attempt.written = index + 1;
            self.backend.write(&path, &bytes).await.or_raise(|| ErrorKind::Storage)?;
            tx.send_replace(DownloadState::Downloading { fetched: index + 1, total });
        }
        if token.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }

        let record = metadata.into_record(total);
        let _guard = self.index.lock(&record.manga_id).await;
        self.repo.commit_chapter(&record).await.or_raise(|| ErrorKind::Cache)?;
        self.index.insert(&record.manga_id, chapter);
        Ok(Outcome::Committed(record))
    }

    /// Undo the page writes of a failed attempt. Running it twice is harmless.
    ///
    /// If the chapter turns out to be committed (by another coordinator on the
    /// same stores), the pages belong to that record and stay. When that can't
    /// be told, they stay too and are left for [`Coordinator::sweep`].
    async fn rollback(&self, chapter: &ChapterId, attempt: &Attempt) {
        if attempt.written == 0 {
            return;
        }
        let _guard = match &attempt.manga {
            Some(manga) => Some(self.index.lock(manga).await),
            None => None,
        };
        match self.repo.chapter_exists(chapter).await {
            Ok(false) => {},
            Ok(true) => {
                tracing::debug!(chapter = %chapter, "Chapter committed elsewhere; keeping its pages");
                return;
            },
            Err(err) => {
                tracing::warn!(chapter = %chapter, error = ?err, "Rollback could not check chapter record");
                return;
            },
        }
        if self.delete_pages(chapter, attempt.written).await {
            tracing::warn!(chapter = %chapter, "Rollback left pages behind");
        }
    }

    /// Delete pages `0..total` of a chapter, tolerating missing ones.
    /// Returns `true` if any delete failed.
    pub(crate) async fn delete_pages(&self, chapter: &ChapterId, total: u32) -> bool {
        let mut failed = false;
        for index in 0..total {
            failed |= !self.delete_blob(&BlobKey::page(chapter, index)).await;
        }
        failed
    }

    /// Delete a single blob, tolerating a missing one. Returns `false` (and
    /// logs) if the delete failed.
    pub(crate) async fn delete_blob(&self, key: &BlobKey) -> bool {
        let path = match key.path() {
            Ok(path) => path,
            Err(err) => {
                tracing::warn!(blob = %key, error = ?err, "Invalid blob key");
                return false;
            },
        };
        match self.backend.delete(&path).await {
            Ok(()) => true,
            Err(err) if err.is_not_found() => true,
            Err(err) => {
                tracing::warn!(blob = %key, error = ?err, "Could not delete blob");
                false
            },
        }
    }

    /// Clean up after a manga record was deleted: drop its cover and index
    /// entry. Returns `false` if the cover couldn't be deleted.
    pub(crate) async fn forget_manga(&self, manga: &MangaId) -> bool {
        self.index.replace(manga, HashSet::new());
        tracing::debug!(manga = %manga, "Manga no longer tracked");
        self.delete_blob(&BlobKey::cover(manga)).await
    }

    /// Store the manga's cover if it isn't stored yet. Failures never affect
    /// the chapter.
    async fn fetch_cover_art(&self, manga: &MangaId, token: &CancellationToken) {
        if !self.options.fetch_cover_art {
            return;
        }
        if let Err(err) = self.store_cover_art(manga, token).await {
            tracing::warn!(manga = %manga, error = ?err, "Could not store cover art");
        }
    }

    async fn store_cover_art(&self, manga: &MangaId, token: &CancellationToken) -> Result<()> {
        let path = BlobKey::cover(manga).path().or_raise(|| ErrorKind::Storage)?;
        if self.backend.exists(&path).await.or_raise(|| ErrorKind::Storage)? {
            return Ok(());
        }
        let bytes = self.options.retry.run(token, "cover art", || self.source.fetch_cover_bytes(manga)).await?;
        self.backend.write(&path, &bytes).await.or_raise(|| ErrorKind::Storage)?;
        tracing::debug!(manga = %manga, bytes = bytes.len(), "Stored cover art");
        Ok(())
    }
}

/// A state stream that will never change.
fn settled(state: DownloadState) -> watch::Receiver<DownloadState> {
    watch::channel(state).1
}

/// Stream the current state, then every change, ending after a terminal one.
fn states(mut rx: watch::Receiver<DownloadState>) -> impl Stream<Item = DownloadState> + Send + 'static {
    stream! {
        loop {
            let state = rx.borrow_and_update().clone();
            let terminal = state.is_terminal();
            yield state;
            // A closed channel has already delivered its final state.
            if terminal || rx.changed().await.is_err() {
                break;
            }
        }
    }
}

/// Wait until the task owning the other end of `rx` is done.
async fn finished(mut rx: watch::Receiver<DownloadState>) {
    while rx.changed().await.is_ok() {}
}
