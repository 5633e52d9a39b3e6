//! Fixtures shared by the coordinator tests.

use crate::{Coordinator, DownloadState, NetworkPolicy, Options, RetryPolicy};
use futures::{Stream, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tankobon_cache::{Database, Repository};
use tankobon_model::ChapterMetadata;
use tankobon_source::MockSource;
use tankobon_storage::BlobKey;
use tankobon_storage::backend::{MockBackend, StorageBackend};

pub(crate) struct Harness {
    pub coordinator: Coordinator,
    pub backend: Arc<MockBackend>,
    pub source: Arc<MockSource>,
    pub db: Database,
}
impl Harness {
    pub async fn new(source: MockSource) -> Self {
        Self::with(source, MockBackend::default(), options()).await
    }

    pub async fn with(source: MockSource, backend: MockBackend, options: Options) -> Self {
        let db = Database::connect_in_memory().await.unwrap();
        let backend = Arc::new(backend);
        let source = Arc::new(source);
        let coordinator = Coordinator::new(backend.clone(), Repository::from(&db), source.clone(), options);
        Self { coordinator, backend, source, db }
    }

    /// Another coordinator on the same stores, as a second process would be.
    pub fn sibling(&self) -> Coordinator {
        Coordinator::new(self.backend.clone(), Repository::from(&self.db), self.source.clone(), options())
    }

    pub fn repo(&self) -> Repository {
        Repository::from(&self.db)
    }

    /// Every stored blob path, sorted.
    pub async fn blobs(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.backend.list(None).await.unwrap().into_iter().map(|info| info.path).collect();
        paths.sort();
        paths
    }

    /// Stored page blobs, ignoring covers.
    pub async fn page_blobs(&self) -> usize {
        self.blobs().await.iter().filter(|path| matches!(BlobKey::parse(path), Some(BlobKey::Page { .. }))).count()
    }
}

pub(crate) fn options() -> Options {
    Options {
        retry: RetryPolicy { max_attempts: 3, backoff: Duration::from_millis(1) },
        network: NetworkPolicy::Online,
        fetch_cover_art: true,
    }
}

/// Page images of a chapter: `"{chapter}:{index}"`.
pub(crate) fn pages(chapter: &str, count: usize) -> Vec<Vec<u8>> {
    (0..count).map(|index| format!("{chapter}:{index}").into_bytes()).collect()
}

/// A source serving `chapters` (ID, manga, page count) plus a cover per manga.
pub(crate) fn source(chapters: &[(&str, &str, usize)]) -> MockSource {
    let mut source = MockSource::default();
    for (chapter, manga, count) in chapters {
        let metadata = ChapterMetadata::new(*chapter, *manga, "en").with_chapter("1");
        source = source.with_chapter(metadata, pages(chapter, *count)).with_cover(*manga, b"cover".to_vec());
    }
    source
}

pub(crate) async fn collect(states: impl Stream<Item = DownloadState>) -> Vec<DownloadState> {
    states.collect().await
}

/// `fetched` never goes down, never exceeds `total`, and nothing follows a
/// terminal state.
pub(crate) fn assert_monotonic(states: &[DownloadState]) {
    let mut last = 0;
    for (position, state) in states.iter().enumerate() {
        if let DownloadState::Downloading { fetched, total } = state {
            assert!(*fetched >= last, "progress went backwards: {states:?}");
            assert!(fetched <= total, "fetched more than total: {states:?}");
            last = *fetched;
        }
        if state.is_terminal() {
            assert_eq!(position, states.len() - 1, "states after a terminal one: {states:?}");
        }
    }
}
