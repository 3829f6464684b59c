//! Chapter loading state machine.
//!
//! [`ChapterLoader`] picks the page loader for a chapter, lists its pages and
//! moves the [`ReaderChapter`] through `Wait -> Loading -> Loaded | Error`.
//! Failures are stored on the chapter and returned as a value; nothing here
//! panics on a broken chapter.

use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::Semaphore;

use crate::chapter::{ChapterState, LoadClaim, ReaderChapter, ReaderPage, RequestedPage};
use crate::download::DownloadIndex;
use crate::error::{Error, Result};
use crate::loader::PageLoader;
use crate::loader::directory::DirectoryPageLoader;
use crate::loader::download::DownloadPageLoader;
use crate::loader::http::HttpPageLoader;
use crate::loader::rar::RarPageLoader;
use crate::loader::zip::ZipPageLoader;
use crate::page::Page;
use crate::reader::ReaderConfig;
use crate::sniffer::ImageSniffer;
use crate::source::Source;
use crate::types::{Chapter, LocalFormat, Manga};

/// Loads chapters of one manga.
pub struct ChapterLoader {
    manga: Manga,
    source: Source,
    downloads: Arc<dyn DownloadIndex>,
    sniffer: Arc<dyn ImageSniffer>,
    cache_dir: PathBuf,
    http_preload_pages: usize,
    permits: Arc<Semaphore>,
}

/// Returns a chapter still `Loading` to `Wait` if the load future is dropped
/// before it settles.
struct LoadingGuard<'a> {
    chapter: &'a ReaderChapter,
    epoch: u64,
    armed: bool,
}

impl<'a> LoadingGuard<'a> {
    fn new(chapter: &'a ReaderChapter, epoch: u64) -> Self {
        Self {
            chapter,
            epoch,
            armed: true,
        }
    }

    fn settle(mut self, state: ChapterState) -> ChapterState {
        self.armed = false;
        self.chapter.finish_loading(self.epoch, state)
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            info!("Load of chapter {} was cancelled", self.chapter.id());
            self.chapter.abandon_loading();
        }
    }
}

impl ChapterLoader {
    pub fn new(
        manga: Manga,
        source: Source,
        downloads: Arc<dyn DownloadIndex>,
        sniffer: Arc<dyn ImageSniffer>,
        config: &ReaderConfig,
    ) -> Self {
        Self {
            manga,
            source,
            downloads,
            sniffer,
            cache_dir: config.cache_dir.clone(),
            http_preload_pages: config.http_preload_pages,
            permits: Arc::new(Semaphore::new(config.max_concurrent_loads)),
        }
    }

    pub fn manga(&self) -> &Manga {
        &self.manga
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Loads a chapter and returns its final state, `Loaded` or `Error`.
    ///
    /// A loaded chapter is returned as is. When another task is already
    /// loading the chapter, this waits for that load instead of listing the
    /// pages a second time. A chapter released by every window while it was
    /// loading ends in `Wait` with its loader disposed.
    pub async fn load_chapter(&self, chapter: &Arc<ReaderChapter>) -> ChapterState {
        let epoch = loop {
            match chapter.begin_loading() {
                LoadClaim::Loaded(state) => return state,
                LoadClaim::Claimed(epoch) => break epoch,
                LoadClaim::InFlight(mut receiver) => {
                    debug!("Chapter {} is already loading, waiting", chapter.id());
                    let settled = receiver
                        .wait_for(|state| !matches!(state, ChapterState::Loading))
                        .await
                        .map(|state| state.clone());
                    match settled {
                        Ok(state @ (ChapterState::Loaded(_) | ChapterState::Error(_))) => {
                            return state;
                        }
                        // Cancelled elsewhere and back to `Wait`; try to claim it.
                        Ok(_) => continue,
                        Err(_) => return ChapterState::Error(Arc::new(Error::ResourceDisposed)),
                    }
                }
            }
        };

        let guard = LoadingGuard::new(chapter, epoch);
        let snapshot = chapter.chapter();
        debug!("Loading chapter {} ({})", snapshot.id, snapshot.name);

        let state = match self.fetch_pages(chapter, &snapshot, epoch).await {
            Ok(pages) => {
                let pages = ReaderPage::attach(pages, chapter);
                if !snapshot.read {
                    chapter.set_requested_page(RequestedPage::Index(snapshot.last_page_read));
                }
                info!("Chapter {} loaded with {} pages", snapshot.id, pages.len());
                ChapterState::Loaded(Arc::new(pages))
            }
            Err(e) => {
                warn!("Failed to load chapter {}: {}", snapshot.id, e);
                ChapterState::Error(Arc::new(e))
            }
        };

        guard.settle(state)
    }

    async fn fetch_pages(
        &self,
        chapter: &ReaderChapter,
        snapshot: &Chapter,
        epoch: u64,
    ) -> Result<Vec<Arc<Page>>> {
        let _permit = self.permits.acquire().await?;
        if chapter.released_since(epoch) {
            return Err(Error::ResourceDisposed);
        }

        let loader = self.page_loader_for(snapshot).await?;
        if let Some(previous) = chapter.replace_page_loader(Arc::clone(&loader)) {
            debug!(
                "Replacing {} loader of chapter {}",
                previous.kind(),
                snapshot.id
            );
            previous.dispose();
        }
        // A release that ran before the assignment could not dispose it.
        if chapter.released_since(epoch) {
            return Err(Error::ResourceDisposed);
        }

        let pages = loader.list_pages().await?;
        if loader.is_disposed() {
            return Err(Error::ResourceDisposed);
        }
        if pages.is_empty() {
            return Err(Error::EmptyPageSet);
        }
        Ok(pages)
    }

    /// Selects the page loader serving a chapter.
    ///
    /// Downloaded chapters win over the source. Remote sources are served over
    /// HTTP, local ones by the loader matching the detected format.
    pub async fn page_loader_for(&self, chapter: &Chapter) -> Result<Arc<dyn PageLoader>> {
        if self
            .downloads
            .is_chapter_fully_downloaded(chapter, &self.manga)
        {
            debug!("Chapter {} is downloaded", chapter.id);
            return Ok(Arc::new(DownloadPageLoader::new(
                chapter.clone(),
                self.manga.clone(),
                self.source.clone(),
                Arc::clone(&self.downloads),
            )));
        }

        match &self.source {
            Source::Remote(remote) => Ok(Arc::new(HttpPageLoader::new(
                chapter.clone(),
                Arc::clone(remote),
                &self.cache_dir,
                self.http_preload_pages,
            ))),
            Source::Local(resolver) => {
                let sniffer = Arc::clone(&self.sniffer);
                match resolver.detect_format(chapter)? {
                    LocalFormat::Directory(path) => {
                        Ok(Arc::new(DirectoryPageLoader::new(path, sniffer)))
                    }
                    LocalFormat::Zip(path) => {
                        Ok(Arc::new(ZipPageLoader::open(path, sniffer).await?))
                    }
                    LocalFormat::Rar(path) => {
                        Ok(Arc::new(RarPageLoader::open(path, sniffer).await?))
                    }
                    LocalFormat::Epub(path) => Err(Error::UnsupportedFormat(format!(
                        "epub chapters are not supported: {}",
                        path.display()
                    ))),
                }
            }
            Source::Stub(id) => {
                error!("No page loader available for source {}", id);
                Err(Error::UnsupportedSource(*id))
            }
        }
    }
}
