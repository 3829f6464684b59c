//! Reading session orchestration.
//!
//! [`ReaderPresenter`] binds a manga, builds its ordered chapter list, drives
//! chapter loads and publishes the [`ViewerChapters`] window the viewer
//! renders. It is configured with a [`ReaderConfig`] built through
//! [`ReaderConfig::builder()`].

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{OnceCell, broadcast, watch};
use tokio::task::{AbortHandle, JoinSet};

use crate::chapter::{ChapterState, ReaderChapter, ReaderPage};
use crate::chapter_loader::ChapterLoader;
use crate::download::DownloadIndex;
use crate::error::{Error, Result};
use crate::loader::http::trim_cache;
use crate::repository::ChapterRepository;
use crate::sniffer::ImageSniffer;
use crate::source::SourceManager;
use crate::sync::lock;
use crate::types::{Chapter, Direction, Manga, ViewerKind};
use crate::viewer::ViewerChapters;

const EVENT_CAPACITY: usize = 16;

/// Settings of a reading session.
///
/// ```rust
/// # use yomikomi::prelude::*;
/// let config = ReaderConfig::builder()
///     .default_viewer(ViewerKind::RightToLeft)
///     .max_concurrent_loads(2usize)
///     .build()
///     .expect("Invalid configuration");
/// assert_eq!(config.http_preload_pages, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, derive_builder::Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
#[serde(default)]
pub struct ReaderConfig {
    /// Viewer used for mangas whose own setting is [`ViewerKind::Default`].
    #[builder(default = "ViewerKind::LeftToRight")]
    pub default_viewer: ViewerKind,

    /// Upper bound on chapters listing their pages at the same time.
    #[builder(default = "default_max_concurrent_loads()")]
    pub max_concurrent_loads: usize,

    /// Pages queued ahead of the displayed one by remote chapters.
    #[builder(default = "4")]
    pub http_preload_pages: usize,

    /// Folder where images of remote chapters are cached.
    #[builder(default = "default_cache_dir()")]
    pub cache_dir: PathBuf,

    /// Size in bytes the image cache is trimmed to when a session closes.
    #[builder(default = "DEFAULT_CACHE_SIZE_LIMIT")]
    pub cache_size_limit: u64,
}

const DEFAULT_CACHE_SIZE_LIMIT: u64 = 100 * 1024 * 1024;

fn default_max_concurrent_loads() -> usize {
    num_cpus::get().min(4)
}

fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join("yomikomi").join("cache")
}

impl ReaderConfig {
    pub fn builder() -> ReaderConfigBuilder {
        ReaderConfigBuilder::default()
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            default_viewer: ViewerKind::LeftToRight,
            max_concurrent_loads: default_max_concurrent_loads(),
            http_preload_pages: 4,
            cache_dir: default_cache_dir(),
            cache_size_limit: DEFAULT_CACHE_SIZE_LIMIT,
        }
    }
}

impl ReaderConfigBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if let Some(ViewerKind::Default) = self.default_viewer {
            return Err("`default_viewer` must name a concrete viewer.".to_string());
        }
        if let Some(0) = self.max_concurrent_loads {
            return Err("`max_concurrent_loads` must be at least 1.".to_string());
        }
        Ok(())
    }
}

/// The bound manga and the viewer it is displayed with.
#[derive(Debug, Clone, PartialEq)]
pub struct MangaBinding {
    pub manga: Manga,
    pub viewer: ViewerKind,
}

/// One-shot instructions for the viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    /// Jump to a page of a chapter.
    MoveToPage { chapter_id: i64, index: usize },
}

/// Everything tied to the currently bound manga.
struct Binding {
    manga: Manga,
    chapter_id: i64,
    loader: ChapterLoader,
    chapters: OnceCell<Vec<Arc<ReaderChapter>>>,
}

#[derive(Default)]
struct Session {
    binding: Option<Arc<Binding>>,
    active: Option<AbortHandle>,
    tasks: JoinSet<()>,
}

impl Session {
    fn spawn<F>(&mut self, task: F) -> AbortHandle
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        while self.tasks.try_join_next().is_some() {}
        self.tasks.spawn(task)
    }
}

struct Inner {
    config: ReaderConfig,
    repository: Arc<dyn ChapterRepository>,
    downloads: Arc<dyn DownloadIndex>,
    sources: Arc<dyn SourceManager>,
    sniffer: Arc<dyn ImageSniffer>,
    session: Mutex<Session>,
    generation: AtomicU64,
    window: watch::Sender<Option<Arc<ViewerChapters>>>,
    manga: watch::Sender<Option<MangaBinding>>,
    events: broadcast::Sender<ReaderEvent>,
}

/// Drives a reading session.
///
/// Only one load is active at a time: starting a new one aborts the previous
/// active load, and a stale completion never publishes its window. Preloads
/// run next to the active load. Cloning the presenter yields another handle
/// to the same session.
///
/// Methods that start background work must be called from within a Tokio
/// runtime.
#[derive(Clone)]
pub struct ReaderPresenter {
    inner: Arc<Inner>,
}

impl ReaderPresenter {
    pub fn new(
        config: ReaderConfig,
        repository: Arc<dyn ChapterRepository>,
        downloads: Arc<dyn DownloadIndex>,
        sources: Arc<dyn SourceManager>,
        sniffer: Arc<dyn ImageSniffer>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                repository,
                downloads,
                sources,
                sniffer,
                session: Mutex::new(Session::default()),
                generation: AtomicU64::new(0),
                window: watch::Sender::new(None),
                manga: watch::Sender::new(None),
                events,
            }),
        }
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.inner.config
    }

    /// Binds `manga` and loads `start_chapter_id` in the background.
    ///
    /// Calling it again with the same manga and chapter does nothing. Any
    /// other call replaces the session: the previous window is released and
    /// the chapter list is rebuilt. Failures are logged, never returned.
    pub fn initialize(&self, manga: Manga, start_chapter_id: i64) {
        let inner = &self.inner;
        let mut session = lock(&inner.session);

        if let Some(binding) = &session.binding {
            if binding.manga.id == manga.id && binding.chapter_id == start_chapter_id {
                debug!("Reader already bound to chapter {}", start_chapter_id);
                return;
            }
        }

        session.tasks.abort_all();
        session.active = None;
        let generation = inner.next_generation();
        if let Some(previous) = inner.take_window() {
            inner.spawn_persist(previous.current().chapter());
        }

        let source = inner.sources.get_or_stub(manga.source);
        info!(
            "Reading '{}' from chapter {} ({:?})",
            manga.title, start_chapter_id, source
        );
        let loader = ChapterLoader::new(
            manga.clone(),
            source,
            Arc::clone(&inner.downloads),
            Arc::clone(&inner.sniffer),
            &inner.config,
        );
        let binding = Arc::new(Binding {
            manga: manga.clone(),
            chapter_id: start_chapter_id,
            loader,
            chapters: OnceCell::new(),
        });
        session.binding = Some(Arc::clone(&binding));

        inner.manga.send_replace(Some(MangaBinding {
            viewer: manga.viewer.or(inner.config.default_viewer),
            manga,
        }));

        let task_inner = Arc::clone(inner);
        let handle = session.spawn(async move {
            let chapter = match task_inner.chapter_list(&binding).await {
                Ok(chapters) => chapters
                    .iter()
                    .find(|chapter| chapter.id() == binding.chapter_id)
                    .cloned(),
                Err(e) => {
                    warn!("Failed to build the chapter list: {}", e);
                    return;
                }
            };
            match chapter {
                Some(chapter) => {
                    task_inner
                        .load_active(binding, chapter, generation, false)
                        .await
                }
                None => warn!("{}", Error::ChapterNotFound(binding.chapter_id)),
            }
        });
        session.active = Some(handle);
    }

    /// Makes the adjacent chapter the active one and jumps to its first page.
    ///
    /// Returns false when the current window has no chapter in `direction`.
    pub fn load_adjacent(&self, direction: Direction) -> bool {
        match self.adjacent(direction) {
            Some(chapter) => {
                debug!("Loading adjacent chapter {}", chapter.id());
                self.inner.start_active_load(chapter, true);
                true
            }
            None => false,
        }
    }

    pub fn load_next_chapter(&self) -> bool {
        self.load_adjacent(Direction::Next)
    }

    pub fn load_previous_chapter(&self) -> bool {
        self.load_adjacent(Direction::Previous)
    }

    /// Loads the adjacent chapter without touching the active load.
    ///
    /// The current window is republished once the load completes.
    pub fn preload(&self, direction: Direction) {
        let Some(chapter) = self.adjacent(direction) else {
            return;
        };
        let inner = &self.inner;
        let mut session = lock(&inner.session);
        let Some(binding) = session.binding.clone() else {
            return;
        };

        debug!("Preloading chapter {}", chapter.id());
        let task_inner = Arc::clone(inner);
        session.spawn(async move {
            binding.loader.load_chapter(&chapter).await;
            let session = lock(&task_inner.session);
            let still_bound = session
                .binding
                .as_ref()
                .is_some_and(|bound| Arc::ptr_eq(bound, &binding));
            if still_bound {
                task_inner.window.send_modify(|_| {});
            }
        });
    }

    /// Records `page` as displayed.
    ///
    /// Updates the reading progress of the page's chapter. When the page
    /// belongs to another chapter than the current one, the outgoing chapter
    /// is persisted and the page's chapter becomes the active one.
    pub fn on_page_displayed(&self, page: &ReaderPage) {
        let Some(window) = self.viewer_chapters() else {
            return;
        };
        let Some(chapter) = page.chapter() else {
            return;
        };

        chapter.update_progress(page.index());

        if !Arc::ptr_eq(&chapter, window.current()) {
            info!("Chapter {} is now active", chapter.id());
            self.inner.spawn_persist(window.current().chapter());
            self.inner.start_active_load(chapter, false);
        }
    }

    /// Persists the reading progress of the current chapter.
    pub async fn save_progress(&self) {
        if let Some(current) = self.current_chapter() {
            self.inner.persist(&current.chapter()).await;
        }
    }

    /// Ends the session: aborts background loads, releases the window,
    /// persists the current chapter and trims the image cache.
    pub async fn close(&self) {
        let previous = {
            let mut session = lock(&self.inner.session);
            session.tasks.abort_all();
            session.active = None;
            session.binding = None;
            self.inner.next_generation();
            self.inner.take_window()
        };

        if let Some(previous) = previous {
            self.inner.persist(&previous.current().chapter()).await;
        }
        self.inner.manga.send_replace(None);

        let config = &self.inner.config;
        match trim_cache(&config.cache_dir, config.cache_size_limit).await {
            Ok(0) => {}
            Ok(removed) => debug!("Trimmed {} bytes from the image cache", removed),
            Err(e) => warn!("Failed to trim the image cache: {}", e),
        }
    }

    pub fn manga(&self) -> Option<MangaBinding> {
        self.inner.manga.borrow().clone()
    }

    pub fn current_chapter(&self) -> Option<Arc<ReaderChapter>> {
        self.viewer_chapters()
            .map(|window| Arc::clone(window.current()))
    }

    pub fn viewer_chapters(&self) -> Option<Arc<ViewerChapters>> {
        self.inner.window.borrow().clone()
    }

    pub fn subscribe_viewer_chapters(&self) -> watch::Receiver<Option<Arc<ViewerChapters>>> {
        self.inner.window.subscribe()
    }

    pub fn subscribe_manga(&self) -> watch::Receiver<Option<MangaBinding>> {
        self.inner.manga.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ReaderEvent> {
        self.inner.events.subscribe()
    }

    fn adjacent(&self, direction: Direction) -> Option<Arc<ReaderChapter>> {
        let window = self.viewer_chapters()?;
        match direction {
            Direction::Previous => window.previous().cloned(),
            Direction::Next => window.next().cloned(),
        }
    }
}

impl Inner {
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Unpublishes the window and releases it.
    fn take_window(&self) -> Option<Arc<ViewerChapters>> {
        let previous = self.window.send_replace(None);
        if let Some(window) = &previous {
            window.release();
        }
        previous
    }

    async fn chapter_list<'a>(&self, binding: &'a Binding) -> Result<&'a Vec<Arc<ReaderChapter>>> {
        binding
            .chapters
            .get_or_try_init(|| async {
                let chapters = self.repository.chapters(&binding.manga).await?;
                let selected = chapters
                    .iter()
                    .find(|chapter| chapter.id == binding.chapter_id)
                    .cloned()
                    .ok_or(Error::ChapterNotFound(binding.chapter_id))?;

                let ordered = binding.manga.sorting.apply(&chapters, &selected);
                debug!(
                    "Chapter list of '{}' has {} entries",
                    binding.manga.title,
                    ordered.len()
                );
                Ok::<_, Error>(ordered.into_iter().map(ReaderChapter::new).collect())
            })
            .await
    }

    /// Aborts the active load and starts loading `chapter` in its place.
    fn start_active_load(self: &Arc<Self>, chapter: Arc<ReaderChapter>, move_to_first: bool) {
        let mut session = lock(&self.session);
        let Some(binding) = session.binding.clone() else {
            return;
        };
        if let Some(active) = session.active.take() {
            active.abort();
        }

        let generation = self.next_generation();
        let inner = Arc::clone(self);
        let handle = session.spawn(async move {
            inner
                .load_active(binding, chapter, generation, move_to_first)
                .await
        });
        session.active = Some(handle);
    }

    async fn load_active(
        self: Arc<Self>,
        binding: Arc<Binding>,
        chapter: Arc<ReaderChapter>,
        generation: u64,
        move_to_first: bool,
    ) {
        let state = binding.loader.load_chapter(&chapter).await;
        let sequence = match self.chapter_list(&binding).await {
            Ok(sequence) => sequence,
            Err(e) => {
                warn!("Failed to build the chapter list: {}", e);
                return;
            }
        };

        let window = ViewerChapters::from_sequence(Arc::clone(&chapter), sequence);
        if !self.publish_window(generation, window) {
            debug!("Discarding stale load of chapter {}", chapter.id());
            return;
        }

        if move_to_first && matches!(state, ChapterState::Loaded(_)) {
            // No subscriber is not an error.
            let _ = self.events.send(ReaderEvent::MoveToPage {
                chapter_id: chapter.id(),
                index: 0,
            });
        }
    }

    /// Publishes `window` unless a newer load was started meanwhile.
    ///
    /// The new window is retained before the old one is released.
    fn publish_window(&self, generation: u64, window: ViewerChapters) -> bool {
        let _session = lock(&self.session);
        if self.generation.load(Ordering::Acquire) != generation {
            return false;
        }

        let window = Arc::new(window);
        window.retain();
        let previous = self.window.send_replace(Some(window));
        if let Some(previous) = previous {
            previous.release();
        }
        true
    }

    async fn persist(&self, chapter: &Chapter) {
        if let Err(e) = self
            .repository
            .persist(chapter.id, chapter.last_page_read, chapter.read)
            .await
        {
            warn!("Failed to save progress of chapter {}: {}", chapter.id, e);
        }
    }

    /// Persists `chapter` in the background. The write outlives the session.
    fn spawn_persist(self: &Arc<Self>, chapter: Chapter) {
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.persist(&chapter).await });
    }
}
