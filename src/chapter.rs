//! Per-chapter reading state.
//!
//! A [`ReaderChapter`] wraps a domain [`Chapter`] with its load state, its
//! assigned page loader, its pages once loaded, the page to show first and
//! the number of viewer windows retaining it. Instances are shared as
//! `Arc<ReaderChapter>`; pointer identity tells whether two windows refer to
//! the same chapter.

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, Weak};

use log::{debug, info, warn};
use tokio::sync::watch;

use crate::error::Error;
use crate::loader::PageLoader;
use crate::page::{Page, PageStatus};
use crate::sync::lock;
use crate::types::Chapter;

/// Load state of a chapter.
#[derive(Debug, Clone)]
pub enum ChapterState {
    /// Not requested yet, or released by every window.
    Wait,
    Loading,
    Loaded(Arc<Vec<ReaderPage>>),
    /// Load failed; requesting the chapter again retries it.
    Error(Arc<Error>),
}

impl ChapterState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, ChapterState::Loaded(_))
    }

    pub fn pages(&self) -> Option<&Arc<Vec<ReaderPage>>> {
        match self {
            ChapterState::Loaded(pages) => Some(pages),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&Arc<Error>> {
        match self {
            ChapterState::Error(error) => Some(error),
            _ => None,
        }
    }
}

/// Page the viewer should show when the chapter is displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedPage {
    Index(usize),
    /// The last page, whatever the page count turns out to be.
    Last,
}

impl Default for RequestedPage {
    fn default() -> Self {
        RequestedPage::Index(0)
    }
}

/// A page attached to the chapter it belongs to.
#[derive(Debug, Clone)]
pub struct ReaderPage {
    page: Arc<Page>,
    chapter: Weak<ReaderChapter>,
}

impl ReaderPage {
    pub(crate) fn attach(pages: Vec<Arc<Page>>, chapter: &Arc<ReaderChapter>) -> Vec<ReaderPage> {
        pages
            .into_iter()
            .map(|page| ReaderPage {
                page,
                chapter: Arc::downgrade(chapter),
            })
            .collect()
    }

    pub fn page(&self) -> &Arc<Page> {
        &self.page
    }

    /// The owning chapter, if it is still alive.
    pub fn chapter(&self) -> Option<Arc<ReaderChapter>> {
        self.chapter.upgrade()
    }

    /// Drives the page to a terminal status through the chapter's loader.
    pub async fn resolve(&self) -> PageStatus {
        match self.chapter().and_then(|chapter| chapter.page_loader()) {
            Some(loader) => loader.resolve_page(&self.page).await,
            None => PageStatus::Error,
        }
    }

    /// Asks the chapter's loader to retry this page.
    pub fn retry(&self) {
        if let Some(loader) = self.chapter().and_then(|chapter| chapter.page_loader()) {
            loader.retry_page(&self.page);
        }
    }
}

impl Deref for ReaderPage {
    type Target = Page;

    fn deref(&self) -> &Page {
        &self.page
    }
}

/// Outcome of trying to start a load.
pub(crate) enum LoadClaim {
    /// Already loaded; nothing to do.
    Loaded(ChapterState),
    /// Another task is loading; wait on the receiver.
    InFlight(watch::Receiver<ChapterState>),
    /// The caller moved the chapter to `Loading` and must finish the load
    /// through [`ReaderChapter::finish_loading`] with the given epoch.
    Claimed(u64),
}

/// Window references and the number of times the last one was dropped while
/// a load was in flight.
#[derive(Debug, Default)]
struct Retention {
    count: usize,
    release_epoch: u64,
}

pub struct ReaderChapter {
    chapter: Mutex<Chapter>,
    state: watch::Sender<ChapterState>,
    page_loader: Mutex<Option<Arc<dyn PageLoader>>>,
    requested_page: Mutex<RequestedPage>,
    retention: Mutex<Retention>,
}

impl ReaderChapter {
    pub fn new(chapter: Chapter) -> Arc<Self> {
        Arc::new(Self {
            chapter: Mutex::new(chapter),
            state: watch::Sender::new(ChapterState::Wait),
            page_loader: Mutex::new(None),
            requested_page: Mutex::new(RequestedPage::default()),
            retention: Mutex::new(Retention::default()),
        })
    }

    pub fn id(&self) -> i64 {
        lock(&self.chapter).id
    }

    /// Snapshot of the domain chapter, including reading progress.
    pub fn chapter(&self) -> Chapter {
        lock(&self.chapter).clone()
    }

    pub fn state(&self) -> ChapterState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChapterState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&self, state: ChapterState) {
        self.state.send_replace(state);
    }

    /// Moves the chapter to `Loading` unless it is loaded or loading already.
    pub(crate) fn begin_loading(&self) -> LoadClaim {
        let retention = lock(&self.retention);
        let mut loaded = None;
        let claimed = self.state.send_if_modified(|state| match state {
            ChapterState::Loaded(_) => {
                loaded = Some(state.clone());
                false
            }
            ChapterState::Loading => false,
            ChapterState::Wait | ChapterState::Error(_) => {
                *state = ChapterState::Loading;
                true
            }
        });

        match loaded {
            Some(state) => LoadClaim::Loaded(state),
            None if claimed => LoadClaim::Claimed(retention.release_epoch),
            None => LoadClaim::InFlight(self.state.subscribe()),
        }
    }

    /// Whether every window released the chapter after the load holding
    /// `epoch` was claimed.
    pub(crate) fn released_since(&self, epoch: u64) -> bool {
        lock(&self.retention).release_epoch != epoch
    }

    /// Settles a claimed load.
    ///
    /// If the chapter was released meanwhile, the loader assigned by the load
    /// is disposed and the chapter goes back to `Wait` instead.
    pub(crate) fn finish_loading(&self, epoch: u64, state: ChapterState) -> ChapterState {
        let retention = lock(&self.retention);
        let state = if retention.release_epoch == epoch {
            state
        } else {
            if let Some(loader) = lock(&self.page_loader).take() {
                debug!(
                    "Disposing {} loader of released chapter {}",
                    loader.kind(),
                    self.id()
                );
                loader.dispose();
            }
            info!("Chapter {} was released while loading", self.id());
            ChapterState::Wait
        };
        self.set_state(state.clone());
        state
    }

    /// Puts a chapter left in `Loading` by a cancelled load back to `Wait`.
    pub(crate) fn abandon_loading(&self) {
        self.state.send_if_modified(|state| {
            if matches!(state, ChapterState::Loading) {
                *state = ChapterState::Wait;
                true
            } else {
                false
            }
        });
    }

    pub fn pages(&self) -> Option<Arc<Vec<ReaderPage>>> {
        self.state.borrow().pages().cloned()
    }

    pub fn page_loader(&self) -> Option<Arc<dyn PageLoader>> {
        lock(&self.page_loader).clone()
    }

    /// Assigns a new loader, returning the previous one.
    pub(crate) fn replace_page_loader(
        &self,
        loader: Arc<dyn PageLoader>,
    ) -> Option<Arc<dyn PageLoader>> {
        lock(&self.page_loader).replace(loader)
    }

    pub fn requested_page(&self) -> RequestedPage {
        *lock(&self.requested_page)
    }

    pub fn set_requested_page(&self, requested: RequestedPage) {
        *lock(&self.requested_page) = requested;
    }

    /// The requested page as an index into the loaded pages, clamped to the
    /// page count. `None` until the chapter is loaded.
    pub fn requested_index(&self) -> Option<usize> {
        let pages = self.pages()?;
        let last = pages.len().checked_sub(1)?;
        Some(match self.requested_page() {
            RequestedPage::Index(index) => index.min(last),
            RequestedPage::Last => last,
        })
    }

    /// Records `index` as the last page read and marks the chapter read when
    /// it is the final page. Returns the updated chapter.
    pub(crate) fn update_progress(&self, index: usize) -> Chapter {
        let is_last = self
            .pages()
            .map(|pages| pages.len().checked_sub(1) == Some(index))
            .unwrap_or(false);

        let mut chapter = lock(&self.chapter);
        chapter.last_page_read = index;
        if is_last {
            chapter.read = true;
        }
        chapter.clone()
    }

    /// Number of viewer windows currently retaining the chapter.
    pub fn references(&self) -> usize {
        lock(&self.retention).count
    }

    pub fn retain(&self) {
        lock(&self.retention).count += 1;
    }

    /// Drops one reference. The last release disposes the page loader and
    /// returns the chapter to `Wait`.
    ///
    /// A chapter still loading stays `Loading`: the in-flight load observes
    /// the release and settles to `Wait` itself, so no second load can claim
    /// the chapter in between.
    pub fn release(&self) {
        let mut retention = lock(&self.retention);
        if retention.count == 0 {
            warn!("Chapter {} released more often than retained", self.id());
            return;
        }
        retention.count -= 1;
        if retention.count > 0 {
            return;
        }

        if let Some(loader) = lock(&self.page_loader).take() {
            debug!("Disposing {} loader of chapter {}", loader.kind(), self.id());
            loader.dispose();
        }
        let loading = matches!(*self.state.borrow(), ChapterState::Loading);
        if loading {
            retention.release_epoch += 1;
        } else {
            self.set_state(ChapterState::Wait);
        }
    }
}

impl fmt::Debug for ReaderChapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let loader = self.page_loader().map(|loader| loader.kind());
        f.debug_struct("ReaderChapter")
            .field("chapter", &self.chapter())
            .field("state", &self.state())
            .field("page_loader", &loader)
            .field("requested_page", &self.requested_page())
            .field("references", &self.references())
            .finish()
    }
}
