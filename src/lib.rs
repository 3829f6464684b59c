//! Yomikomi - Chapter Loading Pipeline for Manga Readers
//!
//! This crate loads the pages of manga chapters from heterogeneous storage
//! (remote sources, local folders, ZIP/CBZ and RAR/CBR archives, downloaded
//! copies), tracks reading progress and keeps a reference-counted window of
//! the previous, current and next chapter alive while the user reads.
//!
//! # Getting Started
//!
//! The host application supplies its collaborators (chapter storage, download
//! index, source lookup) and builds a [`ReaderPresenter`]. Binding a manga
//! loads the start chapter in the background; the resulting window is
//! published through a watch channel.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use yomikomi::prelude::*;
//!
//! # async fn run(
//! #     repository: Arc<dyn ChapterRepository>,
//! #     sources: Arc<dyn SourceManager>,
//! #     manga: Manga,
//! # ) -> yomikomi::error::Result<()> {
//! let config = ReaderConfig::builder()
//!     .default_viewer(ViewerKind::RightToLeft)
//!     .build()?;
//!
//! let presenter = ReaderPresenter::new(
//!     config,
//!     repository,
//!     Arc::new(FsDownloadIndex::new("./downloads")),
//!     sources,
//!     Arc::new(ContentSniffer),
//! );
//!
//! let mut windows = presenter.subscribe_viewer_chapters();
//! presenter.initialize(manga, 42);
//!
//! windows.changed().await.ok();
//! if let Some(window) = windows.borrow().clone() {
//!     if let Some(pages) = window.current().pages() {
//!         println!("Current chapter has {} pages", pages.len());
//!     }
//! }
//!
//! presenter.load_next_chapter();
//! presenter.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! Individual pieces are usable on their own: a [`ChapterLoader`] loads a
//! single [`ReaderChapter`], and each [`PageLoader`] lists the pages of one
//! storage kind.

pub mod chapter;
pub mod chapter_loader;
pub mod download;
pub mod error;
pub mod loader;
pub mod ordering;
pub mod page;
pub mod path_utils;
pub mod reader;
pub mod repository;
pub mod sniffer;
pub mod source;
pub mod types;
pub mod viewer;

mod sync;

pub use chapter::{ChapterState, ReaderChapter, ReaderPage, RequestedPage};
pub use chapter_loader::ChapterLoader;
pub use download::{DownloadIndex, FsDownloadIndex};
pub use loader::{LoaderKind, PageLoader};
pub use page::{Page, PageStatus, StreamFn};
pub use reader::{MangaBinding, ReaderConfig, ReaderConfigBuilder, ReaderEvent, ReaderPresenter};
pub use repository::ChapterRepository;
pub use sniffer::{ContentSniffer, ImageSniffer};
pub use source::{
    LocalDirectoryResolver, LocalFormatResolver, RemotePage, RemoteSource, Source, SourceManager,
};
pub use types::{Chapter, ChapterSorting, Direction, LocalFormat, Manga, ViewerKind};
pub use viewer::ViewerChapters;

/// Prelude module for convenient imports.
///
/// Re-exports the types needed to wire up a reading session with a single
/// `use yomikomi::prelude::*;` statement.
pub mod prelude {
    pub use super::{
        Chapter, ChapterLoader, ChapterRepository, ChapterSorting, ChapterState, ContentSniffer,
        Direction, DownloadIndex, FsDownloadIndex, ImageSniffer, LocalDirectoryResolver,
        LocalFormat, LocalFormatResolver, LoaderKind, Manga, MangaBinding, Page, PageLoader,
        PageStatus, ReaderChapter, ReaderConfig, ReaderConfigBuilder, ReaderEvent, ReaderPage,
        ReaderPresenter, RemotePage, RemoteSource, RequestedPage, Source, SourceManager,
        ViewerChapters, ViewerKind, error, loader, ordering,
    };
    pub use std::path::{Path, PathBuf};
    pub use std::sync::Arc;
}
