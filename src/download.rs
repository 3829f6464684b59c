//! On-device download index.
//!
//! The pipeline asks the download index whether a chapter is fully
//! downloaded and, if so, reads its pages from there instead of the source.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::loader::directory::list_directory_pages;
use crate::page::Page;
use crate::path_utils::sanitize_filename;
use crate::sniffer::{ContentSniffer, ImageSniffer};
use crate::source::Source;
use crate::types::{Chapter, Manga};

#[async_trait]
pub trait DownloadIndex: Send + Sync {
    fn is_chapter_fully_downloaded(&self, chapter: &Chapter, manga: &Manga) -> bool;

    /// Builds the ordered page list of a downloaded chapter.
    async fn build_page_list(
        &self,
        source: &Source,
        manga: &Manga,
        chapter: &Chapter,
    ) -> Result<Vec<Arc<Page>>>;
}

/// Download index backed by a folder tree:
/// `<root>/<source id>/<manga title>/<chapter name>/<pages>`.
///
/// A chapter is complete once its folder exists under its final name;
/// in-progress downloads live in `<chapter name>_tmp`.
#[derive(Clone)]
pub struct FsDownloadIndex {
    root: PathBuf,
    sniffer: Arc<dyn ImageSniffer>,
}

impl FsDownloadIndex {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_sniffer(root, Arc::new(ContentSniffer))
    }

    pub fn with_sniffer(root: impl Into<PathBuf>, sniffer: Arc<dyn ImageSniffer>) -> Self {
        Self {
            root: root.into(),
            sniffer,
        }
    }

    pub fn manga_dir(&self, source_id: i64, manga: &Manga) -> PathBuf {
        self.root
            .join(source_id.to_string())
            .join(sanitize_filename(&manga.title))
    }

    pub fn chapter_dir(&self, source_id: i64, manga: &Manga, chapter: &Chapter) -> PathBuf {
        self.manga_dir(source_id, manga)
            .join(sanitize_filename(&chapter.name))
    }
}

#[async_trait]
impl DownloadIndex for FsDownloadIndex {
    fn is_chapter_fully_downloaded(&self, chapter: &Chapter, manga: &Manga) -> bool {
        self.chapter_dir(manga.source, manga, chapter).is_dir()
    }

    async fn build_page_list(
        &self,
        source: &Source,
        manga: &Manga,
        chapter: &Chapter,
    ) -> Result<Vec<Arc<Page>>> {
        let source_id = source.id().unwrap_or(manga.source);
        let dir = self.chapter_dir(source_id, manga, chapter);
        list_directory_pages(dir, Arc::clone(&self.sniffer)).await
    }
}
