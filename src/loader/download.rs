use std::sync::Arc;

use async_trait::async_trait;

use crate::download::DownloadIndex;
use crate::error::{Error, Result};
use crate::loader::{DisposeFlag, LoaderKind, PageLoader, guard_streams, local_page_status};
use crate::page::{Page, PageStatus};
use crate::source::Source;
use crate::types::{Chapter, Manga};

/// Loads the pages of a chapter from the download index.
pub struct DownloadPageLoader {
    chapter: Chapter,
    manga: Manga,
    source: Source,
    downloads: Arc<dyn DownloadIndex>,
    disposed: DisposeFlag,
}

impl DownloadPageLoader {
    pub fn new(
        chapter: Chapter,
        manga: Manga,
        source: Source,
        downloads: Arc<dyn DownloadIndex>,
    ) -> Self {
        Self {
            chapter,
            manga,
            source,
            downloads,
            disposed: DisposeFlag::default(),
        }
    }
}

#[async_trait]
impl PageLoader for DownloadPageLoader {
    fn kind(&self) -> LoaderKind {
        LoaderKind::Download
    }

    async fn list_pages(&self) -> Result<Vec<Arc<Page>>> {
        if self.disposed.is_disposed() {
            return Err(Error::ResourceDisposed);
        }
        let pages = self
            .downloads
            .build_page_list(&self.source, &self.manga, &self.chapter)
            .await?;
        guard_streams(&pages, &self.disposed);
        Ok(pages)
    }

    async fn resolve_page(&self, _page: &Arc<Page>) -> PageStatus {
        local_page_status(&self.disposed)
    }

    fn dispose(&self) {
        self.disposed.dispose();
    }

    fn is_disposed(&self) -> bool {
        self.disposed.is_disposed()
    }
}
