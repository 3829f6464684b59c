use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use rayon::prelude::*;
use tokio::fs::read_dir;
use tokio::task::spawn_blocking;

use crate::error::{Error, Result};
use crate::loader::{
    DisposeFlag, LoaderKind, PageLoader, file_stream, guard_streams, index_entries,
    local_page_status,
};
use crate::page::{Page, PageStatus};
use crate::path_utils::{get_file_name_lossy, is_hidden_file};
use crate::sniffer::ImageSniffer;

/// Loads pages from a folder of image files.
pub struct DirectoryPageLoader {
    path: PathBuf,
    sniffer: Arc<dyn ImageSniffer>,
    disposed: DisposeFlag,
}

impl DirectoryPageLoader {
    pub fn new(path: impl Into<PathBuf>, sniffer: Arc<dyn ImageSniffer>) -> Self {
        Self {
            path: path.into(),
            sniffer,
            disposed: DisposeFlag::default(),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl PageLoader for DirectoryPageLoader {
    fn kind(&self) -> LoaderKind {
        LoaderKind::Directory
    }

    async fn list_pages(&self) -> Result<Vec<Arc<Page>>> {
        if self.disposed.is_disposed() {
            return Err(Error::ResourceDisposed);
        }
        let pages = list_directory_pages(self.path.clone(), Arc::clone(&self.sniffer)).await?;
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

/// Lists the image files of a folder as ready pages.
///
/// Hidden files and subfolders are skipped. Sniffing runs on the blocking
/// pool since it may read file headers.
pub(crate) async fn list_directory_pages(
    directory: PathBuf,
    sniffer: Arc<dyn ImageSniffer>,
) -> Result<Vec<Arc<Page>>> {
    let mut files: Vec<PathBuf> = Vec::new();
    let mut entries = read_dir(&directory).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if is_hidden_file(&path) || entry.file_type().await?.is_dir() {
            continue;
        }
        files.push(path);
    }

    let images = spawn_blocking(move || {
        files
            .into_par_iter()
            .filter(|path| {
                let candidate = path.clone();
                let open = move || file_stream(candidate.clone())();
                sniffer.is_image(&get_file_name_lossy(path), &open)
            })
            .collect::<Vec<PathBuf>>()
    })
    .await?;

    let named = images
        .into_iter()
        .map(|path| (get_file_name_lossy(&path), file_stream(path)))
        .collect();
    index_entries(named)
}
