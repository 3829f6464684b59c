use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use async_trait::async_trait;
use log::{debug, warn};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, spawn_blocking};

use crate::error::{Error, Result};
use crate::loader::{DisposeFlag, LoaderKind, PageLoader, file_stream, guarded_stream};
use crate::page::{Page, PageStatus};
use crate::source::{RemotePage, RemoteSource};
use crate::sync::lock;
use crate::types::Chapter;

/// Loads the pages of a chapter from a remote source.
///
/// Pages start `Queued`. A single worker task downloads queued pages in
/// FIFO order into the chapter's cache folder: `LoadingPage` while the image
/// url is resolved (skipped when the listing already carried it),
/// `DownloadingImage` while bytes arrive, then `Ready` with a stream over the
/// cached file, or `Error`.
pub struct HttpPageLoader {
    chapter: Chapter,
    source: Arc<dyn RemoteSource>,
    preload_size: usize,
    pages: Mutex<Vec<Arc<Page>>>,
    queue: mpsc::UnboundedSender<Arc<Page>>,
    worker: JoinHandle<()>,
    disposed: DisposeFlag,
}

impl HttpPageLoader {
    /// Creates the loader and starts its download worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        chapter: Chapter,
        source: Arc<dyn RemoteSource>,
        cache_dir: &Path,
        preload_size: usize,
    ) -> Self {
        let chapter_cache = cache_dir
            .join(source.id().to_string())
            .join(chapter.id.to_string());
        let (queue, receiver) = mpsc::unbounded_channel();
        let disposed = DisposeFlag::default();
        let worker = tokio::spawn(Self::run_queue(
            Arc::clone(&source),
            chapter_cache,
            receiver,
            disposed.clone(),
        ));

        Self {
            chapter,
            source,
            preload_size,
            pages: Mutex::new(Vec::new()),
            queue,
            worker,
            disposed,
        }
    }

    async fn run_queue(
        source: Arc<dyn RemoteSource>,
        cache_dir: PathBuf,
        mut receiver: mpsc::UnboundedReceiver<Arc<Page>>,
        disposed: DisposeFlag,
    ) {
        while let Some(page) = receiver.recv().await {
            if page.status() != PageStatus::Queued {
                continue;
            }
            if let Err(e) = Self::load_page(source.as_ref(), &cache_dir, &page, &disposed).await {
                warn!("Failed to load page {}: {}", page.index(), e);
                page.set_status(PageStatus::Error);
            }
        }
    }

    async fn load_page(
        source: &dyn RemoteSource,
        cache_dir: &Path,
        page: &Arc<Page>,
        disposed: &DisposeFlag,
    ) -> Result<()> {
        let image_url = match page.image_url() {
            Some(image_url) => image_url,
            None => {
                page.set_status(PageStatus::LoadingPage);
                let remote = RemotePage {
                    url: page.url().unwrap_or_default().to_string(),
                    image_url: None,
                };
                let image_url = source.fetch_image_url(&remote).await?;
                page.set_image_url(image_url.clone());
                image_url
            }
        };

        page.set_status(PageStatus::DownloadingImage);
        let cached = cache_dir.join(cache_key(&image_url));
        if !fs::try_exists(&cached).await.unwrap_or(false) {
            let progress_page = Arc::clone(page);
            let on_progress = move |progress: u8| progress_page.set_progress(progress);
            let bytes = source.fetch_image(&image_url, &on_progress).await?;

            fs::create_dir_all(cache_dir).await?;
            let partial = cached.with_extension("part");
            fs::write(&partial, &bytes).await?;
            fs::rename(&partial, &cached).await?;
        } else {
            debug!("Page {} served from cache", page.index());
        }

        page.set_progress(100);
        page.set_stream(guarded_stream(file_stream(cached), disposed.clone()));
        page.set_status(PageStatus::Ready);
        Ok(())
    }

    fn enqueue(&self, page: &Arc<Page>) {
        // The worker only stops on disposal, when pages are no longer served.
        let _ = self.queue.send(Arc::clone(page));
    }

    /// Queues the pages following `index` so they download ahead of display.
    fn preload_after(&self, index: usize) {
        let pages = lock(&self.pages);
        pages
            .iter()
            .skip(index + 1)
            .take(self.preload_size)
            .filter(|page| page.status() == PageStatus::Queued)
            .for_each(|page| self.enqueue(page));
    }
}

#[async_trait]
impl PageLoader for HttpPageLoader {
    fn kind(&self) -> LoaderKind {
        LoaderKind::Http
    }

    async fn list_pages(&self) -> Result<Vec<Arc<Page>>> {
        if self.disposed.is_disposed() {
            return Err(Error::ResourceDisposed);
        }
        let remote_pages = self.source.fetch_page_list(&self.chapter).await?;

        let pages: Vec<Arc<Page>> = remote_pages
            .into_iter()
            .enumerate()
            .map(|(index, remote)| {
                let page = Page::new(index, PageStatus::Queued).with_url(remote.url);
                Arc::new(match remote.image_url {
                    Some(image_url) => page.with_image_url(image_url),
                    None => page,
                })
            })
            .collect();

        *lock(&self.pages) = pages.clone();
        Ok(pages)
    }

    async fn resolve_page(&self, page: &Arc<Page>) -> PageStatus {
        let mut status = page.subscribe_status();
        if self.disposed.is_disposed() {
            return PageStatus::Error;
        }
        if page.status() == PageStatus::Queued {
            self.enqueue(page);
        }
        self.preload_after(page.index());

        match status.wait_for(|status| status.is_terminal()).await {
            Ok(status) => *status,
            Err(_) => PageStatus::Error,
        }
    }

    fn retry_page(&self, page: &Arc<Page>) {
        if self.disposed.is_disposed() {
            return;
        }
        if page.reset_for_retry() {
            debug!("Retrying page {}", page.index());
            self.enqueue(page);
        }
    }

    fn dispose(&self) {
        if !self.disposed.dispose() {
            return;
        }
        self.worker.abort();
        for page in lock(&self.pages).iter() {
            if !page.status().is_terminal() {
                page.set_status(PageStatus::Error);
            }
        }
        debug!("Stopped page downloads of chapter {}", self.chapter.id);
    }

    fn is_disposed(&self) -> bool {
        self.disposed.is_disposed()
    }
}

impl Drop for HttpPageLoader {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

/// File name of a cached image url: the hex SHA-256 of the url, identical
/// across builds and platforms.
fn cache_key(image_url: &str) -> String {
    format!("{:x}", Sha256::digest(image_url.as_bytes()))
}

/// Deletes the oldest cached images until the cache under `cache_dir` holds
/// at most `limit` bytes. Returns the number of bytes removed.
pub async fn trim_cache(cache_dir: &Path, limit: u64) -> Result<u64> {
    let cache_dir = cache_dir.to_path_buf();
    spawn_blocking(move || -> Result<u64> {
        let mut files = Vec::new();
        collect_cached_files(&cache_dir, &mut files)?;

        let mut total: u64 = files.iter().map(|(_, _, len)| len).sum();
        if total <= limit {
            return Ok(0);
        }
        files.sort_by_key(|(_, modified, _)| *modified);

        let mut removed = 0;
        for (path, _, len) in files {
            if total <= limit {
                break;
            }
            std::fs::remove_file(&path)?;
            total -= len;
            removed += len;
        }
        Ok(removed)
    })
    .await?
}

fn collect_cached_files(dir: &Path, files: &mut Vec<(PathBuf, SystemTime, u64)>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            collect_cached_files(&entry.path(), files)?;
        } else {
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((entry.path(), modified, metadata.len()));
        }
    }
    Ok(())
}
