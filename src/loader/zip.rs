use std::fs::File;
use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::task::spawn_blocking;
use ::zip::ZipArchive;

use crate::error::{Error, Result};
use crate::loader::{DisposeFlag, LoaderKind, PageLoader, index_entries, local_page_status};
use crate::page::{Page, PageStatus, StreamFn};
use crate::path_utils::path_to_string_lossy;
use crate::sniffer::ImageSniffer;
use crate::sync::lock;

type SharedArchive = Arc<Mutex<Option<ZipArchive<File>>>>;

/// Upper bound on the buffer reserved from an entry's declared size.
const SIZE_HINT_LIMIT: u64 = 8 << 20;

/// Loads pages from a ZIP (CBZ) archive.
///
/// The archive is opened on construction and stays open, so pages can be
/// read in any order, until the loader is disposed.
pub struct ZipPageLoader {
    path: PathBuf,
    archive: SharedArchive,
    sniffer: Arc<dyn ImageSniffer>,
    disposed: DisposeFlag,
}

impl ZipPageLoader {
    /// Opens the archive at `path`.
    pub async fn open(path: impl Into<PathBuf>, sniffer: Arc<dyn ImageSniffer>) -> Result<Self> {
        let path = path.into();
        let archive_path = path.clone();
        let archive = spawn_blocking(move || -> Result<ZipArchive<File>> {
            let file = File::open(&archive_path)?;
            Ok(ZipArchive::new(file)?)
        })
        .await??;

        Ok(Self {
            path,
            archive: Arc::new(Mutex::new(Some(archive))),
            sniffer,
            disposed: DisposeFlag::default(),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Names of all file entries; unreadable entries are skipped.
    fn file_entry_names(archive: &SharedArchive) -> Result<Vec<String>> {
        let mut guard = lock(archive);
        let zip = guard.as_mut().ok_or(Error::ResourceDisposed)?;

        let mut names = Vec::with_capacity(zip.len());
        for index in 0..zip.len() {
            match zip.by_index(index) {
                Ok(entry) if entry.is_dir() => {}
                Ok(entry) => names.push(entry.name().to_string()),
                Err(e) => warn!("Skipping unreadable zip entry #{}: {}", index, e),
            }
        }
        Ok(names)
    }

    fn entry_stream(archive: SharedArchive, name: String) -> StreamFn {
        Arc::new(move || {
            let mut guard = lock(&archive);
            let zip = guard.as_mut().ok_or(Error::ResourceDisposed)?;
            let mut entry = zip.by_name(&name)?;
            let mut bytes = Vec::with_capacity(entry.size().min(SIZE_HINT_LIMIT) as usize);
            entry.read_to_end(&mut bytes)?;
            Ok(Box::new(Cursor::new(bytes)) as Box<dyn Read + Send>)
        })
    }
}

#[async_trait]
impl PageLoader for ZipPageLoader {
    fn kind(&self) -> LoaderKind {
        LoaderKind::Zip
    }

    async fn list_pages(&self) -> Result<Vec<Arc<Page>>> {
        let archive = Arc::clone(&self.archive);
        let sniffer = Arc::clone(&self.sniffer);

        spawn_blocking(move || {
            let images = Self::file_entry_names(&archive)?
                .into_iter()
                .filter_map(|name| {
                    let stream = Self::entry_stream(Arc::clone(&archive), name.clone());
                    sniffer
                        .is_image(&name, stream.as_ref())
                        .then_some((name, stream))
                })
                .collect();
            index_entries(images)
        })
        .await?
    }

    async fn resolve_page(&self, _page: &Arc<Page>) -> PageStatus {
        local_page_status(&self.disposed)
    }

    fn dispose(&self) {
        if self.disposed.dispose() {
            lock(&self.archive).take();
            debug!("Closed zip archive {}", path_to_string_lossy(&self.path));
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.is_disposed()
    }
}
