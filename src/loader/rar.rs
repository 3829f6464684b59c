use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::debug;
use tokio::task::spawn_blocking;

use crate::error::{Error, Result};
use crate::loader::{DisposeFlag, LoaderKind, PageLoader, index_entries, local_page_status};
use crate::page::{Page, PageStatus, StreamFn};
use crate::path_utils::path_to_string_lossy;
use crate::sniffer::ImageSniffer;
use crate::sync::lock;

/// Header listing of an opened RAR archive.
#[derive(Debug)]
struct RarIndex {
    path: PathBuf,
    files: Vec<String>,
}

type SharedIndex = Arc<Mutex<Option<RarIndex>>>;

/// Loads pages from a RAR (CBR) archive.
///
/// The archive headers are read once on construction. Entries are extracted
/// on demand until the loader is disposed.
pub struct RarPageLoader {
    path: PathBuf,
    index: SharedIndex,
    sniffer: Arc<dyn ImageSniffer>,
    disposed: DisposeFlag,
}

impl RarPageLoader {
    /// Opens the archive at `path` and reads its headers.
    pub async fn open(path: impl Into<PathBuf>, sniffer: Arc<dyn ImageSniffer>) -> Result<Self> {
        let path = path.into();
        let archive_path = path.clone();
        let index = spawn_blocking(move || -> Result<RarIndex> {
            let mut files = Vec::new();
            for header in unrar::Archive::new(&archive_path).open_for_listing()? {
                let header = header?;
                if !header.is_directory() {
                    files.push(header.filename.to_string_lossy().to_string());
                }
            }
            Ok(RarIndex {
                path: archive_path,
                files,
            })
        })
        .await??;

        Ok(Self {
            path,
            index: Arc::new(Mutex::new(Some(index))),
            sniffer,
            disposed: DisposeFlag::default(),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Extracts a single entry by walking the archive headers.
    fn read_entry(path: &Path, name: &str) -> Result<Vec<u8>> {
        let mut archive = unrar::Archive::new(path).open_for_processing()?;
        while let Some(header) = archive.read_header()? {
            if header.entry().filename.to_string_lossy() == name {
                let (bytes, _) = header.read()?;
                return Ok(bytes);
            }
            archive = header.skip()?;
        }
        Err(Error::InvalidPath(
            path.to_path_buf(),
            format!("Entry '{}' not found in archive", name),
        ))
    }

    fn entry_stream(index: SharedIndex, name: String) -> StreamFn {
        Arc::new(move || {
            let path = lock(&index)
                .as_ref()
                .map(|index| index.path.clone())
                .ok_or(Error::ResourceDisposed)?;
            let bytes = Self::read_entry(&path, &name)?;
            Ok(Box::new(Cursor::new(bytes)) as Box<dyn Read + Send>)
        })
    }
}

#[async_trait]
impl PageLoader for RarPageLoader {
    fn kind(&self) -> LoaderKind {
        LoaderKind::Rar
    }

    async fn list_pages(&self) -> Result<Vec<Arc<Page>>> {
        let index = Arc::clone(&self.index);
        let sniffer = Arc::clone(&self.sniffer);

        spawn_blocking(move || {
            let files = lock(&index)
                .as_ref()
                .map(|index| index.files.clone())
                .ok_or(Error::ResourceDisposed)?;

            let images = files
                .into_iter()
                .filter_map(|name| {
                    let stream = Self::entry_stream(Arc::clone(&index), name.clone());
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
            lock(&self.index).take();
            debug!("Closed rar archive {}", path_to_string_lossy(&self.path));
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.is_disposed()
    }
}
