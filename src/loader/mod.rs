//! Page loaders turn a chapter's backing storage into an ordered page list.
//!
//! This module contains the common [`PageLoader`] interface and one
//! implementation per storage kind:
//! - [`directory::DirectoryPageLoader`]: a plain folder of images
//! - [`zip::ZipPageLoader`]: a ZIP/CBZ archive, kept open until disposal
//! - [`rar::RarPageLoader`]: a RAR/CBR archive, kept indexed until disposal
//! - [`download::DownloadPageLoader`]: a chapter stored by the download index
//! - [`http::HttpPageLoader`]: a chapter served by a remote source

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::page::{Page, PageStatus, StreamFn};
use crate::path_utils::sort_naturally;

pub mod directory;
pub mod download;
pub mod http;
pub mod rar;
pub mod zip;

/// Storage kind served by a page loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderKind {
    Directory,
    Zip,
    Rar,
    Download,
    Http,
}

impl fmt::Display for LoaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoaderKind::Directory => "directory",
            LoaderKind::Zip => "zip",
            LoaderKind::Rar => "rar",
            LoaderKind::Download => "download",
            LoaderKind::Http => "http",
        };
        f.write_str(name)
    }
}

/// Common interface of all page loaders.
///
/// A loader is assigned to a chapter once per load and lives until the
/// chapter's last reference is released, at which point it is disposed.
#[async_trait]
pub trait PageLoader: Send + Sync {
    fn kind(&self) -> LoaderKind;

    /// Lists the chapter's pages in reading order, indexed from 0.
    ///
    /// Fails with [`Error::EmptyPageSet`] if no image entry is found.
    async fn list_pages(&self) -> Result<Vec<Arc<Page>>>;

    /// Drives a page to a terminal status and returns it.
    ///
    /// Reports [`PageStatus::Error`] once the loader is disposed.
    async fn resolve_page(&self, page: &Arc<Page>) -> PageStatus;

    /// Retries an errored page. Loaders whose pages cannot fail transiently
    /// keep the default no-op.
    fn retry_page(&self, _page: &Arc<Page>) {}

    /// Releases the loader's resources. Idempotent.
    fn dispose(&self);

    fn is_disposed(&self) -> bool;
}

/// Disposal flag shared by a loader and the page streams it hands out.
#[derive(Debug, Default, Clone)]
pub(crate) struct DisposeFlag(Arc<AtomicBool>);

impl DisposeFlag {
    /// Marks the owner disposed. Returns true only for the first call.
    pub(crate) fn dispose(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Status of a page whose bytes are already on the device.
pub(crate) fn local_page_status(disposed: &DisposeFlag) -> PageStatus {
    if disposed.is_disposed() {
        PageStatus::Error
    } else {
        PageStatus::Ready
    }
}

/// Sorts named entries naturally and turns them into ready pages.
pub(crate) fn index_entries(mut entries: Vec<(String, StreamFn)>) -> Result<Vec<Arc<Page>>> {
    if entries.is_empty() {
        return Err(Error::EmptyPageSet);
    }
    sort_naturally(&mut entries, |(name, _)| name.as_str());
    Ok(entries
        .into_iter()
        .enumerate()
        .map(|(index, (_, stream))| Arc::new(Page::local(index, stream)))
        .collect())
}

/// Wraps `stream` so it fails with [`Error::ResourceDisposed`] once the
/// loader is disposed.
pub(crate) fn guarded_stream(stream: StreamFn, disposed: DisposeFlag) -> StreamFn {
    Arc::new(move || {
        if disposed.is_disposed() {
            return Err(Error::ResourceDisposed);
        }
        stream()
    })
}

/// Ties the streams of listed pages to the loader's disposal.
pub(crate) fn guard_streams(pages: &[Arc<Page>], disposed: &DisposeFlag) {
    for page in pages {
        if let Some(stream) = page.stream() {
            page.set_stream(guarded_stream(stream, disposed.clone()));
        }
    }
}

/// Stream supplier reopening a file on every call.
pub(crate) fn file_stream(path: PathBuf) -> StreamFn {
    Arc::new(move || {
        let file = File::open(&path)?;
        Ok(Box::new(BufReader::new(file)) as Box<dyn Read + Send>)
    })
}
