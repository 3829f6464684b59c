//! Manga sources as seen by the loading pipeline.
//!
//! A source is either remote (pages are fetched over HTTP by the host's
//! networking layer), local (chapters live on the filesystem) or a stub for
//! sources that are not installed. The pipeline only needs the capabilities
//! exposed by [`RemoteSource`] and [`LocalFormatResolver`].

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::path_utils::{extension_lowercase, path_to_string_lossy};
use crate::types::{Chapter, LocalFormat};

/// A page as listed by a remote source.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemotePage {
    pub url: String,
    pub image_url: Option<String>,
}

/// Progress callback for image downloads, called with a percentage.
pub type ProgressFn<'a> = &'a (dyn Fn(u8) + Send + Sync);

/// An HTTP-capable source.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    fn id(&self) -> i64;

    /// Lists the pages of a chapter in reading order.
    async fn fetch_page_list(&self, chapter: &Chapter) -> Result<Vec<RemotePage>>;

    /// Resolves the direct image url of a page.
    async fn fetch_image_url(&self, page: &RemotePage) -> Result<String>;

    /// Downloads an image, reporting progress through `progress`.
    async fn fetch_image(&self, image_url: &str, progress: ProgressFn<'_>) -> Result<Vec<u8>>;
}

/// Detects how a locally stored chapter is packaged.
pub trait LocalFormatResolver: Send + Sync {
    fn detect_format(&self, chapter: &Chapter) -> Result<LocalFormat>;
}

/// Resolves chapter urls relative to a root folder and detects the format
/// from the file type and extension.
#[derive(Debug, Clone)]
pub struct LocalDirectoryResolver {
    root: PathBuf,
}

impl LocalDirectoryResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl LocalFormatResolver for LocalDirectoryResolver {
    fn detect_format(&self, chapter: &Chapter) -> Result<LocalFormat> {
        let path = self.root.join(&chapter.url);
        if path.is_dir() {
            return Ok(LocalFormat::Directory(path));
        }
        if !path.is_file() {
            return Err(Error::InvalidPath(
                path,
                "Chapter file does not exist".to_string(),
            ));
        }

        let name = path_to_string_lossy(&path);
        match extension_lowercase(&name).as_deref() {
            Some("zip") | Some("cbz") => Ok(LocalFormat::Zip(path)),
            Some("rar") | Some("cbr") => Ok(LocalFormat::Rar(path)),
            Some("epub") => Ok(LocalFormat::Epub(path)),
            _ => Err(Error::UnsupportedFormat(name)),
        }
    }
}

/// The nature of a manga's source.
#[derive(Clone)]
pub enum Source {
    Remote(Arc<dyn RemoteSource>),
    Local(Arc<dyn LocalFormatResolver>),
    /// A source that is not available; no loader can serve it.
    Stub(i64),
}

impl Source {
    /// Id of the source, when it has one of its own.
    pub fn id(&self) -> Option<i64> {
        match self {
            Source::Remote(source) => Some(source.id()),
            Source::Local(_) => None,
            Source::Stub(id) => Some(*id),
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Remote(source) => write!(f, "Remote({})", source.id()),
            Source::Local(_) => write!(f, "Local"),
            Source::Stub(id) => write!(f, "Stub({})", id),
        }
    }
}

/// Looks up sources by id.
pub trait SourceManager: Send + Sync {
    /// Returns the source with the given id, or [`Source::Stub`] if it is not
    /// installed.
    fn get_or_stub(&self, source_id: i64) -> Source;
}
