//! Custom error types and result handling for chapter loading.
//!
//! All fallible operations return a [`Result<T>`], a type alias for
//! `std::result::Result<T, Error>`. Loader failures are captured by the
//! chapter state machine and stored as `Arc<Error>` on the chapter, so they can
//! be rendered per chapter instead of aborting the reading session.
//!
use std::path::PathBuf;

/// Type alias for Results with yomikomi errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all chapter and page loading operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// I/O errors from the standard library
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// ZIP archive errors
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    /// RAR archive errors
    #[error(transparent)]
    Rar(#[from] unrar::error::UnrarError),
    /// Async task join errors
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Semaphore(#[from] tokio::sync::AcquireError),
    #[error(transparent)]
    ConfigBuilder(#[from] crate::reader::ReaderConfigBuilderError),
    /// The loader produced no recognized image entries
    #[error("Chapter has no pages")]
    EmptyPageSet,
    /// No page loader can serve chapters of this source
    #[error("No page loader available for source {0}")]
    UnsupportedSource(i64),
    /// The chapter is stored in a local format without a loader
    #[error("Unsupported chapter format: {0}")]
    UnsupportedFormat(String),
    /// The page loader backing this page was already disposed
    #[error("Page loader was disposed")]
    ResourceDisposed,
    /// The page's bytes are not available yet
    #[error("Page {0} has no stream")]
    StreamUnavailable(usize),
    /// Remote source failures (listing, url resolution, image download)
    #[error("Network error: {0}")]
    Network(String),
    /// The requested chapter is not part of the manga's chapter list
    #[error("Chapter {0} not found")]
    ChapterNotFound(i64),
    /// Error for invalid file or directory paths
    #[error("The given path '{0:?}' is invalid: {1}")]
    InvalidPath(PathBuf, String),
    /// Other errors that don't fit into specific categories
    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Whether retrying the same operation may succeed.
    ///
    /// Archive, filesystem and network failures are transient. Configuration
    /// problems (unsupported source or format) and empty chapters are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Zip(_)
                | Error::Rar(_)
                | Error::Network(_)
                | Error::ResourceDisposed
                | Error::Join(_)
        )
    }
}
