//! Pages and their load status.
//!
//! A [`Page`] is created by a page loader when a chapter is enumerated and is
//! shared (`Arc<Page>`) between the loader and the reader chapter. Status and
//! download progress are published through `tokio::sync::watch` channels so
//! any number of consumers can observe them for as long as they hold the page.

use std::fmt;
use std::io::Read;
use std::sync::{Arc, Mutex};

use image::ImageFormat;
use log::debug;
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::sync::lock;

/// Number of leading bytes inspected when probing an image's format.
pub(crate) const SNIFF_LEN: u64 = 32;

/// Supplier of a fresh, independent reader over a page's bytes.
pub type StreamFn = Arc<dyn Fn() -> Result<Box<dyn Read + Send>> + Send + Sync>;

/// Load status of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    Queued,
    LoadingPage,
    DownloadingImage,
    Ready,
    Error,
}

impl PageStatus {
    /// Whether the status ends the page's progression.
    pub fn is_terminal(self) -> bool {
        matches!(self, PageStatus::Ready | PageStatus::Error)
    }

    fn rank(self) -> u8 {
        match self {
            PageStatus::Queued => 0,
            PageStatus::LoadingPage => 1,
            PageStatus::DownloadingImage => 2,
            PageStatus::Ready | PageStatus::Error => 3,
        }
    }

    /// Forward-only transition rule. Error is reachable from any
    /// non-terminal status; terminal statuses only leave through a retry.
    pub fn can_advance_to(self, next: PageStatus) -> bool {
        if self.is_terminal() || self == next {
            return false;
        }
        next == PageStatus::Error || next.rank() > self.rank()
    }
}

/// One image of a chapter.
pub struct Page {
    index: usize,
    url: Option<String>,
    image_url: Mutex<Option<String>>,
    stream: Mutex<Option<StreamFn>>,
    status: watch::Sender<PageStatus>,
    progress: watch::Sender<u8>,
}

impl Page {
    /// Creates a page at `index` with the given initial status.
    pub fn new(index: usize, status: PageStatus) -> Self {
        Self {
            index,
            url: None,
            image_url: Mutex::new(None),
            stream: Mutex::new(None),
            status: watch::Sender::new(status),
            progress: watch::Sender::new(0),
        }
    }

    /// Creates a locally available page whose bytes come from `stream`.
    pub fn local(index: usize, stream: StreamFn) -> Self {
        Self::new(index, PageStatus::Ready).with_stream(stream)
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_image_url(self, image_url: impl Into<String>) -> Self {
        *lock(&self.image_url) = Some(image_url.into());
        self
    }

    pub fn with_stream(self, stream: StreamFn) -> Self {
        *lock(&self.stream) = Some(stream);
        self
    }

    /// Position of the page within its chapter.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Remote identity of the page, if it comes from a remote source.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn image_url(&self) -> Option<String> {
        lock(&self.image_url).clone()
    }

    pub fn set_image_url(&self, image_url: impl Into<String>) {
        *lock(&self.image_url) = Some(image_url.into());
    }

    pub fn set_stream(&self, stream: StreamFn) {
        *lock(&self.stream) = Some(stream);
    }

    pub(crate) fn stream(&self) -> Option<StreamFn> {
        lock(&self.stream).clone()
    }

    pub fn has_stream(&self) -> bool {
        lock(&self.stream).is_some()
    }

    /// Opens a new reader over the page's bytes.
    ///
    /// Each call yields an independent reader, so a consumer may probe the
    /// format first and decode afterwards.
    pub fn open_stream(&self) -> Result<Box<dyn Read + Send>> {
        let stream = lock(&self.stream)
            .clone()
            .ok_or(Error::StreamUnavailable(self.index))?;
        stream()
    }

    /// Whether the page holds an animated image (GIF).
    pub fn is_animated(&self) -> Result<bool> {
        let mut header = Vec::with_capacity(SNIFF_LEN as usize);
        self.open_stream()?
            .take(SNIFF_LEN)
            .read_to_end(&mut header)?;
        Ok(matches!(image::guess_format(&header), Ok(ImageFormat::Gif)))
    }

    pub fn status(&self) -> PageStatus {
        *self.status.borrow()
    }

    /// Subscribes to status changes. The receiver sees the current status
    /// immediately and every later forward transition.
    pub fn subscribe_status(&self) -> watch::Receiver<PageStatus> {
        self.status.subscribe()
    }

    /// Advances the status. Backward transitions are ignored and reported
    /// as `false`.
    pub fn set_status(&self, next: PageStatus) -> bool {
        let advanced = self.status.send_if_modified(|current| {
            if current.can_advance_to(next) {
                *current = next;
                true
            } else {
                false
            }
        });
        if !advanced {
            debug!(
                "Ignoring status change of page {} to {:?} (currently {:?})",
                self.index,
                next,
                self.status()
            );
        }
        advanced
    }

    /// Puts an errored page back in the queue. Returns `false` if the page
    /// was not in `Error`.
    pub(crate) fn reset_for_retry(&self) -> bool {
        let reset = self.status.send_if_modified(|current| {
            if *current == PageStatus::Error {
                *current = PageStatus::Queued;
                true
            } else {
                false
            }
        });
        if reset {
            self.progress.send_replace(0);
        }
        reset
    }

    /// Download progress in percent. Only meaningful while the status is
    /// [`PageStatus::DownloadingImage`].
    pub fn progress(&self) -> u8 {
        *self.progress.borrow()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<u8> {
        self.progress.subscribe()
    }

    pub fn set_progress(&self, progress: u8) {
        let progress = progress.min(100);
        self.progress.send_if_modified(|current| {
            if *current != progress {
                *current = progress;
                true
            } else {
                false
            }
        });
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("index", &self.index)
            .field("url", &self.url)
            .field("image_url", &self.image_url())
            .field("status", &self.status())
            .field("progress", &self.progress())
            .field("stream", if self.has_stream() { &"Some(Function)" } else { &"None" })
            .finish()
    }
}
