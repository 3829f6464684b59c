//! Access to the host's chapter storage.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Chapter, Manga};

/// Chapter storage owned by the host application.
#[async_trait]
pub trait ChapterRepository: Send + Sync {
    /// All chapters of a manga, in storage order.
    async fn chapters(&self, manga: &Manga) -> Result<Vec<Chapter>>;

    /// Stores the reading progress of a chapter.
    async fn persist(&self, chapter_id: i64, last_page_read: usize, read: bool) -> Result<()>;
}
