//! The window of chapters handed to the viewer.

use std::sync::Arc;

use crate::chapter::ReaderChapter;

/// The displayed chapter and its immediate neighbours.
///
/// Building a window does not retain anything. The owner calls
/// [`retain`](ViewerChapters::retain) when it publishes the window and
/// [`release`](ViewerChapters::release) when the window is replaced, always
/// retaining the new window before releasing the old one so that chapters
/// shared by both keep their loaders.
#[derive(Debug, Clone)]
pub struct ViewerChapters {
    current: Arc<ReaderChapter>,
    previous: Option<Arc<ReaderChapter>>,
    next: Option<Arc<ReaderChapter>>,
}

impl ViewerChapters {
    pub fn new(
        current: Arc<ReaderChapter>,
        previous: Option<Arc<ReaderChapter>>,
        next: Option<Arc<ReaderChapter>>,
    ) -> Self {
        Self {
            current,
            previous,
            next,
        }
    }

    /// Builds the window around `current` from an ordered chapter sequence.
    ///
    /// Neighbours are the positional neighbours of `current` in `sequence`.
    /// A chapter missing from the sequence gets no neighbours.
    pub fn from_sequence(current: Arc<ReaderChapter>, sequence: &[Arc<ReaderChapter>]) -> Self {
        let position = sequence
            .iter()
            .position(|chapter| Arc::ptr_eq(chapter, &current));

        let (previous, next) = match position {
            Some(position) => (
                position
                    .checked_sub(1)
                    .and_then(|index| sequence.get(index))
                    .cloned(),
                sequence.get(position + 1).cloned(),
            ),
            None => (None, None),
        };

        Self::new(current, previous, next)
    }

    pub fn current(&self) -> &Arc<ReaderChapter> {
        &self.current
    }

    pub fn previous(&self) -> Option<&Arc<ReaderChapter>> {
        self.previous.as_ref()
    }

    pub fn next(&self) -> Option<&Arc<ReaderChapter>> {
        self.next.as_ref()
    }

    /// Present members, previous first.
    pub fn chapters(&self) -> impl Iterator<Item = &Arc<ReaderChapter>> {
        self.previous
            .iter()
            .chain(std::iter::once(&self.current))
            .chain(self.next.iter())
    }

    /// Whether `chapter` is a member of the window.
    pub fn contains(&self, chapter: &Arc<ReaderChapter>) -> bool {
        self.chapters().any(|member| Arc::ptr_eq(member, chapter))
    }

    pub fn retain(&self) {
        self.chapters().for_each(|chapter| chapter.retain());
    }

    pub fn release(&self) {
        self.chapters().for_each(|chapter| chapter.release());
    }
}
