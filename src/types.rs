//! Core domain records and enums shared by the loading pipeline.
//!
//! This module defines:
//! - Domain records owned by the persistence layer (`Manga`, `Chapter`)
//! - Per-manga settings (`ChapterSorting`, `ViewerKind`)
//! - Local storage format tags (`LocalFormat`)
//! - Navigation direction for adjacent chapter requests (`Direction`)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A manga (series) as stored by the host application.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Manga {
    pub id: i64,
    pub source: i64, // Id of the source this manga was added from
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub viewer: ViewerKind,
    #[serde(default)]
    pub sorting: ChapterSorting,
}

/// A chapter record as stored by the host application.
///
/// The loading pipeline only ever writes `last_page_read` and `read`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Chapter {
    pub id: i64,
    pub manga_id: i64,
    pub url: String,
    pub name: String,
    pub source_order: i32,
    pub chapter_number: f32,
    pub scanlator: Option<String>,
    pub last_page_read: usize,
    pub read: bool,
}

/// How the chapters of a manga are ordered for previous/next navigation.
#[derive(Debug, PartialEq, Clone, Copy, Default, Serialize, Deserialize)]
pub enum ChapterSorting {
    #[default]
    Source, // Descending by the source's native order
    Number, // Ascending by chapter number, one edition per number
}

/// Presentation mode used by the rendering layer.
///
/// `Default` defers to the configured default viewer.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
pub enum ViewerKind {
    #[default]
    Default,
    LeftToRight,
    RightToLeft,
    Vertical,
    Webtoon,
}

impl ViewerKind {
    /// Resolves `Default` to the given fallback, any other kind to itself.
    pub fn or(self, fallback: ViewerKind) -> ViewerKind {
        match self {
            ViewerKind::Default => fallback,
            kind => kind,
        }
    }
}

/// On-disk container of a locally stored chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalFormat {
    Directory(PathBuf),
    Zip(PathBuf),
    Rar(PathBuf),
    Epub(PathBuf),
}

impl LocalFormat {
    pub fn path(&self) -> &PathBuf {
        match self {
            LocalFormat::Directory(path)
            | LocalFormat::Zip(path)
            | LocalFormat::Rar(path)
            | LocalFormat::Epub(path) => path,
        }
    }
}

/// Direction of an adjacent chapter relative to the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Previous,
    Next,
}
