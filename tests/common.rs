//! Common test utilities for the yomikomi crate.
//!
//! Provides test directory setup, image and archive fixtures, and in-memory
//! implementations of the collaborators a reading session needs.

use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};
use rand::{Rng, distributions::Alphanumeric};
use std::collections::HashSet;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::fs;
use yomikomi::error::{Error, Result};
use yomikomi::prelude::*;
use yomikomi::sniffer::EntryOpener;
use yomikomi::source::ProgressFn;
use zip::write::SimpleFileOptions;

#[allow(dead_code)]
pub const TEST_TMP_DIR: &str = "tests/tmp";
#[allow(dead_code)]
pub const TEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Folders of one test: `library` holds local chapters, `downloads` the
/// download index and `cache` the remote image cache.
#[allow(dead_code)]
pub struct TestDirs {
    pub base: PathBuf,
    pub library: PathBuf,
    pub downloads: PathBuf,
    pub cache: PathBuf,
}

/// Creates a clean, uniquely named test directory.
#[allow(dead_code)]
pub async fn setup_test_dirs(sub_path: &str) -> TestDirs {
    let _ = env_logger::builder().is_test(true).try_init();

    let rand_string: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let base = PathBuf::from(TEST_TMP_DIR).join(format!("{}-{}", sub_path, rand_string));
    if base.exists() {
        fs::remove_dir_all(&base).await.unwrap();
    }

    let dirs = TestDirs {
        library: base.join("library"),
        downloads: base.join("downloads"),
        cache: base.join("cache"),
        base,
    };
    fs::create_dir_all(&dirs.library).await.unwrap();
    fs::create_dir_all(&dirs.downloads).await.unwrap();
    dirs
}

/// Encodes a solid image of `width` x 8 pixels. The width identifies the
/// image once it comes back out of a loader.
#[allow(dead_code)]
pub fn image_bytes(width: u32, format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, 8, Rgb([200, 40, 40]));
    let mut bytes = Cursor::new(Vec::new());
    img.write_to(&mut bytes, format).unwrap();
    bytes.into_inner()
}

/// Writes a PNG of the given width at `path`.
#[allow(dead_code)]
pub async fn create_image(path: &Path, width: u32) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.unwrap();
    }
    fs::write(path, image_bytes(width, ImageFormat::Png))
        .await
        .unwrap();
}

/// Writes a ZIP archive containing the given entries. Names ending with `/`
/// become directory entries.
#[allow(dead_code)]
pub fn create_zip(path: &Path, entries: &[(&str, Vec<u8>)]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    for (name, bytes) in entries {
        if name.ends_with('/') {
            zip.add_directory(*name, options).unwrap();
        } else {
            zip.start_file(*name, options).unwrap();
            zip.write_all(bytes).unwrap();
        }
    }
    zip.finish().unwrap();
}

/// A CBZ with `pages` PNG entries named `001.png`, `002.png`, ...
#[allow(dead_code)]
pub fn create_cbz(path: &Path, pages: usize) {
    let entries: Vec<(String, Vec<u8>)> = (1..=pages)
        .map(|n| (format!("{:03}.png", n), image_bytes(n as u32, ImageFormat::Png)))
        .collect();
    let borrowed: Vec<(&str, Vec<u8>)> = entries
        .iter()
        .map(|(name, bytes)| (name.as_str(), bytes.clone()))
        .collect();
    create_zip(path, &borrowed);
}

/// Reads a page's bytes and returns the decoded image width.
#[allow(dead_code)]
pub fn page_width(page: &Page) -> u32 {
    let mut bytes = Vec::new();
    page.open_stream()
        .unwrap()
        .read_to_end(&mut bytes)
        .unwrap();
    image::load_from_memory(&bytes).unwrap().width()
}

#[allow(dead_code)]
pub fn manga(source: i64, sorting: ChapterSorting) -> Manga {
    Manga {
        id: 1,
        source,
        title: "Test Manga".to_string(),
        url: "/manga/1".to_string(),
        viewer: ViewerKind::Default,
        sorting,
    }
}

#[allow(dead_code)]
pub fn chapter(id: i64, url: &str) -> Chapter {
    Chapter {
        id,
        manga_id: 1,
        url: url.to_string(),
        name: format!("Chapter {}", id),
        chapter_number: id as f32,
        ..Default::default()
    }
}

#[allow(dead_code)]
pub fn config(dirs: &TestDirs) -> ReaderConfig {
    config_with_loads(dirs, 4)
}

#[allow(dead_code)]
pub fn config_with_loads(dirs: &TestDirs, max_concurrent_loads: usize) -> ReaderConfig {
    ReaderConfig::builder()
        .cache_dir(dirs.cache.clone())
        .max_concurrent_loads(max_concurrent_loads)
        .build()
        .unwrap()
}

/// Path of a committed test archive under `tests/fixtures`.
#[allow(dead_code)]
pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Polls `condition` until it holds.
#[allow(dead_code)]
pub async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(TEST_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Condition never held")
}

/// Chapter storage kept in memory. Records every persisted progress.
#[derive(Default)]
#[allow(dead_code)]
pub struct MemoryRepository {
    chapters: Mutex<Vec<Chapter>>,
    persisted: Mutex<Vec<(i64, usize, bool)>>,
}

#[allow(dead_code)]
impl MemoryRepository {
    pub fn new(chapters: Vec<Chapter>) -> Self {
        Self {
            chapters: Mutex::new(chapters),
            persisted: Mutex::new(Vec::new()),
        }
    }

    pub fn persisted(&self) -> Vec<(i64, usize, bool)> {
        self.persisted.lock().unwrap().clone()
    }

    /// Waits until progress of `chapter_id` has been persisted.
    pub async fn wait_persisted(&self, chapter_id: i64) -> (i64, usize, bool) {
        tokio::time::timeout(TEST_TIMEOUT, async {
            loop {
                let found = self
                    .persisted()
                    .into_iter()
                    .rev()
                    .find(|(id, _, _)| *id == chapter_id);
                if let Some(found) = found {
                    return found;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Progress was never persisted")
    }
}

#[async_trait]
impl ChapterRepository for MemoryRepository {
    async fn chapters(&self, _manga: &Manga) -> Result<Vec<Chapter>> {
        Ok(self.chapters.lock().unwrap().clone())
    }

    async fn persist(&self, chapter_id: i64, last_page_read: usize, read: bool) -> Result<()> {
        self.persisted
            .lock()
            .unwrap()
            .push((chapter_id, last_page_read, read));
        Ok(())
    }
}

/// Source manager serving one source for every id.
#[allow(dead_code)]
pub struct FixedSources(pub Source);

impl SourceManager for FixedSources {
    fn get_or_stub(&self, _source_id: i64) -> Source {
        self.0.clone()
    }
}

/// Download index without any downloaded chapter.
#[allow(dead_code)]
pub struct NoDownloads;

#[async_trait]
impl DownloadIndex for NoDownloads {
    fn is_chapter_fully_downloaded(&self, _chapter: &Chapter, _manga: &Manga) -> bool {
        false
    }

    async fn build_page_list(
        &self,
        _source: &Source,
        _manga: &Manga,
        _chapter: &Chapter,
    ) -> Result<Vec<Arc<Page>>> {
        Err(Error::Other("Chapter is not downloaded".to_string()))
    }
}

/// Content sniffer counting how many entries it inspected.
#[derive(Default)]
#[allow(dead_code)]
pub struct CountingSniffer {
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl CountingSniffer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ImageSniffer for CountingSniffer {
    fn is_image(&self, name: &str, open: EntryOpener<'_>) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ContentSniffer.is_image(name, open)
    }
}

/// Remote source serving `pages` PNG pages per chapter.
///
/// Image urls listed in `failing` fail once, then succeed.
#[allow(dead_code)]
pub struct FakeRemote {
    pub id: i64,
    pub pages: usize,
    pub listing_delay: Duration,
    pub image_delay: Duration,
    pub listed_image_urls: bool,
    listings: AtomicUsize,
    resolutions: AtomicUsize,
    downloads: AtomicUsize,
    failing: Mutex<HashSet<String>>,
}

#[allow(dead_code)]
impl FakeRemote {
    pub fn new(id: i64, pages: usize) -> Self {
        Self {
            id,
            pages,
            listing_delay: Duration::ZERO,
            image_delay: Duration::ZERO,
            listed_image_urls: false,
            listings: AtomicUsize::new(0),
            resolutions: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_listing_delay(mut self, delay: Duration) -> Self {
        self.listing_delay = delay;
        self
    }

    pub fn with_image_delay(mut self, delay: Duration) -> Self {
        self.image_delay = delay;
        self
    }

    /// Lists pages with their image url already known.
    pub fn with_listed_image_urls(mut self) -> Self {
        self.listed_image_urls = true;
        self
    }

    pub fn fail_once(self, image_url: &str) -> Self {
        self.failing.lock().unwrap().insert(image_url.to_string());
        self
    }

    pub fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }

    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteSource for FakeRemote {
    fn id(&self) -> i64 {
        self.id
    }

    async fn fetch_page_list(&self, chapter: &Chapter) -> Result<Vec<RemotePage>> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        if !self.listing_delay.is_zero() {
            tokio::time::sleep(self.listing_delay).await;
        }
        Ok((0..self.pages)
            .map(|index| RemotePage {
                url: format!("{}/page/{}", chapter.url, index),
                image_url: self
                    .listed_image_urls
                    .then(|| format!("{}/img/{}", chapter.url, index)),
            })
            .collect())
    }

    async fn fetch_image_url(&self, page: &RemotePage) -> Result<String> {
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        Ok(page.url.replace("/page/", "/img/"))
    }

    async fn fetch_image(&self, image_url: &str, progress: ProgressFn<'_>) -> Result<Vec<u8>> {
        if self.failing.lock().unwrap().remove(image_url) {
            return Err(Error::Network(format!("Connection reset: {}", image_url)));
        }
        self.downloads.fetch_add(1, Ordering::SeqCst);
        progress(50);
        if !self.image_delay.is_zero() {
            tokio::time::sleep(self.image_delay).await;
        }
        let index: u32 = image_url
            .rsplit('/')
            .next()
            .and_then(|index| index.parse().ok())
            .unwrap_or(0);
        progress(100);
        Ok(image_bytes(index + 1, ImageFormat::Png))
    }
}
