//! Image entry detection used by folder and archive loaders.

use std::io::Read;

use image::ImageFormat;

use crate::error::Result;
use crate::page::SNIFF_LEN;
use crate::path_utils::extension_lowercase;

/// Opens a reader over a candidate entry's bytes.
pub type EntryOpener<'a> = &'a (dyn Fn() -> Result<Box<dyn Read + Send>> + Sync);

/// Decides whether a folder or archive entry is an image page.
pub trait ImageSniffer: Send + Sync {
    /// Returns true if the entry named `name` is an image. `open` may be
    /// called to inspect the entry's content.
    fn is_image(&self, name: &str, open: EntryOpener<'_>) -> bool;
}

/// Default sniffer: trusts known image extensions and otherwise inspects the
/// leading bytes with `image::guess_format`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentSniffer;

impl ContentSniffer {
    fn sniff_content(open: EntryOpener<'_>) -> bool {
        let mut header = Vec::with_capacity(SNIFF_LEN as usize);
        let read = open().and_then(|reader| {
            reader.take(SNIFF_LEN).read_to_end(&mut header)?;
            Ok(())
        });
        read.is_ok() && image::guess_format(&header).is_ok()
    }
}

impl ImageSniffer for ContentSniffer {
    fn is_image(&self, name: &str, open: EntryOpener<'_>) -> bool {
        let by_extension = extension_lowercase(name)
            .and_then(|ext| ImageFormat::from_extension(ext))
            .is_some();
        by_extension || Self::sniff_content(open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn opener(bytes: &'static [u8]) -> impl Fn() -> Result<Box<dyn Read + Send>> + Sync {
        move || Ok(Box::new(Cursor::new(bytes)) as Box<dyn Read + Send>)
    }

    #[test]
    fn test_accepts_image_extensions() {
        let open = opener(b"");
        assert!(ContentSniffer.is_image("001.jpg", &open));
        assert!(ContentSniffer.is_image("cover.PNG", &open));
        assert!(ContentSniffer.is_image("p.webp", &open));
    }

    #[test]
    fn test_sniffs_content_without_extension() {
        let png = opener(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR");
        assert!(ContentSniffer.is_image("page_without_extension", &png));

        let xml = opener(b"<?xml version=\"1.0\"?><ComicInfo/>");
        assert!(!ContentSniffer.is_image("ComicInfo.xml", &xml));
    }
}
