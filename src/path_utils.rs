//! Path and entry-name utilities.
//!
//! Helpers for turning paths and archive entry names into display strings,
//! ordering entries the way a reader expects (natural, case-insensitive) and
//! building filesystem-safe folder names.

use std::cmp::Ordering;
use std::path::Path;

/// Gets the file name from a path with fallback to lossy conversion.
///
/// # Arguments
///
/// * `path` - The path to extract the file name from
///
/// # Returns
///
/// * `String` - The file name, using lossy conversion if necessary
pub fn get_file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Converts a path to a string with fallback to lossy conversion.
pub fn path_to_string_lossy(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Checks if a filename starts with a dot (hidden file) using safe conversion.
pub fn is_hidden_file(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

/// Lowercased extension of a file or archive entry name.
pub fn extension_lowercase(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}

/// Compares two entry names naturally and case-insensitively.
///
/// Embedded digit runs compare by value, so `page2` sorts before `page10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    natord::compare_ignore_case(a, b)
}

/// Sorts items in place by the natural order of the name returned by `key`.
pub fn sort_naturally<T, F>(items: &mut [T], key: F)
where
    F: Fn(&T) -> &str,
{
    items.sort_by(|a, b| natural_cmp(key(a), key(b)));
}

/// Sanitizes a filename by replacing invalid characters with safe alternatives.
///
/// # Arguments
///
/// * `filename` - The filename to sanitize
///
/// # Returns
///
/// * `String` - The sanitized filename
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | '"' | '|' | '?' | '*' => '-',
            ':' => '-',
            '/' | '\\' => '-',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_get_file_name_lossy() {
        let path = Path::new("chapter/page_001.jpg");
        assert_eq!(get_file_name_lossy(path), "page_001.jpg");
        assert_eq!(get_file_name_lossy(Path::new("")), "unknown");
    }

    #[test]
    fn test_is_hidden_file() {
        assert!(is_hidden_file(Path::new(".nomedia")));
        assert!(!is_hidden_file(Path::new("001.png")));
    }

    #[test]
    fn test_extension_lowercase() {
        assert_eq!(extension_lowercase("Page01.JPG").as_deref(), Some("jpg"));
        assert_eq!(extension_lowercase("folder/archive.cbz").as_deref(), Some("cbz"));
        assert_eq!(extension_lowercase("README"), None);
    }

    #[test]
    fn test_natural_cmp() {
        assert_eq!(natural_cmp("page2.jpg", "page10.jpg"), Ordering::Less);
        assert_eq!(natural_cmp("Page2.jpg", "page10.jpg"), Ordering::Less);
        assert_eq!(natural_cmp("page10.jpg", "page9.jpg"), Ordering::Greater);

        let mut names = vec!["page10.jpg", "PAGE1.jpg", "page2.jpg"];
        sort_naturally(&mut names, |name| *name);
        assert_eq!(names, vec!["PAGE1.jpg", "page2.jpg", "page10.jpg"]);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Vol.1 Ch.3: Start"), "Vol.1 Ch.3- Start");
        assert_eq!(sanitize_filename("a/b\\c"), "a-b-c");
        assert_eq!(sanitize_filename("What?*"), "What--");
        assert_eq!(sanitize_filename("normal name"), "normal name");
    }
}
