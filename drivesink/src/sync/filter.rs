use std::collections::HashSet;
use std::path::Path;

/// Extensions uploaded when no allow-list is given.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "apng", "arw", "bmp", "cr2", "crw", "dng", "emf", "gif", "jfif", "jpe", "jpeg", "jpg", "mef",
    "nef", "orf", "pcx", "png", "psd", "raf", "ras", "srw", "swf", "tga", "tif", "tiff", "wmf",
];

/// Decides which local files are eligible for upload, by extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionFilter {
    allowed: HashSet<String>,
}

impl ExtensionFilter {
    pub fn images() -> Self {
        Self {
            allowed: DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
        }
    }

    /// Parses a comma-separated allow-list; a missing or empty list falls
    /// back to [`DEFAULT_EXTENSIONS`].
    pub fn from_list(list: Option<&str>) -> Self {
        let allowed: HashSet<String> = list
            .unwrap_or_default()
            .split(',')
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        if allowed.is_empty() {
            return Self::images();
        }
        Self { allowed }
    }

    pub fn allows(&self, file_name: &str) -> bool {
        self.allows_path(Path::new(file_name))
    }

    /// Checks the extension of `path`; the rest of the name may be any bytes.
    pub fn allows_path(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.allowed.contains(&ext.to_ascii_lowercase()))
    }
}

impl Default for ExtensionFilter {
    fn default() -> Self {
        Self::images()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_is_case_insensitive() {
        let filter = ExtensionFilter::from_list(Some("png,jpg"));
        assert!(filter.allows("a.PNG"));
        assert!(filter.allows("holiday.jpg"));
        assert!(!filter.allows("a.txt"));
        assert!(!filter.allows("a.jpeg"));
    }

    #[test]
    fn allow_list_entries_are_normalized() {
        let filter = ExtensionFilter::from_list(Some(" .RAW , Txt,,"));
        assert!(filter.allows("scan.raw"));
        assert!(filter.allows("notes.TXT"));
        assert!(!filter.allows("photo.png"));
    }

    #[test]
    fn defaults_to_image_formats() {
        let filter = ExtensionFilter::from_list(None);
        assert_eq!(filter, ExtensionFilter::images());
        assert!(filter.allows("IMG_0001.CR2"));
        assert!(filter.allows("scan.tiff"));
        assert!(!filter.allows("movie.mp4"));
        assert_eq!(ExtensionFilter::from_list(Some("")), ExtensionFilter::images());
    }

    #[test]
    fn files_without_extension_are_rejected() {
        let filter = ExtensionFilter::images();
        assert!(!filter.allows("png"));
        assert!(!filter.allows(".png"));
        assert!(!filter.allows("README"));
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_stems_are_judged_by_extension() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let filter = ExtensionFilter::images();
        assert!(!filter.allows_path(Path::new(OsStr::from_bytes(b"junk\xff.txt"))));
        assert!(filter.allows_path(Path::new(OsStr::from_bytes(b"shot\xff.PNG"))));
        assert!(!filter.allows_path(Path::new(OsStr::from_bytes(b"shot.\xffpng"))));
    }
}
