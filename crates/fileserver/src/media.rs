//! Supported media extensions and the MIME types served for them

use std::path::Path;

/// Extensions listed and served as media
const MEDIA_EXTENSIONS: [&str; 8] = ["mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "m4v"];

/// Served when a file is not on the allow-list or has no known type
pub const FALLBACK_MIME: &str = "video/mp4";

/// Lowercased extension of `path` without the dot
pub fn extension_of(path: impl AsRef<Path>) -> Option<String> {
    path.as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Whether the file name has a supported media extension (case-insensitive)
pub fn is_supported_media(path: impl AsRef<Path>) -> bool {
    extension_of(path).is_some_and(|ext| MEDIA_EXTENSIONS.contains(&ext.as_str()))
}

/// MIME type for a media file
pub fn mime_for(path: impl AsRef<Path>) -> &'static str {
    let path = path.as_ref();
    if !is_supported_media(path) {
        return FALLBACK_MIME;
    }
    mime_guess::from_path(path).first_raw().unwrap_or(FALLBACK_MIME)
}
