//! Path utilities for detecting file types by extension.
//!
//! Video sources get a seek before frame extraction, image sources do not,
//! so the extension lists decide how a thumbnail is produced.

use std::path::Path;

/// List of supported video file extensions.
const VIDEO_EXTENSIONS: &[&str] = &[
    "3g2", "3gp", "asf", "avi", "flv", "m2ts", "m2v", "m4v", "mkv", "mov", "mp4", "mpe", "mpeg",
    "mpg", "mts", "mxf", "ogv", "ts", "vob", "webm", "wmv",
];

/// List of supported image file extensions.
const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "heic", "heif", "avif",
];

fn has_extension(path: &Path, list: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| list.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Check if a path has a video file extension.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use derivforge_common::paths::is_video_file;
///
/// assert!(is_video_file(Path::new("movie.mkv")));
/// assert!(is_video_file(Path::new("/path/to/video.MP4")));
/// assert!(!is_video_file(Path::new("poster.jpg")));
/// ```
pub fn is_video_file(path: &Path) -> bool {
    has_extension(path, VIDEO_EXTENSIONS)
}

/// Check if a path has an image file extension.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use derivforge_common::paths::is_image_file;
///
/// assert!(is_image_file(Path::new("poster.jpg")));
/// assert!(!is_image_file(Path::new("video.mkv")));
/// ```
pub fn is_image_file(path: &Path) -> bool {
    has_extension(path, IMAGE_EXTENSIONS)
}

/// Normalize a share-relative path.
///
/// Rejects absolute paths, backslashes, and `..` components. Empty and `.`
/// components are dropped. Returns `None` when nothing usable remains.
///
/// # Examples
///
/// ```
/// use derivforge_common::paths::safe_rel_path;
///
/// assert_eq!(safe_rel_path("a//b.mp4").as_deref(), Some("a/b.mp4"));
/// assert_eq!(safe_rel_path("../secret"), None);
/// ```
pub fn safe_rel_path(value: &str) -> Option<String> {
    if value.starts_with('/') || value.contains('\\') {
        return None;
    }
    let parts: Vec<&str> = value
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();
    if parts.is_empty() || parts.contains(&"..") {
        return None;
    }
    Some(parts.join("/"))
}
