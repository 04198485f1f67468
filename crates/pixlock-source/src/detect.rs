//! File type detection: content sniffing with extension fallback.

use pixlock_core::{FileKind, FileTypeInfo, UploadError, UploadResult};

/// How much of the file the sniffer looks at. Every magic number we care
/// about sits well within this window.
pub const SNIFF_LEN: usize = 4096;

/// Extension fallback table for formats the sniffer misses (HEIC variants
/// inside unusual containers, raw formats with no magic, etc.).
const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "heic", "heif", "webp", "tif", "tiff", "avif", "jxl",
    "dng", "arw", "cr2", "cr3", "nef", "orf", "raf", "rw2",
];

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mov", "m4v", "avi", "mkv", "webm", "3gp", "mpg", "mpeg", "mts", "m2ts", "wmv",
];

/// Extensions we positively know are not media; these short-circuit to
/// `UnsupportedFormat` instead of a generic sniffing failure.
const UNSUPPORTED_EXTENSIONS: &[&str] = &[
    "json", "xmp", "txt", "html", "htm", "pdf", "zip", "db", "ini", "plist", "thm", "nomedia",
];

/// Classify a source from its first bytes, falling back to the filename
/// extension when sniffing fails or yields a non-media MIME.
pub fn detect_file_type(prefix: &[u8], file_name: &str) -> UploadResult<FileTypeInfo> {
    let extension = extension_of(file_name);

    if let Some(kind) = infer::get(&prefix[..prefix.len().min(SNIFF_LEN)]) {
        let mime = kind.mime_type();
        if mime.starts_with("image/") {
            return Ok(FileTypeInfo::image(
                extension.unwrap_or_else(|| kind.extension().to_string()),
                Some(mime.to_string()),
            ));
        }
        if mime.starts_with("video/") {
            return Ok(FileTypeInfo::video(
                extension.unwrap_or_else(|| kind.extension().to_string()),
                Some(mime.to_string()),
            ));
        }
        tracing::debug!(file_name, mime, "Sniffed non-media MIME, trying extension");
    }

    match extension {
        Some(ext) if IMAGE_EXTENSIONS.contains(&ext.as_str()) => {
            Ok(FileTypeInfo::image(ext, None))
        }
        Some(ext) if VIDEO_EXTENSIONS.contains(&ext.as_str()) => {
            Ok(FileTypeInfo::video(ext, None))
        }
        Some(ext) if UNSUPPORTED_EXTENSIONS.contains(&ext.as_str()) => Err(
            UploadError::UnsupportedFormat(format!("{file_name}: .{ext} is not a media file")),
        ),
        // Unknown is not the same as known-non-media: surface these as
        // detection failures so they are reported, not silently skipped.
        Some(ext) => Err(UploadError::Source(format!(
            "{file_name}: could not sniff content and .{ext} is unknown"
        ))),
        None => Err(UploadError::Source(format!(
            "{file_name}: could not sniff content and file has no extension"
        ))),
    }
}

pub(crate) fn extension_of(file_name: &str) -> Option<String> {
    let ext = file_name.rsplit_once('.')?.1;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_ascii_lowercase())
    }
}
