//! Detected file type, derived once per asset and cached.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Image,
    Video,
    LivePhoto,
}

/// Type information for one asset. For live photos `extension` is the image
/// sibling's extension and `video_extension` the video's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTypeInfo {
    pub kind: FileKind,
    pub extension: String,
    pub mime: Option<String>,
    pub video_extension: Option<String>,
}

impl FileTypeInfo {
    pub fn image(extension: impl Into<String>, mime: Option<String>) -> Self {
        Self {
            kind: FileKind::Image,
            extension: extension.into(),
            mime,
            video_extension: None,
        }
    }

    pub fn video(extension: impl Into<String>, mime: Option<String>) -> Self {
        Self {
            kind: FileKind::Video,
            extension: extension.into(),
            mime,
            video_extension: None,
        }
    }

    pub fn live_photo(image_extension: impl Into<String>, video_extension: impl Into<String>) -> Self {
        Self {
            kind: FileKind::LivePhoto,
            extension: image_extension.into(),
            mime: None,
            video_extension: Some(video_extension.into()),
        }
    }
}
