//! The unit of upload: a single file or a live-photo pair.

use uuid::Uuid;

use super::{FileKind, FileTypeInfo, ParsedMetadata, UploadItem};

/// One enqueued file together with its display name.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub item: UploadItem,
    pub file_name: String,
}

#[derive(Debug, Clone)]
pub enum AssetKind {
    Single(SourceFile),
    LivePhoto { image: SourceFile, video: SourceFile },
}

/// One logical upload unit. Created by the clusterer, destroyed when the
/// orchestrator records its terminal outcome.
#[derive(Debug, Clone)]
pub struct Asset {
    /// Process-local identifier, unique for the duration of one run.
    pub local_id: Uuid,
    /// Destination collection.
    pub collection_id: Uuid,
    pub kind: AssetKind,
    /// Detected once at clustering time; never recomputed downstream.
    pub file_type: FileTypeInfo,
    /// Caller-supplied metadata that wins over every extracted source.
    pub metadata_override: Option<ParsedMetadata>,
}

impl Asset {
    pub fn single(
        collection_id: Uuid,
        file: SourceFile,
        file_type: FileTypeInfo,
        metadata_override: Option<ParsedMetadata>,
    ) -> Self {
        Self {
            local_id: Uuid::new_v4(),
            collection_id,
            kind: AssetKind::Single(file),
            file_type,
            metadata_override,
        }
    }

    pub fn live_photo(
        collection_id: Uuid,
        image: SourceFile,
        video: SourceFile,
        file_type: FileTypeInfo,
        metadata_override: Option<ParsedMetadata>,
    ) -> Self {
        Self {
            local_id: Uuid::new_v4(),
            collection_id,
            kind: AssetKind::LivePhoto { image, video },
            file_type,
            metadata_override,
        }
    }

    /// Display title: the file name, or the image sibling's name for a
    /// live photo.
    pub fn title(&self) -> &str {
        match &self.kind {
            AssetKind::Single(file) => &file.file_name,
            AssetKind::LivePhoto { image, .. } => &image.file_name,
        }
    }

    /// The item whose bytes form the primary upload body. For live photos
    /// that is the image; the video travels alongside it.
    pub fn primary(&self) -> &SourceFile {
        match &self.kind {
            AssetKind::Single(file) => file,
            AssetKind::LivePhoto { image, .. } => image,
        }
    }

    pub fn is_live_photo(&self) -> bool {
        self.file_type.kind == FileKind::LivePhoto
    }

    /// Local descriptors of every constituent item, for the mark-uploaded
    /// store.
    pub fn local_descriptors(&self) -> Vec<String> {
        match &self.kind {
            AssetKind::Single(file) => file.item.local_descriptor().into_iter().collect(),
            AssetKind::LivePhoto { image, video } => image
                .item
                .local_descriptor()
                .into_iter()
                .chain(video.item.local_descriptor())
                .collect(),
        }
    }
}
