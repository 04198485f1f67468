//! The four physical representations of "a file" accepted for upload.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// A reference to the physical bytes of one file.
///
/// Exactly one shape is active; everything downstream reads the bytes
/// through the source reader, which is the only place allowed to match on
/// the variants. Created at enqueue time, consumed once, never mutated.
#[derive(Debug, Clone)]
pub enum UploadItem {
    /// Bytes already in memory (e.g. handed over by a share extension).
    Memory {
        data: Bytes,
        last_modified: DateTime<Utc>,
    },
    /// In-memory bytes that also exist at a local path.
    MemoryWithPath {
        data: Bytes,
        path: PathBuf,
        last_modified: DateTime<Utc>,
    },
    /// A bare local path, streamed from disk.
    Path(PathBuf),
    /// One entry inside a local zip archive.
    ZipEntry { archive: PathBuf, entry: String },
}

impl UploadItem {
    /// Size in bytes if it is knowable without touching the filesystem.
    pub fn in_memory_size(&self) -> Option<u64> {
        match self {
            UploadItem::Memory { data, .. } | UploadItem::MemoryWithPath { data, .. } => {
                Some(data.len() as u64)
            }
            _ => None,
        }
    }

    /// A stable descriptor of the local origin, used by the mark-uploaded
    /// store to support resuming an interrupted run.
    pub fn local_descriptor(&self) -> Option<String> {
        match self {
            UploadItem::Memory { .. } => None,
            UploadItem::MemoryWithPath { path, .. } | UploadItem::Path(path) => {
                Some(path.to_string_lossy().into_owned())
            }
            UploadItem::ZipEntry { archive, entry } => {
                Some(format!("{}::{}", archive.to_string_lossy(), entry))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_entry_descriptor_includes_both_parts() {
        let item = UploadItem::ZipEntry {
            archive: PathBuf::from("/backups/takeout.zip"),
            entry: "Photos/IMG_0001.jpg".to_string(),
        };
        assert_eq!(
            item.local_descriptor().unwrap(),
            "/backups/takeout.zip::Photos/IMG_0001.jpg"
        );
    }

    #[test]
    fn memory_item_has_no_descriptor() {
        let item = UploadItem::Memory {
            data: Bytes::from_static(b"abc"),
            last_modified: Utc::now(),
        };
        assert!(item.local_descriptor().is_none());
        assert_eq!(item.in_memory_size(), Some(3));
    }
}
