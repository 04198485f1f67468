//! Run intake: sidecar pre-pass, type detection and clustering.
//!
//! Sidecar JSON files are parsed first so their metadata is in place when
//! the media files are examined. Media files are sniffed, statted and
//! clustered into assets; files rejected at this stage get their terminal
//! outcome here and never enter the queue.

use uuid::Uuid;

use pixlock_core::{
    Asset, ParsedMetadata, SourceFile, UploadError, UploadItem, UploadOutcome,
};
use pixlock_processing::metadata::filename::parse_filename_date;
use pixlock_processing::SidecarStore;
use pixlock_source::{cluster_assets, detect_file_type, ClusterCandidate, SNIFF_LEN};

/// One file handed to the uploader by the caller.
#[derive(Debug, Clone)]
pub struct EnqueuedFile {
    pub item: UploadItem,
    pub file_name: String,
    pub collection_id: Uuid,
    /// Caller-supplied metadata that outranks every extracted source.
    pub metadata_override: Option<ParsedMetadata>,
}

/// A file that reached a terminal outcome before entering the queue.
#[derive(Debug)]
pub struct RejectedFile {
    pub file_name: String,
    pub collection_id: Uuid,
    pub outcome: UploadOutcome,
}

pub struct Intake {
    pub assets: Vec<Asset>,
    pub sidecars: SidecarStore,
    pub rejected: Vec<RejectedFile>,
}

/// Partition enqueued files into sidecars and media, and cluster the media
/// into upload assets. Per-file problems reject that file only.
pub async fn prepare(files: Vec<EnqueuedFile>) -> Intake {
    let (sidecar_files, media_files): (Vec<_>, Vec<_>) = files
        .into_iter()
        .partition(|f| f.file_name.to_ascii_lowercase().ends_with(".json"));

    let mut sidecars = SidecarStore::new();
    for file in sidecar_files {
        match read_sidecar(&file).await {
            Ok(entry) => sidecars.register(file.collection_id, &file.file_name, entry),
            Err(e) => {
                // Classification failures degrade; the media file will fall
                // back to its other metadata sources.
                tracing::warn!(
                    file_name = %file.file_name,
                    error = %e,
                    "Skipping unreadable sidecar"
                );
            }
        }
    }

    let mut candidates = Vec::with_capacity(media_files.len());
    let mut rejected = Vec::new();
    for file in media_files {
        match examine(&file, &sidecars).await {
            Ok(candidate) => candidates.push(candidate),
            Err(e) => {
                let outcome = match e {
                    UploadError::UnsupportedFormat(reason) => {
                        tracing::info!(file_name = %file.file_name, %reason, "Unsupported file");
                        UploadOutcome::Unsupported
                    }
                    other => UploadOutcome::Failed {
                        reason: other.to_string(),
                    },
                };
                rejected.push(RejectedFile {
                    file_name: file.file_name,
                    collection_id: file.collection_id,
                    outcome,
                });
            }
        }
    }

    Intake {
        assets: cluster_assets(candidates),
        sidecars,
        rejected,
    }
}

async fn read_sidecar(file: &EnqueuedFile) -> Result<pixlock_core::SidecarEntry, UploadError> {
    let source = pixlock_source::open_source(&file.item).await?;
    let raw = source.stream.collect().await?;
    let text = std::str::from_utf8(&raw)
        .map_err(|e| UploadError::Source(format!("sidecar is not UTF-8: {e}")))?;
    Ok(pixlock_core::SidecarEntry::parse(text)?)
}

async fn examine(
    file: &EnqueuedFile,
    sidecars: &SidecarStore,
) -> Result<ClusterCandidate, UploadError> {
    let prefix = pixlock_source::read_prefix(&file.item, SNIFF_LEN).await?;
    let file_type = detect_file_type(&prefix, &file.file_name)?;
    let stat = pixlock_source::stat_source(&file.item).await?;

    let sidecar_entry = sidecars.lookup(file.collection_id, &file.file_name);
    let capture_time = sidecar_entry
        .and_then(|entry| entry.taken_time())
        .or_else(|| parse_filename_date(&file.file_name));

    Ok(ClusterCandidate {
        file: SourceFile {
            item: file.item.clone(),
            file_name: file.file_name.clone(),
        },
        collection_id: file.collection_id,
        size: stat.size,
        file_type,
        capture_time,
        has_sidecar: sidecar_entry.is_some(),
        metadata_override: file.metadata_override.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Utc;

    const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46];

    fn memory_file(name: &str, data: &[u8], collection: Uuid) -> EnqueuedFile {
        EnqueuedFile {
            item: UploadItem::Memory {
                data: Bytes::copy_from_slice(data),
                last_modified: Utc::now(),
            },
            file_name: name.to_string(),
            collection_id: collection,
            metadata_override: None,
        }
    }

    #[tokio::test]
    async fn sidecars_feed_the_store_and_media_becomes_assets() {
        let col = Uuid::new_v4();
        let sidecar_json = br#"{"photoTakenTime": {"timestamp": "1621837411"}}"#;

        let intake = prepare(vec![
            memory_file("IMG_0001.jpg.json", sidecar_json, col),
            memory_file("IMG_0001.jpg", JPEG_MAGIC, col),
        ])
        .await;

        assert_eq!(intake.assets.len(), 1);
        assert_eq!(intake.assets[0].title(), "IMG_0001.jpg");
        assert!(intake.rejected.is_empty());
        assert!(intake.sidecars.contains(col, "IMG_0001.jpg"));
    }

    #[tokio::test]
    async fn unsupported_files_are_rejected_up_front() {
        let col = Uuid::new_v4();
        let intake = prepare(vec![
            memory_file("notes.txt", b"hello", col),
            memory_file("IMG_0002.jpg", JPEG_MAGIC, col),
        ])
        .await;

        assert_eq!(intake.assets.len(), 1);
        assert_eq!(intake.rejected.len(), 1);
        assert_eq!(intake.rejected[0].outcome, UploadOutcome::Unsupported);
        assert_eq!(intake.rejected[0].file_name, "notes.txt");
    }

    #[tokio::test]
    async fn unknown_content_fails_rather_than_skipping_as_unsupported() {
        let col = Uuid::new_v4();
        let intake = prepare(vec![memory_file("mystery.qqq", &[0u8; 16], col)]).await;

        assert_eq!(intake.rejected.len(), 1);
        assert!(matches!(
            intake.rejected[0].outcome,
            UploadOutcome::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn malformed_sidecar_degrades_to_no_metadata() {
        let col = Uuid::new_v4();
        let intake = prepare(vec![
            memory_file("IMG_0003.jpg.json", b"{not json", col),
            memory_file("IMG_0003.jpg", JPEG_MAGIC, col),
        ])
        .await;

        assert_eq!(intake.assets.len(), 1);
        assert!(intake.rejected.is_empty());
        assert!(!intake.sidecars.contains(col, "IMG_0003.jpg"));
    }

    #[tokio::test]
    async fn live_pair_clusters_during_intake() {
        let col = Uuid::new_v4();
        let intake = prepare(vec![
            memory_file("IMG_0004.heic", &[0u8; 32], col),
            memory_file("IMG_0004.mp4", &[0u8; 32], col),
        ])
        .await;

        assert_eq!(intake.assets.len(), 1);
        assert!(intake.assets[0].is_live_photo());
    }
}
