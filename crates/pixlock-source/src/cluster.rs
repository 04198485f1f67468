//! Live-photo clustering.
//!
//! A single greedy left-to-right pass over candidates sorted by
//! (collection, base name): adjacent image+video siblings with matching
//! names become one live-photo asset, everything else passes through as a
//! single-item asset. A file is consumed by at most one pairing and the
//! first valid pairing wins; this is not a global optimal matching.

use chrono::Duration;
use uuid::Uuid;

use pixlock_core::{Asset, FileKind, FileTypeInfo, ParsedMetadata, SourceFile};

use crate::detect::extension_of;

/// Siblings above this size are never clustered: real live-photo videos
/// are short, and the archival path cannot stream pair containers.
pub const LIVE_PHOTO_MAX_BYTES: u64 = 20 * 1024 * 1024;

/// Capture-time tolerance for the sidecar-consistency carve-out. Live
/// photo timestamps frequently differ by timezone-offset ambiguity, which
/// is why this is a day and not minutes.
const CAPTURE_TIME_TOLERANCE_HOURS: i64 = 24;

/// Vendor suffixes appended to one sibling's base name by various export
/// pipelines.
const VENDOR_SUFFIXES: &[&str] = &["_3", "_hvec"];

/// One item as seen by the clusterer: the file plus the cheap facts the
/// pairing heuristics need. Capture time and sidecar presence come from
/// whatever source the caller already has (sidecar store, filename date).
#[derive(Debug, Clone)]
pub struct ClusterCandidate {
    pub file: SourceFile,
    pub collection_id: Uuid,
    pub size: u64,
    pub file_type: FileTypeInfo,
    pub capture_time: Option<chrono::DateTime<chrono::Utc>>,
    pub has_sidecar: bool,
    pub metadata_override: Option<ParsedMetadata>,
}

impl ClusterCandidate {
    fn base_name(&self) -> String {
        let name = self.file.file_name.to_ascii_lowercase();
        match name.rsplit_once('.') {
            Some((base, _)) => base.to_string(),
            None => name,
        }
    }
}

/// Cluster a batch of typed candidates into upload assets.
pub fn cluster_assets(mut candidates: Vec<ClusterCandidate>) -> Vec<Asset> {
    candidates.sort_by(|a, b| {
        (a.collection_id, a.base_name(), &a.file.file_name).cmp(&(
            b.collection_id,
            b.base_name(),
            &b.file.file_name,
        ))
    });

    let mut assets = Vec::with_capacity(candidates.len());
    let mut iter = candidates.into_iter().peekable();
    while let Some(current) = iter.next() {
        let paired = iter
            .peek()
            .map_or(false, |next| is_live_pair(&current, next));
        if let Some(next) = if paired { iter.next() } else { None } {
            let (image, video) = if current.file_type.kind == FileKind::Image {
                (current, next)
            } else {
                (next, current)
            };
            tracing::debug!(
                image = %image.file.file_name,
                video = %video.file.file_name,
                "Clustered live photo pair"
            );
            let file_type = FileTypeInfo::live_photo(
                image.file_type.extension.clone(),
                video.file_type.extension.clone(),
            );
            let metadata_override = image
                .metadata_override
                .clone()
                .or(video.metadata_override.clone());
            assets.push(Asset::live_photo(
                image.collection_id,
                image.file,
                video.file,
                file_type,
                metadata_override,
            ));
        } else {
            assets.push(Asset::single(
                current.collection_id,
                current.file,
                current.file_type.clone(),
                current.metadata_override,
            ));
        }
    }
    assets
}

fn is_live_pair(a: &ClusterCandidate, b: &ClusterCandidate) -> bool {
    if a.collection_id != b.collection_id {
        return false;
    }
    let kinds = (a.file_type.kind, b.file_type.kind);
    if kinds != (FileKind::Image, FileKind::Video) && kinds != (FileKind::Video, FileKind::Image) {
        return false;
    }
    if a.size > LIVE_PHOTO_MAX_BYTES || b.size > LIVE_PHOTO_MAX_BYTES {
        return false;
    }
    if normalized_base(a, b) != normalized_base(b, a) {
        return false;
    }
    // Sidecar metadata should be present on both siblings or neither;
    // close capture times excuse the asymmetry. Heuristic, not a
    // guarantee.
    if a.has_sidecar != b.has_sidecar && !capture_times_close(a, b) {
        return false;
    }
    true
}

fn capture_times_close(a: &ClusterCandidate, b: &ClusterCandidate) -> bool {
    match (a.capture_time, b.capture_time) {
        (Some(ta), Some(tb)) => {
            (ta - tb).abs() <= Duration::hours(CAPTURE_TIME_TOLERANCE_HOURS)
        }
        _ => false,
    }
}

/// Base name with vendor suffixes and the sibling's extension-as-suffix
/// stripped.
fn normalized_base(item: &ClusterCandidate, sibling: &ClusterCandidate) -> String {
    let base = item.base_name();
    let sibling_ext_suffix = extension_of(&sibling.file.file_name)
        .map(|ext| format!("_{ext}"))
        .unwrap_or_default();
    for suffix in VENDOR_SUFFIXES
        .iter()
        .copied()
        .chain(std::iter::once(sibling_ext_suffix.as_str()))
    {
        if !suffix.is_empty() && suffix != "_" {
            if let Some(stripped) = base.strip_suffix(suffix) {
                return stripped.to_string();
            }
        }
    }
    base
}
