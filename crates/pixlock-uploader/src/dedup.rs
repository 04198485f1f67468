//! Duplicate detection against already-known remote assets.
//!
//! A new asset is a duplicate of a known one when kind and title agree and
//! either the content hashes match, or the known entry predates hashing
//! and its capture time (and size, when recorded) matches instead. A match
//! in the destination collection short-circuits the upload entirely; a
//! match elsewhere is attached by reference instead of re-uploading bytes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use uuid::Uuid;

use pixlock_core::{FileKind, UploadResult};

/// One already-known remote asset, as the dedup index sees it.
#[derive(Debug, Clone)]
pub struct KnownAsset {
    pub remote_id: Uuid,
    pub collection_id: Uuid,
    pub kind: FileKind,
    pub title: String,
    /// Hex SHA-256 of the content; absent on entries uploaded before
    /// hashing existed.
    pub hash: Option<String>,
    pub creation_time: Option<DateTime<Utc>>,
    pub size: Option<u64>,
}

/// Read side consulted before every upload, write side updated after every
/// successful one.
#[async_trait]
pub trait DedupIndex: Send + Sync {
    /// All known assets with this kind and title, across collections.
    async fn find_candidates(&self, kind: FileKind, title: &str)
        -> UploadResult<Vec<KnownAsset>>;

    async fn insert(&self, asset: KnownAsset) -> UploadResult<()>;
}

/// Pick the duplicate to reuse, preferring a match already in the target
/// collection over one that would need attaching.
pub fn find_duplicate<'a>(
    candidates: &'a [KnownAsset],
    target_collection: Uuid,
    hash: &str,
    creation_time: Option<DateTime<Utc>>,
    size: u64,
) -> Option<&'a KnownAsset> {
    let mut elsewhere = None;
    for candidate in candidates.iter().filter(|c| {
        match &c.hash {
            Some(known_hash) => known_hash == hash,
            // Temporal fallback for entries without a recorded hash.
            None => {
                let times_match = matches!(
                    (c.creation_time, creation_time),
                    (Some(a), Some(b)) if a == b
                );
                times_match && c.size.map_or(true, |s| s == size)
            }
        }
    }) {
        if candidate.collection_id == target_collection {
            return Some(candidate);
        }
        elsewhere.get_or_insert(candidate);
    }
    elsewhere
}

/// Index backed by process memory. Real deployments sync this from the
/// server's file listing before a run.
#[derive(Default)]
pub struct InMemoryDedupIndex {
    entries: Mutex<Vec<KnownAsset>>,
}

impl InMemoryDedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("dedup index poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DedupIndex for InMemoryDedupIndex {
    async fn find_candidates(
        &self,
        kind: FileKind,
        title: &str,
    ) -> UploadResult<Vec<KnownAsset>> {
        let entries = self.entries.lock().expect("dedup index poisoned");
        Ok(entries
            .iter()
            .filter(|e| e.kind == kind && e.title.eq_ignore_ascii_case(title))
            .cloned()
            .collect())
    }

    async fn insert(&self, asset: KnownAsset) -> UploadResult<()> {
        self.entries
            .lock()
            .expect("dedup index poisoned")
            .push(asset);
        Ok(())
    }
}
