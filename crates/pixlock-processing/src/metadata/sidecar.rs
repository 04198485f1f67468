//! Sidecar (takeout) metadata store.
//!
//! Sidecar JSON files are parsed in a pre-pass and registered here keyed by
//! (collection, canonicalized filename). Lookups try the exact name first,
//! then two fallbacks that mirror how exports mangle names: stripping an
//! `-edited` suffix to match the original, and clipping to 46 characters to
//! match truncated-export naming.

use std::collections::HashMap;
use uuid::Uuid;

use pixlock_core::SidecarEntry;

/// Exports truncate long original filenames to this many characters when
/// deriving the sidecar's name.
const CLIPPED_NAME_LEN: usize = 46;

#[derive(Debug, Default)]
pub struct SidecarStore {
    entries: HashMap<(Uuid, String), SidecarEntry>,
}

impl SidecarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parsed sidecar document under the media filename it
    /// describes. `sidecar_file_name` is the JSON file's own name; the
    /// trailing `.json` is stripped to recover the media name. The entry's
    /// embedded title, when present and different, is registered too.
    pub fn register(
        &mut self,
        collection_id: Uuid,
        sidecar_file_name: &str,
        entry: SidecarEntry,
    ) {
        let media_name = sidecar_file_name
            .strip_suffix(".json")
            .unwrap_or(sidecar_file_name);
        if let Some(title) = entry.title.clone() {
            if !title.eq_ignore_ascii_case(media_name) {
                self.entries
                    .insert((collection_id, canonical(&title)), entry.clone());
            }
        }
        self.entries
            .insert((collection_id, canonical(media_name)), entry);
    }

    /// Look up the sidecar entry for a media file, applying the `-edited`
    /// and clipped-name fallbacks.
    pub fn lookup(&self, collection_id: Uuid, file_name: &str) -> Option<&SidecarEntry> {
        let name = canonical(file_name);
        if let Some(entry) = self.entries.get(&(collection_id, name.clone())) {
            return Some(entry);
        }
        if let Some(original) = strip_edited_suffix(&name) {
            if let Some(entry) = self.entries.get(&(collection_id, original)) {
                return Some(entry);
            }
        }
        if name.chars().count() > CLIPPED_NAME_LEN {
            let clipped: String = name.chars().take(CLIPPED_NAME_LEN).collect();
            if let Some(entry) = self.entries.get(&(collection_id, clipped)) {
                return Some(entry);
            }
        }
        None
    }

    pub fn contains(&self, collection_id: Uuid, file_name: &str) -> bool {
        self.lookup(collection_id, file_name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn canonical(name: &str) -> String {
    name.to_lowercase()
}

/// `IMG_0001-edited.jpg` matches the sidecar of `IMG_0001.jpg`.
fn strip_edited_suffix(name: &str) -> Option<String> {
    let (base, ext) = name.rsplit_once('.')?;
    let base = base.strip_suffix("-edited")?;
    Some(format!("{base}.{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_with_time(ts: &str) -> SidecarEntry {
        SidecarEntry::parse(&format!(
            r#"{{"photoTakenTime": {{"timestamp": "{ts}"}}}}"#
        ))
        .unwrap()
    }

    #[test]
    fn exact_lookup_after_register() {
        let col = Uuid::new_v4();
        let mut store = SidecarStore::new();
        store.register(col, "IMG_0001.HEIC.json", entry_with_time("1621837411"));

        let entry = store.lookup(col, "IMG_0001.HEIC").unwrap();
        assert_eq!(entry.taken_time().unwrap().timestamp(), 1621837411);
        // Different collection sees nothing.
        assert!(store.lookup(Uuid::new_v4(), "IMG_0001.HEIC").is_none());
    }

    #[test]
    fn edited_suffix_falls_back_to_original() {
        let col = Uuid::new_v4();
        let mut store = SidecarStore::new();
        store.register(col, "IMG_0002.jpg.json", entry_with_time("1500000000"));
        assert!(store.lookup(col, "IMG_0002-edited.jpg").is_some());
    }

    #[test]
    fn long_names_fall_back_to_clipped_key() {
        let col = Uuid::new_v4();
        let long_name = "a_very_long_filename_from_some_camera_export_somewhere_2021.jpg";
        let clipped: String = long_name.chars().take(CLIPPED_NAME_LEN).collect();
        let mut store = SidecarStore::new();
        store.register(col, &format!("{clipped}.json"), entry_with_time("1600000000"));
        assert!(store.lookup(col, long_name).is_some());
    }

    #[test]
    fn title_is_registered_as_alternate_key() {
        let col = Uuid::new_v4();
        let json = r#"{"title": "Original Name.jpg", "photoTakenTime": {"timestamp": "1"}}"#;
        let mut store = SidecarStore::new();
        store.register(col, "renamed(1).jpg.json", SidecarEntry::parse(json).unwrap());
        assert!(store.lookup(col, "Original Name.jpg").is_some());
        assert!(store.lookup(col, "renamed(1).jpg").is_some());
    }
}
