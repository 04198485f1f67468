//! Parsed metadata and the sidecar (takeout-style) JSON format.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// Metadata for one asset, merged from sidecar JSON, embedded EXIF,
/// filename heuristics and the filesystem, in that order of precedence.
/// The content hash is always computed from the bytes, independent of the
/// other sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedMetadata {
    pub creation_time: Option<DateTime<Utc>>,
    pub modification_time: Option<DateTime<Utc>>,
    pub location: Option<Location>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Hex-encoded SHA-256 of the file content.
    pub hash: Option<String>,
}

impl ParsedMetadata {
    /// Fill every empty field of `self` from `other`. Fields already set
    /// keep their value, which makes a left-to-right fold over providers
    /// implement first-non-empty-wins.
    pub fn fill_missing_from(&mut self, other: &ParsedMetadata) {
        if self.creation_time.is_none() {
            self.creation_time = other.creation_time;
        }
        if self.modification_time.is_none() {
            self.modification_time = other.modification_time;
        }
        if self.location.is_none() {
            self.location = other.location;
        }
        if self.width.is_none() {
            self.width = other.width;
        }
        if self.height.is_none() {
            self.height = other.height;
        }
        if self.hash.is_none() {
            self.hash = other.hash.clone();
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &ParsedMetadata::default()
    }
}

/// Takeout sidecar timestamps arrive as `{"timestamp": "1621837411"}` with
/// the epoch seconds as a string, though some exporters emit numbers.
#[derive(Debug, Clone, Deserialize)]
pub struct TimestampField {
    #[serde(deserialize_with = "epoch_seconds")]
    pub timestamp: Option<i64>,
}

fn epoch_seconds<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(i64),
        Str(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Num(n)) => Ok(Some(n)),
        Some(Raw::Str(s)) => Ok(s.parse().ok()),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeoData {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// One sidecar JSON document describing a media file's true capture time
/// and location, keyed externally by filename.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarEntry {
    pub title: Option<String>,
    pub photo_taken_time: Option<TimestampField>,
    pub creation_time: Option<TimestampField>,
    pub modification_time: Option<TimestampField>,
    pub geo_data: Option<GeoData>,
    pub geo_data_exif: Option<GeoData>,
}

impl SidecarEntry {
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Capture time, preferring `photoTakenTime` over `creationTime`.
    pub fn taken_time(&self) -> Option<DateTime<Utc>> {
        let ts = self
            .photo_taken_time
            .as_ref()
            .and_then(|t| t.timestamp)
            .or_else(|| self.creation_time.as_ref().and_then(|t| t.timestamp))?;
        Utc.timestamp_opt(ts, 0).single()
    }

    pub fn modified_time(&self) -> Option<DateTime<Utc>> {
        let ts = self.modification_time.as_ref().and_then(|t| t.timestamp)?;
        Utc.timestamp_opt(ts, 0).single()
    }

    /// Location from `geoData`, falling back to `geoDataExif`. A (0, 0)
    /// pair means "absent", not a point off the coast of Ghana.
    pub fn location(&self) -> Option<Location> {
        let from = |g: &Option<GeoData>| -> Option<Location> {
            let g = g.as_ref()?;
            let (lat, lon) = (g.latitude?, g.longitude?);
            if lat == 0.0 && lon == 0.0 {
                return None;
            }
            Some(Location {
                latitude: lat,
                longitude: lon,
            })
        };
        from(&self.geo_data).or_else(|| from(&self.geo_data_exif))
    }

    /// Project the sidecar fields into the common metadata shape.
    pub fn to_metadata(&self) -> ParsedMetadata {
        ParsedMetadata {
            creation_time: self.taken_time(),
            modification_time: self.modified_time(),
            location: self.location(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_takeout_sidecar() {
        let json = r#"{
            "title": "IMG_0001.HEIC",
            "photoTakenTime": {"timestamp": "1621837411", "formatted": "May 24, 2021"},
            "modificationTime": {"timestamp": 1621900000},
            "geoData": {"latitude": 48.8584, "longitude": 2.2945}
        }"#;
        let entry = SidecarEntry::parse(json).unwrap();
        assert_eq!(entry.taken_time().unwrap().timestamp(), 1621837411);
        assert_eq!(entry.modified_time().unwrap().timestamp(), 1621900000);
        let loc = entry.location().unwrap();
        assert!((loc.latitude - 48.8584).abs() < 1e-9);
    }

    #[test]
    fn zero_zero_geodata_is_absent() {
        let json = r#"{"geoData": {"latitude": 0.0, "longitude": 0.0}}"#;
        let entry = SidecarEntry::parse(json).unwrap();
        assert!(entry.location().is_none());
    }

    #[test]
    fn geodata_exif_is_the_fallback() {
        let json = r#"{
            "geoData": {"latitude": 0.0, "longitude": 0.0},
            "geoDataExif": {"latitude": -33.86, "longitude": 151.21}
        }"#;
        let entry = SidecarEntry::parse(json).unwrap();
        let loc = entry.location().unwrap();
        assert!((loc.longitude - 151.21).abs() < 1e-9);
    }

    #[test]
    fn fill_missing_keeps_existing_fields() {
        let mut first = ParsedMetadata {
            creation_time: Some(Utc.timestamp_opt(100, 0).unwrap()),
            ..Default::default()
        };
        let second = ParsedMetadata {
            creation_time: Some(Utc.timestamp_opt(200, 0).unwrap()),
            width: Some(640),
            ..Default::default()
        };
        first.fill_missing_from(&second);
        assert_eq!(first.creation_time.unwrap().timestamp(), 100);
        assert_eq!(first.width, Some(640));
    }
}
