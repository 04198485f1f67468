//! Embedded EXIF parsing.
//!
//! Every failure here degrades to "no embedded metadata"; a corrupt or
//! absent EXIF segment must never abort the asset.

use chrono::{TimeZone, Utc};
use exif::{In, Tag, Value};

use pixlock_core::{Location, ParsedMetadata};

/// Parse capture time, GPS position and pixel dimensions out of the EXIF
/// segment, if any.
pub fn parse_embedded(data: &[u8]) -> ParsedMetadata {
    let mut cursor = std::io::Cursor::new(data);
    let exif = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(exif) => exif,
        Err(e) => {
            tracing::debug!(error = %e, "No embedded EXIF metadata");
            return ParsedMetadata::default();
        }
    };

    ParsedMetadata {
        creation_time: datetime_field(&exif, Tag::DateTimeOriginal)
            .or_else(|| datetime_field(&exif, Tag::DateTimeDigitized))
            .or_else(|| datetime_field(&exif, Tag::DateTime)),
        modification_time: datetime_field(&exif, Tag::DateTime),
        location: gps_location(&exif),
        width: uint_field(&exif, Tag::PixelXDimension).or_else(|| uint_field(&exif, Tag::ImageWidth)),
        height: uint_field(&exif, Tag::PixelYDimension)
            .or_else(|| uint_field(&exif, Tag::ImageLength)),
        hash: None,
    }
}

fn datetime_field(exif: &exif::Exif, tag: Tag) -> Option<chrono::DateTime<Utc>> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let ascii = match &field.value {
        Value::Ascii(parts) => parts.first()?,
        _ => return None,
    };
    let dt = exif::DateTime::from_ascii(ascii).ok()?;
    Utc.with_ymd_and_hms(
        dt.year as i32,
        dt.month as u32,
        dt.day as u32,
        dt.hour as u32,
        dt.minute as u32,
        dt.second as u32,
    )
    .single()
}

fn uint_field(exif: &exif::Exif, tag: Tag) -> Option<u32> {
    exif.get_field(tag, In::PRIMARY)?.value.get_uint(0)
}

fn gps_location(exif: &exif::Exif) -> Option<Location> {
    let latitude = gps_coordinate(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, b'S')?;
    let longitude = gps_coordinate(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, b'W')?;
    if latitude == 0.0 && longitude == 0.0 {
        return None;
    }
    Some(Location {
        latitude,
        longitude,
    })
}

fn gps_coordinate(
    exif: &exif::Exif,
    value_tag: Tag,
    ref_tag: Tag,
    negative_ref: u8,
) -> Option<f64> {
    let field = exif.get_field(value_tag, In::PRIMARY)?;
    let rationals = match &field.value {
        Value::Rational(r) if r.len() >= 3 => r,
        _ => return None,
    };
    let degrees =
        rationals[0].to_f64() + rationals[1].to_f64() / 60.0 + rationals[2].to_f64() / 3600.0;

    let sign = match exif.get_field(ref_tag, In::PRIMARY).map(|f| &f.value) {
        Some(Value::Ascii(parts)) => {
            if parts
                .first()
                .and_then(|p| p.first())
                .is_some_and(|c| c.eq_ignore_ascii_case(&negative_ref))
            {
                -1.0
            } else {
                1.0
            }
        }
        _ => 1.0,
    };
    Some(sign * degrees)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_degrades_to_empty_metadata() {
        let parsed = parse_embedded(&[0u8; 128]);
        assert!(parsed.is_empty());
    }

    #[test]
    fn empty_input_degrades_to_empty_metadata() {
        assert!(parse_embedded(&[]).is_empty());
    }
}
