//! Heuristic capture dates from vendor filename patterns.
//!
//! Matched in order: WhatsApp-style `IMG-`/`VID-` fused dates, Android
//! `Screenshot_` fused datetimes, Signal dashed dates, then a generic
//! "adjacent digit groups" fallback. Every candidate is range-checked so
//! that serial numbers and resolutions do not turn into dates.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use regex::Regex;
use std::sync::OnceLock;

use pixlock_core::ParsedMetadata;

const MIN_VALID_YEAR: i32 = 1990;

fn whatsapp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:IMG|VID)-(\d{4})(\d{2})(\d{2})-").unwrap())
}

fn screenshot_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^Screenshot_(\d{4})(\d{2})(\d{2})[-_](\d{2})(\d{2})(\d{2})").unwrap()
    })
}

fn signal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^signal-(\d{4})-(\d{2})-(\d{2})(?:-(\d{2})(\d{2})(\d{2}))?").unwrap()
    })
}

fn digits_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").unwrap())
}

/// Capture date parsed from the filename, as a partial metadata record.
pub fn parse_filename_metadata(file_name: &str) -> ParsedMetadata {
    ParsedMetadata {
        creation_time: parse_filename_date(file_name),
        ..Default::default()
    }
}

/// Parse a capture date out of a filename, or `None` when no plausible
/// date is present.
pub fn parse_filename_date(file_name: &str) -> Option<DateTime<Utc>> {
    if let Some(c) = whatsapp_re().captures(file_name) {
        return build_date(num(&c, 1)?, num(&c, 2)?, num(&c, 3)?, 0, 0, 0);
    }
    if let Some(c) = screenshot_re().captures(file_name) {
        return build_date(
            num(&c, 1)?,
            num(&c, 2)?,
            num(&c, 3)?,
            num(&c, 4)?,
            num(&c, 5)?,
            num(&c, 6)?,
        );
    }
    if let Some(c) = signal_re().captures(file_name) {
        let (h, mi, s) = match (num(&c, 4), num(&c, 5), num(&c, 6)) {
            (Some(h), Some(mi), Some(s)) => (h, mi, s),
            _ => (0, 0, 0),
        };
        return build_date(num(&c, 1)?, num(&c, 2)?, num(&c, 3)?, h, mi, s);
    }
    parse_fused_digit_groups(file_name)
}

/// Generic fallback: split the name into digit runs, expand fused runs
/// (8 digits = date, 6 = time, 14 = both) and look for a year-month-day
/// prefix, optionally followed by hour-minute-second.
fn parse_fused_digit_groups(file_name: &str) -> Option<DateTime<Utc>> {
    let mut parts: Vec<i64> = Vec::new();
    for m in digits_re().find_iter(file_name) {
        let run = m.as_str();
        match run.len() {
            8 => {
                parts.push(run[..4].parse().ok()?);
                parts.push(run[4..6].parse().ok()?);
                parts.push(run[6..8].parse().ok()?);
            }
            6 => {
                parts.push(run[..2].parse().ok()?);
                parts.push(run[2..4].parse().ok()?);
                parts.push(run[4..6].parse().ok()?);
            }
            14 => {
                parts.push(run[..4].parse().ok()?);
                parts.push(run[4..6].parse().ok()?);
                parts.push(run[6..8].parse().ok()?);
                parts.push(run[8..10].parse().ok()?);
                parts.push(run[10..12].parse().ok()?);
                parts.push(run[12..14].parse().ok()?);
            }
            _ => {
                if let Ok(v) = run.parse() {
                    parts.push(v);
                }
            }
        }
    }

    for (i, window) in parts.windows(3).enumerate() {
        let (y, mo, d) = (window[0], window[1], window[2]);
        if !(1000..=9999).contains(&y) {
            continue;
        }
        let (h, mi, s) = match parts.get(i + 3..i + 6) {
            Some([h, mi, s]) if time_plausible(*h, *mi, *s) => (*h, *mi, *s),
            _ => (0, 0, 0),
        };
        if let Some(dt) = build_date(y as i32, mo as u32, d as u32, h as u32, mi as u32, s as u32)
        {
            return Some(dt);
        }
    }
    None
}

fn time_plausible(h: i64, mi: i64, s: i64) -> bool {
    (0..24).contains(&h) && (0..60).contains(&mi) && (0..60).contains(&s)
}

fn num<T: std::str::FromStr>(captures: &regex::Captures, index: usize) -> Option<T> {
    captures.get(index)?.as_str().parse().ok()
}

/// Range-validate and build the date. Rejects years outside
/// `[1990, current_year + 1]` and the all-zero timestamp.
fn build_date(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
) -> Option<DateTime<Utc>> {
    if year < MIN_VALID_YEAR || year > Utc::now().year() + 1 {
        return None;
    }
    let dt = Utc
        .with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()?;
    if dt.timestamp() == 0 {
        return None;
    }
    Some(dt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn whatsapp_image_name() {
        let dt = parse_filename_date("IMG-20171218-WA0028.jpg").unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2017, 12, 18));
        assert_eq!((dt.hour(), dt.minute(), dt.second()), (0, 0, 0));
    }

    #[test]
    fn whatsapp_video_name() {
        let dt = parse_filename_date("VID-20200101-WA0001.mp4").unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2020, 1, 1));
    }

    #[test]
    fn android_screenshot_name() {
        let dt = parse_filename_date("Screenshot_20181227-152914.jpg").unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2018, 12, 27));
        assert_eq!((dt.hour(), dt.minute(), dt.second()), (15, 29, 14));
    }

    #[test]
    fn signal_name_with_time() {
        let dt = parse_filename_date("signal-2018-08-21-100217.jpg").unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2018, 8, 21));
        assert_eq!(dt.hour(), 10);
    }

    #[test]
    fn generic_fused_date_and_time() {
        let dt = parse_filename_date("2019-02-03 13.45.59.jpg").unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2019, 2, 3));
        assert_eq!((dt.hour(), dt.minute(), dt.second()), (13, 45, 59));
    }

    #[test]
    fn generic_fused_datetime_run() {
        let dt = parse_filename_date("PXL_20210524_101530.mp4").unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2021, 5, 24));
        assert_eq!(dt.hour(), 10);
    }

    #[test]
    fn ancient_year_is_rejected() {
        assert!(parse_filename_date("18991231.jpg").is_none());
    }

    #[test]
    fn far_future_year_is_rejected() {
        assert!(parse_filename_date("29990101-120000.jpg").is_none());
    }

    #[test]
    fn serial_numbers_are_not_dates() {
        assert!(parse_filename_date("IMG_0042.jpg").is_none());
        assert!(parse_filename_date("DSC01234.jpg").is_none());
    }

    #[test]
    fn invalid_calendar_date_is_rejected() {
        assert!(parse_filename_date("20211345.jpg").is_none());
    }
}
