//! Metadata extraction: competing sources merged with fixed precedence.
//!
//! Providers are ordered highest-precedence first and merged by a pure
//! left-to-right fold where the first non-empty value of each field wins:
//! sidecar JSON, embedded EXIF, filename-derived date, filesystem mtime.

pub mod exif;
pub mod filename;
pub mod sidecar;

use pixlock_core::ParsedMetadata;

/// Fold an ordered list of partial metadata records into one, first
/// non-empty field winning.
pub fn merge_providers<I>(providers: I) -> ParsedMetadata
where
    I: IntoIterator<Item = ParsedMetadata>,
{
    providers
        .into_iter()
        .fold(ParsedMetadata::default(), |mut acc, provider| {
            acc.fill_missing_from(&provider);
            acc
        })
}
