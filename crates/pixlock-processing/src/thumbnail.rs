//! Thumbnail generation with layered strategies and a guaranteed result.
//!
//! Strategy order: a pluggable native/OS thumbnailer when one is wired in
//! (a failed probe is remembered for the generator's lifetime so we do not
//! keep making round-trips that cannot succeed), then a software path that
//! decodes, scales and re-encodes at stepping quality. When everything
//! fails the pre-baked placeholder is returned and the asset is marked as
//! carrying a static thumbnail; thumbnailing never fails an upload.

use async_trait::async_trait;
use bytes::Bytes;
use image::GenericImageView;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use pixlock_core::FileKind;

/// Longest side of a generated thumbnail.
pub const THUMBNAIL_MAX_DIM: u32 = 720;

/// Soft size target for the encoded thumbnail.
pub const THUMBNAIL_TARGET_BYTES: usize = 100 * 1024;

/// JPEG quality steps, tried in order until the target is met.
const QUALITY_STEPS: &[u8] = &[70, 50, 30];

/// Stop stepping down when a step shrinks the output by less than this;
/// incompressible content would otherwise burn quality for nothing.
const MIN_IMPROVEMENT_PERCENT: usize = 10;

/// Platform thumbnailer hook (e.g. QuickLook, ffmpeg). The default build
/// has none and goes straight to the software path.
#[async_trait]
pub trait NativeThumbnailer: Send + Sync {
    async fn generate(&self, data: &[u8], kind: FileKind) -> anyhow::Result<Bytes>;
}

#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub data: Bytes,
    /// True when this is the pre-baked placeholder rather than a render of
    /// the actual content.
    pub is_static: bool,
}

pub struct ThumbnailGenerator {
    native: Option<Arc<dyn NativeThumbnailer>>,
    native_unavailable: AtomicBool,
}

impl ThumbnailGenerator {
    pub fn new() -> Self {
        Self {
            native: None,
            native_unavailable: AtomicBool::new(false),
        }
    }

    pub fn with_native(native: Arc<dyn NativeThumbnailer>) -> Self {
        Self {
            native: Some(native),
            native_unavailable: AtomicBool::new(false),
        }
    }

    /// Produce a thumbnail for the given media bytes. Infallible by
    /// contract: the worst case is the static placeholder.
    pub async fn generate(&self, data: Bytes, kind: FileKind) -> Thumbnail {
        if let Some(native) = &self.native {
            if !self.native_unavailable.load(Ordering::Relaxed) {
                match native.generate(&data, kind).await {
                    Ok(thumb) => {
                        return Thumbnail {
                            data: thumb,
                            is_static: false,
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "Native thumbnailer failed, disabling for this run");
                        self.native_unavailable.store(true, Ordering::Relaxed);
                    }
                }
            }
        }

        if kind != FileKind::Video {
            let rendered = tokio::task::spawn_blocking(move || software_thumbnail(&data))
                .await
                .ok()
                .flatten();
            if let Some(thumb) = rendered {
                return Thumbnail {
                    data: thumb,
                    is_static: false,
                };
            }
        }

        Thumbnail {
            data: fallback_thumbnail(),
            is_static: true,
        }
    }
}

impl Default for ThumbnailGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode, correct EXIF orientation, scale preserving aspect ratio, and
/// re-encode as JPEG at decreasing quality until the size target, the
/// quality floor, or the diminishing-returns threshold is hit.
fn software_thumbnail(data: &[u8]) -> Option<Bytes> {
    let img = image::ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?
        .decode()
        .ok()?;
    let img = apply_orientation(img, exif_orientation(data));

    let (width, height) = img.dimensions();
    let scaled = if width > THUMBNAIL_MAX_DIM || height > THUMBNAIL_MAX_DIM {
        img.thumbnail(THUMBNAIL_MAX_DIM, THUMBNAIL_MAX_DIM)
    } else {
        img
    };
    // JPEG has no alpha channel.
    let scaled = image::DynamicImage::ImageRgb8(scaled.to_rgb8());

    let mut best: Option<Vec<u8>> = None;
    for &quality in QUALITY_STEPS {
        let mut buf = Vec::new();
        let mut encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
        if encoder.encode_image(&scaled).is_err() {
            continue;
        }
        let improved_enough = match &best {
            Some(prev) => buf.len() * 100 <= prev.len() * (100 - MIN_IMPROVEMENT_PERCENT),
            None => true,
        };
        if improved_enough {
            let done = buf.len() <= THUMBNAIL_TARGET_BYTES;
            best = Some(buf);
            if done {
                break;
            }
        } else {
            break;
        }
    }
    best.map(Bytes::from)
}

/// EXIF orientation value, 1 when absent or unreadable. Decoders hand back
/// the stored pixels; rotation tags are ours to honor.
fn exif_orientation(data: &[u8]) -> u32 {
    let mut cursor = Cursor::new(data);
    exif::Reader::new()
        .read_from_container(&mut cursor)
        .ok()
        .and_then(|exif| {
            exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
                .and_then(|field| field.value.get_uint(0))
        })
        .unwrap_or(1)
}

/// Undo the stored transform so the thumbnail displays upright.
fn apply_orientation(img: image::DynamicImage, orientation: u32) -> image::DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// The fixed placeholder used when no strategy can render the content.
/// Built once and reused; byte-for-byte identical across calls.
pub fn fallback_thumbnail() -> Bytes {
    static FALLBACK: OnceLock<Bytes> = OnceLock::new();
    FALLBACK
        .get_or_init(|| {
            let gray = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
                32,
                32,
                image::Rgb([96, 96, 96]),
            ));
            let mut buf = Vec::new();
            let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, 70);
            encoder
                .encode_image(&gray)
                .expect("encoding a solid 32x32 JPEG cannot fail");
            Bytes::from(buf)
        })
        .clone()
}
