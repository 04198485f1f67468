//! Per-asset pipeline: preconditions, metadata, dedup, thumbnail,
//! encryption, transport and registration, in that order.

use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use pixlock_core::{
    expected_chunk_count, Asset, AssetKind, FileKind, FileTypeInfo, ParsedMetadata, UploadConfig,
    UploadError, UploadOutcome, UploadResult, CHUNK_SIZE,
};
use pixlock_crypto::{encrypt_asset, AssetKey, PlainBody};
use pixlock_processing::{merge_providers, ChunkHasher, SidecarStore, ThumbnailGenerator};
use pixlock_source::{open_source, read_prefix, stat_source, SourceStat};
use pixlock_transport::{
    encode_binary, with_retries, AttachExistingFile, FileRegistration, InlineEncryptedData,
    NullProgress, ObjectAttributes, Transport, UploadApi,
};

use crate::dedup::{find_duplicate, DedupIndex, KnownAsset};
use crate::marker::MarkUploadedStore;
use crate::progress::{AssetProgress, RunProgress};

/// How much of the file the EXIF parser and thumbnailer get to see. Large
/// videos are never buffered whole for these; their metadata sits at the
/// front of the container.
const SCAN_LIMIT: usize = 32 * 1024 * 1024;

/// Everything one upload run shares between its workers.
pub(crate) struct RunContext {
    pub config: UploadConfig,
    pub api: Arc<dyn UploadApi>,
    pub transport: Transport,
    pub dedup: Arc<dyn DedupIndex>,
    pub marker: Option<Arc<dyn MarkUploadedStore>>,
    pub thumbnailer: ThumbnailGenerator,
    pub sidecars: SidecarStore,
    pub collection_keys: HashMap<uuid::Uuid, AssetKey>,
    pub cancel: CancellationToken,
    pub progress: Arc<RunProgress>,
}

/// The file body as it will be handed to encryption. Live-photo pairs are
/// packaged into one container up front (both siblings are bounded by the
/// clustering size ceiling); singles are re-streamed from their source.
enum BodyPlan {
    Streamed,
    Container(Bytes),
}

/// The metadata blob registered alongside the encrypted file.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MetadataRecord<'a> {
    title: &'a str,
    file_type: &'a FileTypeInfo,
    #[serde(flatten)]
    parsed: &'a ParsedMetadata,
}

/// Run one asset end to end. `Ok` outcomes include the named precondition
/// short-circuits; `Err` is reserved for pipeline failures the caller maps
/// to `Failed` (or escalates, for run-fatal errors).
pub(crate) async fn process_asset(
    ctx: &RunContext,
    asset: &Asset,
) -> UploadResult<UploadOutcome> {
    let collection_key = ctx.collection_keys.get(&asset.collection_id).ok_or_else(|| {
        UploadError::Internal(format!("no key for collection {}", asset.collection_id))
    })?;

    let primary_stat = stat_source(&asset.primary().item).await?;
    let mut total_size = primary_stat.size;
    if let AssetKind::LivePhoto { video, .. } = &asset.kind {
        total_size += stat_source(&video.item).await?.size;
    }
    if total_size > ctx.config.max_upload_bytes {
        tracing::info!(
            title = %asset.title(),
            size = total_size,
            limit = ctx.config.max_upload_bytes,
            "File exceeds upload size limit"
        );
        return Ok(UploadOutcome::TooLarge);
    }

    if ctx.cancel.is_cancelled() {
        return Ok(UploadOutcome::Cancelled);
    }

    let mut metadata = extract_metadata(ctx, asset, &primary_stat).await;
    let (hash, plan) = hash_and_plan(asset).await?;
    metadata.hash = Some(hash.clone());

    if ctx.cancel.is_cancelled() {
        return Ok(UploadOutcome::Cancelled);
    }

    let candidates = ctx
        .dedup
        .find_candidates(asset.file_type.kind, asset.title())
        .await?;
    if let Some(known) = find_duplicate(
        &candidates,
        asset.collection_id,
        &hash,
        metadata.creation_time,
        total_size,
    ) {
        return reuse_existing(ctx, asset, known, &hash, &metadata, total_size).await;
    }

    let thumb_source = read_prefix(&asset.primary().item, SCAN_LIMIT).await?;
    let thumb_kind = match asset.file_type.kind {
        // The live-photo primary is its image sibling.
        FileKind::LivePhoto => FileKind::Image,
        kind => kind,
    };
    let thumbnail = ctx.thumbnailer.generate(thumb_source, thumb_kind).await;

    let record = MetadataRecord {
        title: asset.title(),
        file_type: &asset.file_type,
        parsed: &metadata,
    };
    let metadata_json = Bytes::from(serde_json::to_vec(&record)?);

    if ctx.cancel.is_cancelled() {
        return Ok(UploadOutcome::Cancelled);
    }

    let body = match plan {
        BodyPlan::Container(data) => PlainBody::Bytes(data),
        BodyPlan::Streamed => {
            let source = open_source(&asset.primary().item).await?;
            PlainBody::Stream {
                rx: source.stream.into_receiver(),
                size: source.size,
            }
        }
    };
    let encrypted = encrypt_asset(collection_key, body, thumbnail.data, metadata_json).await?;
    let body_cipher_size = encrypted.body.size();

    let sink = AssetProgress::new(ctx.progress.clone(), asset.local_id);
    let object_key = ctx.transport.upload_body(encrypted.body, &sink).await?;
    let thumbnail_key = ctx
        .transport
        .upload_blob(encrypted.thumbnail.data.clone(), &NullProgress)
        .await?;

    let registration = FileRegistration {
        collection_id: asset.collection_id,
        encrypted_key: encode_binary(&encrypted.wrapped_key),
        file: ObjectAttributes {
            object_key,
            decryption_header: encode_binary(&encrypted.file_decryption_header),
            size: body_cipher_size,
        },
        thumbnail: ObjectAttributes {
            object_key: thumbnail_key,
            decryption_header: encode_binary(&encrypted.thumbnail.header),
            size: encrypted.thumbnail.data.len() as u64,
        },
        metadata: InlineEncryptedData {
            encrypted_data: encode_binary(&encrypted.metadata.data),
            decryption_header: encode_binary(&encrypted.metadata.header),
        },
    };
    let registered = with_retries("register file", &ctx.cancel, || {
        ctx.api.register_file(&registration)
    })
    .await?;

    ctx.dedup
        .insert(KnownAsset {
            remote_id: registered.id,
            collection_id: asset.collection_id,
            kind: asset.file_type.kind,
            title: asset.title().to_string(),
            hash: Some(hash),
            creation_time: metadata.creation_time,
            size: Some(total_size),
        })
        .await?;
    mark_uploaded(ctx, asset).await;

    Ok(if thumbnail.is_static {
        UploadOutcome::UploadedWithStaticThumbnail {
            remote_id: registered.id,
        }
    } else {
        UploadOutcome::Uploaded {
            remote_id: registered.id,
        }
    })
}

/// The dedup index found this content already on the server.
async fn reuse_existing(
    ctx: &RunContext,
    asset: &Asset,
    known: &KnownAsset,
    hash: &str,
    metadata: &ParsedMetadata,
    total_size: u64,
) -> UploadResult<UploadOutcome> {
    if known.collection_id == asset.collection_id {
        tracing::info!(title = %asset.title(), remote_id = %known.remote_id, "Already uploaded");
        mark_uploaded(ctx, asset).await;
        return Ok(UploadOutcome::AlreadyUploaded {
            remote_id: known.remote_id,
        });
    }

    let attach = AttachExistingFile {
        file_id: known.remote_id,
        collection_id: asset.collection_id,
    };
    with_retries("attach existing file", &ctx.cancel, || {
        ctx.api.attach_existing(&attach)
    })
    .await?;
    ctx.dedup
        .insert(KnownAsset {
            remote_id: known.remote_id,
            collection_id: asset.collection_id,
            kind: asset.file_type.kind,
            title: asset.title().to_string(),
            hash: Some(hash.to_string()),
            creation_time: metadata.creation_time,
            size: Some(total_size),
        })
        .await?;
    mark_uploaded(ctx, asset).await;
    tracing::info!(title = %asset.title(), remote_id = %known.remote_id, "Attached existing file");
    Ok(UploadOutcome::AddedSymlink {
        remote_id: known.remote_id,
    })
}

/// Merge the metadata providers in precedence order. Never fails: any
/// provider that cannot produce data contributes an empty record.
async fn extract_metadata(
    ctx: &RunContext,
    asset: &Asset,
    primary_stat: &SourceStat,
) -> ParsedMetadata {
    let mut providers = Vec::with_capacity(5);
    if let Some(override_metadata) = &asset.metadata_override {
        providers.push(override_metadata.clone());
    }
    if let Some(entry) = ctx.sidecars.lookup(asset.collection_id, asset.title()) {
        providers.push(entry.to_metadata());
    }
    match read_prefix(&asset.primary().item, SCAN_LIMIT).await {
        Ok(prefix) => providers.push(pixlock_processing::metadata::exif::parse_embedded(&prefix)),
        Err(e) => {
            tracing::debug!(title = %asset.title(), error = %e, "Could not read bytes for EXIF")
        }
    }
    providers.push(pixlock_processing::metadata::filename::parse_filename_metadata(asset.title()));
    providers.push(ParsedMetadata {
        creation_time: Some(primary_stat.last_modified),
        modification_time: Some(primary_stat.last_modified),
        ..Default::default()
    });
    merge_providers(providers)
}

/// Content hash plus the plan for producing the upload body.
async fn hash_and_plan(asset: &Asset) -> UploadResult<(String, BodyPlan)> {
    match &asset.kind {
        AssetKind::Single(file) => {
            let source = open_source(&file.item).await?;
            let mut hasher = ChunkHasher::new(expected_chunk_count(source.size));
            let mut stream = source.stream;
            while let Some(chunk) = stream.next_chunk().await {
                hasher.update(&chunk?);
            }
            Ok((hasher.finalize()?, BodyPlan::Streamed))
        }
        AssetKind::LivePhoto { image, video } => {
            let image_bytes = open_source(&image.item).await?.stream.collect().await?;
            let video_bytes = open_source(&video.item).await?.stream.collect().await?;
            let container = live_photo_container(
                &image.file_name,
                &image_bytes,
                &video.file_name,
                &video_bytes,
            )?;
            let mut hasher = ChunkHasher::new(expected_chunk_count(container.len() as u64));
            for chunk in container.chunks(CHUNK_SIZE) {
                hasher.update(chunk);
            }
            Ok((hasher.finalize()?, BodyPlan::Container(container)))
        }
    }
}

/// Package a live-photo pair as one uncompressed zip container with the
/// image and video under fixed entry prefixes.
fn live_photo_container(
    image_name: &str,
    image: &[u8],
    video_name: &str,
    video: &[u8],
) -> UploadResult<Bytes> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    // Media bytes are already compressed; store them as-is.
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
    writer
        .start_file(format!("image/{image_name}"), options)
        .map_err(container_error)?;
    writer.write_all(image)?;
    writer
        .start_file(format!("video/{video_name}"), options)
        .map_err(container_error)?;
    writer.write_all(video)?;
    let cursor = writer.finish().map_err(container_error)?;
    Ok(Bytes::from(cursor.into_inner()))
}

fn container_error(e: zip::result::ZipError) -> UploadError {
    UploadError::Internal(format!("live photo container: {e}"))
}

async fn mark_uploaded(ctx: &RunContext, asset: &Asset) {
    let Some(marker) = &ctx.marker else { return };
    let descriptors = asset.local_descriptors();
    if descriptors.is_empty() {
        return;
    }
    if let Err(e) = marker.mark(&descriptors).await {
        // Resume bookkeeping must never fail an upload that succeeded.
        tracing::warn!(title = %asset.title(), error = %e, "Could not persist uploaded mark");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn container_holds_both_siblings_uncompressed() {
        let container = live_photo_container(
            "IMG_0001.HEIC",
            b"image bytes here",
            "IMG_0001.mp4",
            b"video bytes here",
        )
        .unwrap();

        let mut archive =
            zip::ZipArchive::new(std::io::Cursor::new(container.to_vec())).unwrap();
        assert_eq!(archive.len(), 2);

        let mut image = String::new();
        archive
            .by_name("image/IMG_0001.HEIC")
            .unwrap()
            .read_to_string(&mut image)
            .unwrap();
        assert_eq!(image, "image bytes here");

        let video = archive.by_name("video/IMG_0001.mp4").unwrap();
        assert_eq!(video.compression(), zip::CompressionMethod::Stored);
    }
}
