//! Whole-asset encryption: one fresh key per asset, applied to the file
//! body, the thumbnail and the metadata blob, then wrapped for storage.

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

use pixlock_core::{
    expected_chunk_count, EncryptedAsset, EncryptedBlob, EncryptedBody, UploadError, UploadResult,
    CHUNK_SIZE,
};

use crate::keys::{generate_key, wrap_key, AssetKey};
use crate::stream::{StreamEncryptor, TAG_LEN};

const CHANNEL_DEPTH: usize = 2;

/// Plaintext file body handed to the encryption stage. Small files arrive
/// buffered; large ones as the source's chunk channel plus their known
/// plaintext size.
pub enum PlainBody {
    Bytes(Bytes),
    Stream {
        rx: mpsc::Receiver<UploadResult<Bytes>>,
        size: u64,
    },
}

/// Encrypt one asset end to end. Generates the per-asset key, seals body,
/// thumbnail and metadata under it, and wraps the key under the collection
/// key. Streamed bodies are encrypted lazily; the returned stream carries
/// ciphertext chunks as the source produces plaintext ones.
pub async fn encrypt_asset(
    collection_key: &AssetKey,
    body: PlainBody,
    thumbnail: Bytes,
    metadata_json: Bytes,
) -> UploadResult<EncryptedAsset> {
    let asset_key = generate_key();
    let wrapped_key = wrap_key(&asset_key, collection_key)?;

    let thumbnail = encrypt_blob(&asset_key, &thumbnail)?;
    let metadata = encrypt_blob(&asset_key, &metadata_json)?;

    let (body, file_decryption_header) = match body {
        PlainBody::Bytes(data) => {
            let (ciphertext, header) = encrypt_buffered(&asset_key, &data)?;
            (EncryptedBody::Bytes(ciphertext), header)
        }
        PlainBody::Stream { rx, size } => {
            let chunk_count = expected_chunk_count(size);
            let (out, header) = encrypt_streamed(asset_key, rx);
            (
                EncryptedBody::Stream {
                    rx: out,
                    chunk_count,
                    size: size + chunk_count * TAG_LEN as u64,
                },
                header,
            )
        }
    };

    Ok(EncryptedAsset {
        body,
        file_decryption_header,
        thumbnail,
        metadata,
        wrapped_key,
    })
}

/// Seal a whole small payload as a single final chunk.
fn encrypt_blob(key: &AssetKey, data: &[u8]) -> UploadResult<EncryptedBlob> {
    let (mut encryptor, header) = StreamEncryptor::new(key);
    let sealed = encryptor.push(data, true)?;
    Ok(EncryptedBlob {
        data: sealed,
        header,
    })
}

fn encrypt_buffered(key: &AssetKey, data: &Bytes) -> UploadResult<(Bytes, Vec<u8>)> {
    let (mut encryptor, header) = StreamEncryptor::new(key);
    let mut out = BytesMut::with_capacity(data.len() + TAG_LEN);
    let mut offset = 0;
    loop {
        let end = (offset + CHUNK_SIZE).min(data.len());
        let is_last = end == data.len();
        out.extend_from_slice(&encryptor.push(&data[offset..end], is_last)?);
        if is_last {
            return Ok((out.freeze(), header));
        }
        offset = end;
    }
}

/// Encrypt plaintext chunks as they arrive. The source signals the end of
/// the body by closing its channel, so one chunk of lookahead is held back
/// to know which chunk is final.
fn encrypt_streamed(
    key: AssetKey,
    mut rx: mpsc::Receiver<UploadResult<Bytes>>,
) -> (mpsc::Receiver<UploadResult<Bytes>>, Vec<u8>) {
    let (mut encryptor, header) = StreamEncryptor::new(&key);
    let (tx, out) = mpsc::channel(CHANNEL_DEPTH);
    tokio::spawn(async move {
        let mut held: Option<Bytes> = None;
        loop {
            match rx.recv().await {
                Some(Ok(chunk)) => {
                    if let Some(prev) = held.replace(chunk) {
                        match encryptor.push(&prev, false) {
                            Ok(sealed) => {
                                if tx.send(Ok(sealed)).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => {
                                let _ = tx.send(Err(e)).await;
                                return;
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
                None => {
                    let last = match held.take() {
                        Some(chunk) => chunk,
                        None => {
                            let _ = tx
                                .send(Err(UploadError::Source(
                                    "source stream ended before yielding any chunk".to_string(),
                                )))
                                .await;
                            return;
                        }
                    };
                    let _ = tx.send(encryptor.push(&last, true)).await;
                    return;
                }
            }
        }
    });
    (out, header)
}
