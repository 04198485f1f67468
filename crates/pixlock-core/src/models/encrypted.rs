//! Output of the encryption stage, consumed only by the transport.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::UploadResult;

/// One whole-payload ciphertext (thumbnail, metadata blob) together with
/// the header the decryptor needs.
#[derive(Debug, Clone)]
pub struct EncryptedBlob {
    pub data: Bytes,
    pub header: Vec<u8>,
}

/// Encrypted file body: buffered for small files, a sequence of ciphertext
/// chunks for streamed ones. Chunks arrive in encryption order and must be
/// uploaded in that order.
#[derive(Debug)]
pub enum EncryptedBody {
    Bytes(Bytes),
    Stream {
        rx: mpsc::Receiver<UploadResult<Bytes>>,
        /// Number of ciphertext chunks the stream will yield.
        chunk_count: u64,
        /// Total ciphertext size in bytes.
        size: u64,
    },
}

impl EncryptedBody {
    pub fn chunk_count(&self) -> u64 {
        match self {
            EncryptedBody::Bytes(data) => {
                if data.is_empty() {
                    1
                } else {
                    (data.len() as u64).div_ceil(crate::ENCRYPTED_CHUNK_SIZE as u64)
                }
            }
            EncryptedBody::Stream { chunk_count, .. } => *chunk_count,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            EncryptedBody::Bytes(data) => data.len() as u64,
            EncryptedBody::Stream { size, .. } => *size,
        }
    }
}

/// Everything the transport needs to deliver one asset. The per-asset key
/// itself is wrapped under the collection key and never present in
/// plaintext here.
#[derive(Debug)]
pub struct EncryptedAsset {
    pub body: EncryptedBody,
    pub file_decryption_header: Vec<u8>,
    pub thumbnail: EncryptedBlob,
    pub metadata: EncryptedBlob,
    /// Per-asset key encrypted under the destination collection's key
    /// (nonce prepended).
    pub wrapped_key: Vec<u8>,
}
