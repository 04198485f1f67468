//! Core types for the pixlock upload client.
//!
//! This crate holds the shared vocabulary of the upload pipeline: the
//! `UploadItem`/`Asset` data model, the error taxonomy, run configuration,
//! and the chunking constants that the source reader, hasher, encryption
//! stage and transport all agree on.

pub mod config;
pub mod error;
pub mod models;

pub use config::UploadConfig;
pub use error::{UploadError, UploadResult};
pub use models::{
    Asset, AssetKind, EncryptedAsset, EncryptedBlob, EncryptedBody, FileKind, FileTypeInfo,
    Location, ParsedMetadata, SidecarEntry, SourceFile, UploadItem, UploadOutcome, UploadUrl,
};

/// Fixed plaintext chunk size used for streaming hash and encryption.
///
/// Every chunk emitted by the source reader has exactly this size except the
/// final one, which may be shorter. The encryption stage and the transport
/// both rely on this boundary, so it is a constant rather than configuration.
pub const CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Size of one ciphertext chunk: plaintext chunk plus the 16-byte
/// authentication tag appended per chunk.
pub const ENCRYPTED_CHUNK_SIZE: usize = CHUNK_SIZE + 16;

/// Number of transform chunks bundled into one multipart upload part.
pub const CHUNKS_PER_PART: usize = 5;

/// Streams with fewer chunks than this are buffered and uploaded with a
/// single PUT; anything at or above it goes through the multipart path.
pub const MULTIPART_MIN_CHUNKS: usize = 5 * CHUNKS_PER_PART;

/// Number of chunks a source of `size` bytes produces.
///
/// An empty source still produces one (empty, final) chunk so that the
/// encryption stage always has a chunk to flag as last.
pub fn expected_chunk_count(size: u64) -> u64 {
    if size == 0 {
        return 1;
    }
    size.div_ceil(CHUNK_SIZE as u64)
}
