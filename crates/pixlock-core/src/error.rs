//! Error types module
//!
//! All pipeline errors are unified under the `UploadError` enum. Errors
//! classify themselves along two axes: whether a retry can help
//! (`is_retryable`, transient network trouble) and whether they poison the
//! whole run rather than a single asset (`is_run_fatal`, invariant
//! violations such as the URL pool handing out a duplicate).

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("File too large: {size} bytes exceeds limit of {limit}")]
    TooLarge { size: u64, limit: u64 },

    #[error("Upload blocked: {0}")]
    Blocked(String),

    #[error("Chunk count mismatch: expected {expected}, observed {observed}")]
    ChunkCountMismatch { expected: u64, observed: u64 },

    #[error("Missing etag header for part {part_number}")]
    MissingEtag { part_number: usize },

    #[error("Duplicate pre-signed URL handed out: {0}")]
    DuplicateUploadUrl(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("Decryption error: {0}")]
    Decrypt(String),

    #[error("Source read error: {0}")]
    Source(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Upload cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for pipeline operations.
pub type UploadResult<T> = Result<T, UploadError>;

impl UploadError {
    /// Whether retrying the same operation can plausibly succeed.
    ///
    /// Protocol violations (missing ETag, chunk count mismatch) are
    /// structural and never retried; cancellation aborts immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::Network(_) | UploadError::Io(_) => true,
            UploadError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Whether this error invalidates the whole run instead of one asset.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, UploadError::DuplicateUploadUrl(_))
    }
}

impl From<anyhow::Error> for UploadError {
    fn from(err: anyhow::Error) -> Self {
        UploadError::Internal(err.to_string())
    }
}
