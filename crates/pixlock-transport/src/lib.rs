//! Delivery of encrypted bytes to remote object storage.
//!
//! The remote API hands out pre-signed URLs; this crate manages a
//! run-scoped pool of them, picks between single-PUT and multipart
//! strategies, and wraps every request in a fixed-backoff retry policy
//! with cooperative cancellation.

pub mod api;
pub mod retry;
pub mod transfer;
pub mod url_pool;

pub use api::{
    encode_binary, AttachExistingFile, Auth, FileRegistration, InlineEncryptedData,
    MultipartUploadUrls, ObjectAttributes, RegisteredFile, RemoteClient, UploadApi,
};
pub use retry::{with_retries, RETRY_DELAYS};
pub use transfer::{NullProgress, ProgressSink, Transport};
pub use url_pool::UrlPool;
