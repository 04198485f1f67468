//! Remote upload API surface.
//!
//! [`UploadApi`] is the seam between the upload pipeline and the wire:
//! everything above it (URL pool, transfer strategy, orchestrator) talks to
//! the trait, and tests substitute fakes for it. [`RemoteClient`] is the
//! real implementation over reqwest.

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::Instant;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use pixlock_core::{UploadError, UploadResult, UploadUrl};

/// Pre-signed URL set for one multipart upload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartUploadUrls {
    pub object_key: String,
    #[serde(rename = "partURLs")]
    pub part_urls: Vec<String>,
    #[serde(rename = "completeURL")]
    pub complete_url: String,
}

/// Encrypted object attributes for one stored payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectAttributes {
    pub object_key: String,
    pub decryption_header: String,
    pub size: u64,
}

/// Metadata travels inline in the registration record rather than as a
/// stored object.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineEncryptedData {
    pub encrypted_data: String,
    pub decryption_header: String,
}

/// The fully assembled record registering a finished upload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRegistration {
    pub collection_id: Uuid,
    /// Per-asset key wrapped under the collection key, base64.
    pub encrypted_key: String,
    pub file: ObjectAttributes,
    pub thumbnail: ObjectAttributes,
    pub metadata: InlineEncryptedData,
}

/// Server's view of a registered file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredFile {
    pub id: Uuid,
}

/// Request to attach an already-stored file to another collection without
/// re-uploading its bytes. The server copies the stored record, including
/// its wrapped key, into the target collection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachExistingFile {
    pub file_id: Uuid,
    pub collection_id: Uuid,
}

/// Everything the pipeline needs from the remote side. One implementation
/// speaks HTTP; tests use in-memory fakes.
#[async_trait]
pub trait UploadApi: Send + Sync {
    /// `GET /files/upload-urls?count=N`
    async fn fetch_upload_urls(&self, count: usize) -> UploadResult<Vec<UploadUrl>>;

    /// `GET /files/multipart-upload-urls?count=N` where `count` is the
    /// number of parts.
    async fn fetch_multipart_upload_urls(&self, count: usize)
        -> UploadResult<MultipartUploadUrls>;

    /// `PUT <presigned-url>` with raw encrypted bytes. Returns the `etag`
    /// response header when the storage backend sent one.
    async fn put_object(&self, url: &str, body: Bytes) -> UploadResult<Option<String>>;

    /// `POST <completeURL>` with the XML completion body.
    async fn complete_multipart(&self, complete_url: &str, body: String) -> UploadResult<()>;

    /// `POST /files` registering the finished upload.
    async fn register_file(&self, record: &FileRegistration) -> UploadResult<RegisteredFile>;

    /// `POST /files/attach` adding an existing remote object to another
    /// collection.
    async fn attach_existing(&self, request: &AttachExistingFile) -> UploadResult<RegisteredFile>;
}

/// Authentication for the remote API: a logged-in session, or a public
/// album capability token.
#[derive(Debug, Clone)]
pub enum Auth {
    Session(String),
    PublicAlbum(String),
}

/// Body chunk size for tracked uploads.
const UPLOAD_BODY_CHUNK: usize = 64 * 1024;

/// Tracks when an upload body last moved. Lock-free so the request task
/// and the watchdog never contend.
struct UploadActivity {
    epoch: Instant,
    last_ms: AtomicU64,
}

impl UploadActivity {
    fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        self.last_ms
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    /// Resolves once no activity has been observed for `limit`.
    async fn stalled(&self, limit: Duration) {
        loop {
            let last = self.epoch + Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
            let deadline = last + limit;
            if Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep_until(deadline).await;
        }
    }
}

/// Request body reporting its consumption to an [`UploadActivity`]. The
/// HTTP stack pulls the next piece only after the socket accepted the
/// previous one, so each read is evidence the transfer is moving.
struct TrackedBody {
    data: Bytes,
    activity: Arc<UploadActivity>,
}

impl AsyncRead for TrackedBody {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if !this.data.is_empty() {
            let n = this.data.len().min(buf.remaining());
            buf.put_slice(&this.data.split_to(n));
            this.activity.touch();
        }
        Poll::Ready(Ok(()))
    }
}

/// Map an unsuccessful HTTP status onto the error taxonomy. Forbidden and
/// legal-block responses mean the server refused the content or the
/// caller's right to store it; everything else keeps its status for retry
/// classification.
fn http_error(status: u16, message: String) -> UploadError {
    match status {
        403 | 451 => UploadError::Blocked(message),
        _ => UploadError::Http { status, message },
    }
}

/// HTTP implementation of [`UploadApi`].
#[derive(Debug, Clone)]
pub struct RemoteClient {
    client: reqwest::Client,
    base_url: String,
    auth: Auth,
    stall_timeout: Duration,
}

impl RemoteClient {
    /// `stall_timeout` is the no-progress guard: it bounds response-body
    /// reads via reqwest's `read_timeout` and upload bodies via a
    /// watchdog in `put_object`. A request whose bytes stop moving for
    /// that long is aborted and surfaces as a retryable network error.
    pub fn new(
        base_url: &str,
        auth: Auth,
        request_timeout: Duration,
        stall_timeout: Duration,
    ) -> UploadResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .read_timeout(stall_timeout)
            .build()
            .map_err(|e| UploadError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            stall_timeout,
        })
    }

    fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Auth::Session(token) => request.header("X-Auth-Token", token.as_str()),
            Auth::PublicAlbum(token) => request.header("X-Auth-Access-Token", token.as_str()),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> UploadResult<T> {
        let request = self.apply_auth(self.client.get(self.build_url(path)).query(query));
        let response = request
            .send()
            .await
            .map_err(|e| UploadError::Network(format!("GET {path} failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(http_error(status.as_u16(), message));
        }
        response
            .json()
            .await
            .map_err(|e| UploadError::Network(format!("GET {path}: invalid response body: {e}")))
    }

    async fn post_json<T: serde::de::DeserializeOwned, B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> UploadResult<T> {
        let request = self.apply_auth(self.client.post(self.build_url(path)).json(body));
        let response = request
            .send()
            .await
            .map_err(|e| UploadError::Network(format!("POST {path} failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(http_error(status.as_u16(), message));
        }
        response
            .json()
            .await
            .map_err(|e| UploadError::Network(format!("POST {path}: invalid response body: {e}")))
    }
}

#[derive(Debug, Deserialize)]
struct UploadUrlsResponse {
    urls: Vec<UploadUrl>,
}

#[async_trait]
impl UploadApi for RemoteClient {
    async fn fetch_upload_urls(&self, count: usize) -> UploadResult<Vec<UploadUrl>> {
        let response: UploadUrlsResponse = self
            .get_json("/files/upload-urls", &[("count", count.to_string())])
            .await?;
        Ok(response.urls)
    }

    async fn fetch_multipart_upload_urls(
        &self,
        count: usize,
    ) -> UploadResult<MultipartUploadUrls> {
        self.get_json(
            "/files/multipart-upload-urls",
            &[("count", count.to_string())],
        )
        .await
    }

    async fn put_object(&self, url: &str, body: Bytes) -> UploadResult<Option<String>> {
        let total = body.len() as u64;
        let activity = Arc::new(UploadActivity::new());
        let stream = ReaderStream::with_capacity(
            TrackedBody {
                data: body,
                activity: activity.clone(),
            },
            UPLOAD_BODY_CHUNK,
        );
        let request = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_LENGTH, total)
            .body(reqwest::Body::wrap_stream(stream));

        let response = tokio::select! {
            result = request.send() => {
                result.map_err(|e| UploadError::Network(format!("PUT failed: {e}")))?
            }
            _ = activity.stalled(self.stall_timeout) => {
                return Err(UploadError::Network(format!(
                    "PUT made no progress for {:?}",
                    self.stall_timeout
                )));
            }
        };
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(http_error(status.as_u16(), message));
        }
        let etag = response
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string());
        Ok(etag)
    }

    async fn complete_multipart(&self, complete_url: &str, body: String) -> UploadResult<()> {
        let response = self
            .client
            .post(complete_url)
            .header("Content-Type", "application/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| UploadError::Network(format!("multipart completion failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(http_error(status.as_u16(), message));
        }
        Ok(())
    }

    async fn register_file(&self, record: &FileRegistration) -> UploadResult<RegisteredFile> {
        self.post_json("/files", record).await
    }

    async fn attach_existing(&self, request: &AttachExistingFile) -> UploadResult<RegisteredFile> {
        self.post_json("/files/attach", request).await
    }
}

/// Base64 used for binary fields in the registration record.
pub fn encode_binary(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}
