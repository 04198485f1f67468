//! Run-scoped pool of single-PUT pre-signed URLs.
//!
//! Workers take URLs one at a time; when the pool runs dry, one refill
//! fetch is issued and concurrent askers wait for it instead of issuing
//! their own. Every object key the pool has ever received is remembered:
//! a refill delivering a key twice means the server or the pool's own
//! bookkeeping is broken, and the whole run must stop before an object
//! gets overwritten.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

use pixlock_core::{UploadError, UploadResult, UploadUrl};

use crate::api::UploadApi;

/// URLs fetched per refill.
const REFILL_BATCH: usize = 10;

#[derive(Default)]
struct PoolState {
    available: VecDeque<UploadUrl>,
    seen_keys: HashSet<String>,
}

pub struct UrlPool {
    api: Arc<dyn UploadApi>,
    batch_size: usize,
    state: Mutex<PoolState>,
    /// Held for the duration of one refill fetch; waiting on it is what
    /// coalesces concurrent refills.
    refill: Mutex<()>,
}

impl UrlPool {
    pub fn new(api: Arc<dyn UploadApi>) -> Self {
        Self::with_batch_size(api, REFILL_BATCH)
    }

    pub fn with_batch_size(api: Arc<dyn UploadApi>, batch_size: usize) -> Self {
        Self {
            api,
            batch_size,
            state: Mutex::new(PoolState::default()),
            refill: Mutex::new(()),
        }
    }

    /// Take the next pre-signed URL, refilling the pool if needed. Each
    /// returned URL is consumed exactly once.
    pub async fn next_url(&self) -> UploadResult<UploadUrl> {
        loop {
            if let Some(url) = self.state.lock().await.available.pop_front() {
                return Ok(url);
            }

            let _refilling = self.refill.lock().await;
            // Another asker may have refilled while we waited for the guard.
            if let Some(url) = self.state.lock().await.available.pop_front() {
                return Ok(url);
            }

            let urls = self.api.fetch_upload_urls(self.batch_size).await?;
            if urls.is_empty() {
                // Looping on an empty batch would hammer the endpoint with
                // no way to make progress.
                return Err(UploadError::Network(
                    "upload URL refill returned an empty batch".to_string(),
                ));
            }
            tracing::debug!(count = urls.len(), "Refilled upload URL pool");
            let mut state = self.state.lock().await;
            for url in urls {
                if !state.seen_keys.insert(url.object_key.clone()) {
                    return Err(UploadError::DuplicateUploadUrl(url.object_key));
                }
                state.available.push_back(url);
            }
        }
    }
}
