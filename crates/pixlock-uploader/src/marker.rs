//! Mark-uploaded store: remembers which local files finished uploading so
//! an interrupted run can resume without re-reading everything.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tokio::sync::Mutex;

use pixlock_core::UploadResult;

/// Notified with the local descriptors of every constituent file when an
/// asset reaches a successful terminal outcome.
#[async_trait]
pub trait MarkUploadedStore: Send + Sync {
    async fn mark(&self, descriptors: &[String]) -> UploadResult<()>;

    async fn is_marked(&self, descriptor: &str) -> UploadResult<bool>;
}

/// Default store: a JSON array of descriptors on disk, rewritten on every
/// mark. Descriptors are kept sorted so the file diffs cleanly.
pub struct JsonFileMarker {
    path: PathBuf,
    state: Mutex<BTreeSet<String>>,
}

impl JsonFileMarker {
    /// Open the store, loading any state a previous run left behind.
    pub async fn load(path: PathBuf) -> UploadResult<Self> {
        let state = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }
}

#[async_trait]
impl MarkUploadedStore for JsonFileMarker {
    async fn mark(&self, descriptors: &[String]) -> UploadResult<()> {
        let mut state = self.state.lock().await;
        for descriptor in descriptors {
            state.insert(descriptor.clone());
        }
        let serialized = serde_json::to_vec_pretty(&*state)?;
        tokio::fs::write(&self.path, serialized).await?;
        Ok(())
    }

    async fn is_marked(&self, descriptor: &str) -> UploadResult<bool> {
        Ok(self.state.lock().await.contains(descriptor))
    }
}
