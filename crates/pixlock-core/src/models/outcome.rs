//! Terminal upload results and the pre-signed URL handle.

use uuid::Uuid;

/// A pre-signed upload URL, consumed at most once. The pool asserts on
/// refill that no URL is handed out twice.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrl {
    pub object_key: String,
    pub url: String,
}

/// The terminal result of one asset, recorded exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded { remote_id: Uuid },
    /// Uploaded, but every thumbnail strategy failed and the pre-baked
    /// placeholder was stored instead.
    UploadedWithStaticThumbnail { remote_id: Uuid },
    /// Identical asset already present in the destination collection.
    AlreadyUploaded { remote_id: Uuid },
    /// Identical asset existed in another collection and was added to the
    /// destination by reference, without re-uploading bytes.
    AddedSymlink { remote_id: Uuid },
    Unsupported,
    TooLarge,
    Blocked,
    Failed { reason: String },
    Cancelled,
}

impl UploadOutcome {
    /// Whether the asset's bytes (or a reference to them) are now on the
    /// server.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            UploadOutcome::Uploaded { .. }
                | UploadOutcome::UploadedWithStaticThumbnail { .. }
                | UploadOutcome::AlreadyUploaded { .. }
                | UploadOutcome::AddedSymlink { .. }
        )
    }

    pub fn remote_id(&self) -> Option<Uuid> {
        match self {
            UploadOutcome::Uploaded { remote_id }
            | UploadOutcome::UploadedWithStaticThumbnail { remote_id }
            | UploadOutcome::AlreadyUploaded { remote_id }
            | UploadOutcome::AddedSymlink { remote_id } => Some(*remote_id),
            _ => None,
        }
    }
}
