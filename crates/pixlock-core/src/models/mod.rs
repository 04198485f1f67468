//! Shared data model for the upload pipeline.

mod asset;
mod encrypted;
mod file_type;
mod item;
mod metadata;
mod outcome;

pub use asset::{Asset, AssetKind, SourceFile};
pub use encrypted::{EncryptedAsset, EncryptedBlob, EncryptedBody};
pub use file_type::{FileKind, FileTypeInfo};
pub use item::UploadItem;
pub use metadata::{Location, ParsedMetadata, SidecarEntry};
pub use outcome::{UploadOutcome, UploadUrl};
