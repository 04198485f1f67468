//! Metadata extraction, content hashing and thumbnail generation.

pub mod hash;
pub mod metadata;
pub mod thumbnail;

pub use hash::ChunkHasher;
pub use metadata::{merge_providers, sidecar::SidecarStore};
pub use thumbnail::{NativeThumbnailer, Thumbnail, ThumbnailGenerator};
