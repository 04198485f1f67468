//! Source normalization for the upload pipeline.
//!
//! This crate is the only place that matches on [`UploadItem`] variants.
//! It turns any of the four physical representations into one uniform
//! chunked byte stream (`reader`), classifies sources into image/video
//! (`detect`), and pairs image+video siblings into live-photo assets
//! (`cluster`).

pub mod cluster;
pub mod detect;
pub mod reader;

pub use cluster::{cluster_assets, ClusterCandidate};
pub use detect::{detect_file_type, SNIFF_LEN};
pub use reader::{open_source, read_prefix, stat_source, ChunkStream, OpenedSource, SourceStat};
