//! Upload orchestration: queue, worker pool, dedup, progress and
//! bookkeeping around the encryption and transport stages.

pub mod dedup;
pub mod intake;
pub mod marker;
mod pipeline;
pub mod progress;
pub mod run;

pub use dedup::{find_duplicate, DedupIndex, InMemoryDedupIndex, KnownAsset};
pub use intake::EnqueuedFile;
pub use marker::{JsonFileMarker, MarkUploadedStore};
pub use progress::RunProgress;
pub use run::{AssetReport, RunReport, UploadRun};
