//! One upload run: session state, worker pool and the final report.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use pixlock_core::{Asset, UploadConfig, UploadError, UploadOutcome};
use pixlock_crypto::AssetKey;
use pixlock_processing::ThumbnailGenerator;
use pixlock_transport::{Transport, UploadApi, UrlPool};

use crate::dedup::DedupIndex;
use crate::intake::{self, EnqueuedFile};
use crate::marker::MarkUploadedStore;
use crate::pipeline::{self, RunContext};
use crate::progress::RunProgress;

/// Terminal outcome of one enqueued asset (or one file rejected at
/// intake).
#[derive(Debug)]
pub struct AssetReport {
    pub title: String,
    pub collection_id: Uuid,
    pub outcome: UploadOutcome,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<AssetReport>,
}

impl RunReport {
    pub fn successes(&self) -> usize {
        self.outcomes.iter().filter(|r| r.outcome.is_success()).count()
    }

    pub fn outcome_for(&self, title: &str) -> Option<&UploadOutcome> {
        self.outcomes
            .iter()
            .find(|r| r.title == title)
            .map(|r| &r.outcome)
    }
}

/// Session object for one upload run. Owns the queue, the URL pool, the
/// cancellation token and the progress channel; nothing here outlives the
/// run, so independent runs (and tests) never share state.
pub struct UploadRun {
    config: UploadConfig,
    api: Arc<dyn UploadApi>,
    dedup: Arc<dyn DedupIndex>,
    marker: Option<Arc<dyn MarkUploadedStore>>,
    thumbnailer: ThumbnailGenerator,
    collection_keys: HashMap<Uuid, AssetKey>,
    cancel: CancellationToken,
    progress: Arc<RunProgress>,
    progress_rx: watch::Receiver<f64>,
}

impl UploadRun {
    pub fn new(config: UploadConfig, api: Arc<dyn UploadApi>, dedup: Arc<dyn DedupIndex>) -> Self {
        let (progress, progress_rx) = RunProgress::new();
        Self {
            config,
            api,
            dedup,
            marker: None,
            thumbnailer: ThumbnailGenerator::new(),
            collection_keys: HashMap::new(),
            cancel: CancellationToken::new(),
            progress,
            progress_rx,
        }
    }

    pub fn with_marker(mut self, marker: Arc<dyn MarkUploadedStore>) -> Self {
        self.marker = Some(marker);
        self
    }

    pub fn with_thumbnailer(mut self, thumbnailer: ThumbnailGenerator) -> Self {
        self.thumbnailer = thumbnailer;
        self
    }

    /// Register the key assets destined for `collection` are wrapped
    /// under. Required for every collection that appears in the queue.
    pub fn add_collection_key(&mut self, collection: Uuid, key: AssetKey) {
        self.collection_keys.insert(collection, key);
    }

    /// Token for cancelling this run from outside. Cancellation is
    /// cooperative: in-flight stages observe it between steps and abort
    /// their requests.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run-level progress percentage, updated live.
    pub fn progress(&self) -> watch::Receiver<f64> {
        self.progress_rx.clone()
    }

    /// Execute the run to completion. Per-asset failures are recorded and
    /// the queue continues; invariant violations cancel the remainder.
    pub async fn run(self, files: Vec<EnqueuedFile>) -> RunReport {
        let intake = intake::prepare(files).await;
        let mut outcomes: Vec<AssetReport> = intake
            .rejected
            .into_iter()
            .map(|r| AssetReport {
                title: r.file_name,
                collection_id: r.collection_id,
                outcome: r.outcome,
            })
            .collect();

        let total = intake.assets.len();
        self.progress.set_total(total);
        tracing::info!(assets = total, rejected = outcomes.len(), "Starting upload run");
        if total == 0 {
            return RunReport { outcomes };
        }

        let pool = Arc::new(UrlPool::new(self.api.clone()));
        let transport = Transport::new(self.api.clone(), pool, self.cancel.clone());
        let ctx = Arc::new(RunContext {
            config: self.config,
            api: self.api,
            transport,
            dedup: self.dedup,
            marker: self.marker,
            thumbnailer: self.thumbnailer,
            sidecars: intake.sidecars,
            collection_keys: self.collection_keys,
            cancel: self.cancel.clone(),
            progress: self.progress.clone(),
        });

        let queue = Arc::new(Mutex::new(VecDeque::from(intake.assets)));
        let results: Arc<Mutex<Vec<AssetReport>>> = Arc::new(Mutex::new(Vec::new()));
        let workers = ctx.config.concurrency.clamp(1, total);
        let handles: Vec<_> = (0..workers)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    ctx.clone(),
                    queue.clone(),
                    results.clone(),
                ))
            })
            .collect();
        for handle in handles {
            if handle.await.is_err() {
                tracing::error!("Upload worker panicked");
            }
        }

        outcomes.append(&mut results.lock().expect("results poisoned"));
        let report = RunReport { outcomes };
        tracing::info!(
            total = report.outcomes.len(),
            succeeded = report.successes(),
            "Upload run finished"
        );
        report
    }
}

async fn worker_loop(
    worker_id: usize,
    ctx: Arc<RunContext>,
    queue: Arc<Mutex<VecDeque<Asset>>>,
    results: Arc<Mutex<Vec<AssetReport>>>,
) {
    loop {
        let asset = queue.lock().expect("queue poisoned").pop_front();
        let Some(asset) = asset else { return };

        let outcome = if ctx.cancel.is_cancelled() {
            UploadOutcome::Cancelled
        } else {
            match pipeline::process_asset(&ctx, &asset).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    if e.is_run_fatal() {
                        tracing::error!(error = %e, "Invariant violation, cancelling the run");
                        ctx.cancel.cancel();
                    }
                    outcome_from_error(e)
                }
            }
        };

        ctx.progress.complete_asset(asset.local_id);
        tracing::info!(
            worker_id,
            title = %asset.title(),
            outcome = ?outcome,
            "Asset finished"
        );
        results.lock().expect("results poisoned").push(AssetReport {
            title: asset.title().to_string(),
            collection_id: asset.collection_id,
            outcome,
        });
    }
}

fn outcome_from_error(e: UploadError) -> UploadOutcome {
    match e {
        UploadError::Cancelled => UploadOutcome::Cancelled,
        UploadError::UnsupportedFormat(_) => UploadOutcome::Unsupported,
        UploadError::TooLarge { .. } => UploadOutcome::TooLarge,
        UploadError::Blocked(reason) => {
            tracing::info!(%reason, "Upload blocked");
            UploadOutcome::Blocked
        }
        other => UploadOutcome::Failed {
            reason: other.to_string(),
        },
    }
}
