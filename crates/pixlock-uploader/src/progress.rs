//! Run-level progress accounting.
//!
//! Every asset contributes an equal share of the run percentage. While an
//! asset's bytes are on the wire, a weighted fraction of its share tracks
//! the transfer, so large uploads move the bar before they complete.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use uuid::Uuid;

use pixlock_transport::ProgressSink;

/// How much of an asset's share the network transfer accounts for; the
/// rest is reading, hashing, encryption and registration.
const NETWORK_WEIGHT: f64 = 0.8;

pub struct RunProgress {
    total: AtomicUsize,
    completed: AtomicUsize,
    in_flight: Mutex<HashMap<Uuid, f64>>,
    tx: watch::Sender<f64>,
}

impl RunProgress {
    pub fn new() -> (Arc<Self>, watch::Receiver<f64>) {
        let (tx, rx) = watch::channel(0.0);
        (
            Arc::new(Self {
                total: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                in_flight: Mutex::new(HashMap::new()),
                tx,
            }),
            rx,
        )
    }

    pub fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
        self.publish();
    }

    /// Record in-flight transfer progress for one asset.
    pub fn transfer(&self, asset: Uuid, sent_bytes: u64, total_bytes: u64) {
        if total_bytes == 0 {
            return;
        }
        let fraction = (sent_bytes as f64 / total_bytes as f64).min(1.0);
        self.in_flight
            .lock()
            .expect("progress state poisoned")
            .insert(asset, fraction);
        self.publish();
    }

    /// The asset reached a terminal outcome; its full share counts from
    /// now on.
    pub fn complete_asset(&self, asset: Uuid) {
        self.in_flight
            .lock()
            .expect("progress state poisoned")
            .remove(&asset);
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.publish();
    }

    pub fn percent(&self) -> f64 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let completed = self.completed.load(Ordering::Relaxed) as f64;
        let network: f64 = self
            .in_flight
            .lock()
            .expect("progress state poisoned")
            .values()
            .sum();
        ((completed + network * NETWORK_WEIGHT) * 100.0 / total as f64).min(100.0)
    }

    fn publish(&self) {
        let _ = self.tx.send(self.percent());
    }
}

/// Adapter feeding one asset's transfer progress into the run total.
pub struct AssetProgress {
    run: Arc<RunProgress>,
    asset: Uuid,
}

impl AssetProgress {
    pub fn new(run: Arc<RunProgress>, asset: Uuid) -> Self {
        Self { run, asset }
    }
}

impl ProgressSink for AssetProgress {
    fn transferred(&self, sent_bytes: u64, total_bytes: u64) {
        self.run.transfer(self.asset, sent_bytes, total_bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_assets_contribute_full_shares() {
        let (progress, _rx) = RunProgress::new();
        progress.set_total(4);
        assert_eq!(progress.percent(), 0.0);

        progress.complete_asset(Uuid::new_v4());
        assert_eq!(progress.percent(), 25.0);
        progress.complete_asset(Uuid::new_v4());
        assert_eq!(progress.percent(), 50.0);
    }

    #[test]
    fn in_flight_transfer_moves_the_bar_partially() {
        let (progress, _rx) = RunProgress::new();
        progress.set_total(2);
        let asset = Uuid::new_v4();

        progress.transfer(asset, 50, 100);
        // Half the transfer, weighted, within one of two shares.
        assert!((progress.percent() - 0.5 * NETWORK_WEIGHT * 50.0).abs() < 1e-9);

        // Completion replaces the partial network share.
        progress.complete_asset(asset);
        assert_eq!(progress.percent(), 50.0);
    }

    #[test]
    fn watch_subscribers_see_updates() {
        let (progress, rx) = RunProgress::new();
        progress.set_total(1);
        progress.complete_asset(Uuid::new_v4());
        assert_eq!(*rx.borrow(), 100.0);
    }

    #[test]
    fn percent_never_exceeds_one_hundred() {
        let (progress, _rx) = RunProgress::new();
        progress.set_total(1);
        progress.complete_asset(Uuid::new_v4());
        progress.transfer(Uuid::new_v4(), 100, 100);
        assert_eq!(progress.percent(), 100.0);
    }
}
