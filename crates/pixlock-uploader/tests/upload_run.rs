//! End-to-end runs against an in-memory remote API.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use pixlock_core::{UploadConfig, UploadItem, UploadOutcome, UploadResult, UploadUrl};
use pixlock_crypto::generate_key;
use pixlock_transport::{
    AttachExistingFile, FileRegistration, MultipartUploadUrls, RegisteredFile, UploadApi,
};
use pixlock_uploader::{
    DedupIndex, EnqueuedFile, InMemoryDedupIndex, JsonFileMarker, MarkUploadedStore, UploadRun,
};

const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46];

/// Remote side that stores nothing but remembers every call.
#[derive(Default)]
struct FakeRemote {
    url_counter: AtomicUsize,
    puts: Mutex<Vec<String>>,
    registrations: Mutex<Vec<FileRegistration>>,
    attachments: Mutex<Vec<AttachExistingFile>>,
    /// When set, the first PUT cancels this token (simulates the user
    /// hitting cancel while bytes are on the wire).
    cancel_on_first_put: Mutex<Option<CancellationToken>>,
}

impl FakeRemote {
    fn put_count(&self) -> usize {
        self.puts.lock().unwrap().len()
    }
}

#[async_trait]
impl UploadApi for FakeRemote {
    async fn fetch_upload_urls(&self, count: usize) -> UploadResult<Vec<UploadUrl>> {
        Ok((0..count)
            .map(|_| {
                let n = self.url_counter.fetch_add(1, Ordering::SeqCst);
                UploadUrl {
                    object_key: format!("obj/{n}"),
                    url: format!("https://storage/obj/{n}"),
                }
            })
            .collect())
    }

    async fn fetch_multipart_upload_urls(
        &self,
        count: usize,
    ) -> UploadResult<MultipartUploadUrls> {
        let n = self.url_counter.fetch_add(1, Ordering::SeqCst);
        Ok(MultipartUploadUrls {
            object_key: format!("multi/{n}"),
            part_urls: (0..count)
                .map(|i| format!("https://storage/multi/{n}/{i}"))
                .collect(),
            complete_url: format!("https://storage/multi/{n}/complete"),
        })
    }

    async fn put_object(&self, url: &str, _body: Bytes) -> UploadResult<Option<String>> {
        if let Some(token) = self.cancel_on_first_put.lock().unwrap().take() {
            token.cancel();
        }
        let mut puts = self.puts.lock().unwrap();
        puts.push(url.to_string());
        Ok(Some(format!("etag-{}", puts.len())))
    }

    async fn complete_multipart(&self, _url: &str, _body: String) -> UploadResult<()> {
        Ok(())
    }

    async fn register_file(&self, record: &FileRegistration) -> UploadResult<RegisteredFile> {
        self.registrations.lock().unwrap().push(record.clone());
        Ok(RegisteredFile { id: Uuid::new_v4() })
    }

    async fn attach_existing(&self, request: &AttachExistingFile) -> UploadResult<RegisteredFile> {
        self.attachments.lock().unwrap().push(request.clone());
        Ok(RegisteredFile {
            id: request.file_id,
        })
    }
}

fn memory_file(name: &str, data: &[u8], collection: Uuid) -> EnqueuedFile {
    EnqueuedFile {
        item: UploadItem::Memory {
            data: Bytes::copy_from_slice(data),
            last_modified: Utc::now(),
        },
        file_name: name.to_string(),
        collection_id: collection,
        metadata_override: None,
    }
}

fn new_run(
    api: Arc<FakeRemote>,
    dedup: Arc<InMemoryDedupIndex>,
    collection: Uuid,
    key: pixlock_crypto::AssetKey,
) -> UploadRun {
    let mut run = UploadRun::new(UploadConfig::default(), api, dedup);
    run.add_collection_key(collection, key);
    run
}

#[tokio::test]
async fn uploads_register_and_populate_the_dedup_index() {
    let api = Arc::new(FakeRemote::default());
    let dedup = Arc::new(InMemoryDedupIndex::new());
    let col = Uuid::new_v4();
    let key = generate_key();

    let report = new_run(api.clone(), dedup.clone(), col, key)
        .run(vec![
            memory_file("IMG_0001.jpg", JPEG_MAGIC, col),
            memory_file("IMG_0002.jpg", JPEG_MAGIC, col),
        ])
        .await;

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.successes(), 2);
    // Raw magic bytes do not decode, so the static placeholder is used.
    assert!(matches!(
        report.outcome_for("IMG_0001.jpg"),
        Some(UploadOutcome::UploadedWithStaticThumbnail { .. })
    ));
    // One body PUT and one thumbnail PUT per asset.
    assert_eq!(api.put_count(), 4);
    assert_eq!(api.registrations.lock().unwrap().len(), 2);
    assert_eq!(dedup.len(), 2);
}

#[tokio::test]
async fn second_upload_of_same_content_short_circuits_without_puts() {
    let api = Arc::new(FakeRemote::default());
    let dedup = Arc::new(InMemoryDedupIndex::new());
    let col = Uuid::new_v4();
    let key = generate_key();

    new_run(api.clone(), dedup.clone(), col, key)
        .run(vec![memory_file("IMG_0001.jpg", JPEG_MAGIC, col)])
        .await;
    let puts_after_first = api.put_count();

    let report = new_run(api.clone(), dedup.clone(), col, key)
        .run(vec![memory_file("IMG_0001.jpg", JPEG_MAGIC, col)])
        .await;

    assert!(matches!(
        report.outcome_for("IMG_0001.jpg"),
        Some(UploadOutcome::AlreadyUploaded { .. })
    ));
    assert_eq!(api.put_count(), puts_after_first);
    assert_eq!(api.registrations.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn duplicate_in_another_collection_is_attached_not_reuploaded() {
    let api = Arc::new(FakeRemote::default());
    let dedup = Arc::new(InMemoryDedupIndex::new());
    let col_a = Uuid::new_v4();
    let col_b = Uuid::new_v4();
    let key = generate_key();

    new_run(api.clone(), dedup.clone(), col_a, key)
        .run(vec![memory_file("IMG_0001.jpg", JPEG_MAGIC, col_a)])
        .await;
    let puts_after_first = api.put_count();

    let mut run = new_run(api.clone(), dedup.clone(), col_b, key);
    run.add_collection_key(col_b, key);
    let report = run
        .run(vec![memory_file("IMG_0001.jpg", JPEG_MAGIC, col_b)])
        .await;

    assert!(matches!(
        report.outcome_for("IMG_0001.jpg"),
        Some(UploadOutcome::AddedSymlink { .. })
    ));
    assert_eq!(api.put_count(), puts_after_first);
    let attachments = api.attachments.lock().unwrap();
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].collection_id, col_b);
    // The attach is now findable in the target collection too.
    assert_eq!(dedup.len(), 2);
}

#[tokio::test]
async fn sidecar_capture_time_reaches_the_index() {
    let api = Arc::new(FakeRemote::default());
    let dedup = Arc::new(InMemoryDedupIndex::new());
    let col = Uuid::new_v4();
    let key = generate_key();

    new_run(api.clone(), dedup.clone(), col, key)
        .run(vec![
            memory_file(
                "IMG_0001.jpg.json",
                br#"{"photoTakenTime": {"timestamp": "1621837411"}}"#,
                col,
            ),
            memory_file("IMG_0001.jpg", JPEG_MAGIC, col),
        ])
        .await;

    let known = dedup
        .find_candidates(pixlock_core::FileKind::Image, "IMG_0001.jpg")
        .await
        .unwrap();
    assert_eq!(known.len(), 1);
    assert_eq!(known[0].creation_time.unwrap().timestamp(), 1621837411);
    assert!(known[0].hash.is_some());
}

#[tokio::test]
async fn oversized_file_short_circuits_without_network() {
    let api = Arc::new(FakeRemote::default());
    let dedup = Arc::new(InMemoryDedupIndex::new());
    let col = Uuid::new_v4();

    let config = UploadConfig {
        max_upload_bytes: 4,
        ..Default::default()
    };
    let mut run = UploadRun::new(config, api.clone(), dedup);
    run.add_collection_key(col, generate_key());

    let report = run
        .run(vec![memory_file("IMG_0001.jpg", JPEG_MAGIC, col)])
        .await;

    assert_eq!(
        report.outcome_for("IMG_0001.jpg"),
        Some(&UploadOutcome::TooLarge)
    );
    assert_eq!(api.put_count(), 0);
}

#[tokio::test]
async fn cancellation_mid_run_stops_all_further_puts() {
    let api = Arc::new(FakeRemote::default());
    let dedup = Arc::new(InMemoryDedupIndex::new());
    let col = Uuid::new_v4();

    let config = UploadConfig {
        concurrency: 1,
        ..Default::default()
    };
    let mut run = UploadRun::new(config, api.clone(), dedup);
    run.add_collection_key(col, generate_key());
    *api.cancel_on_first_put.lock().unwrap() = Some(run.cancellation_token());

    let report = run
        .run(vec![
            memory_file("IMG_0001.jpg", JPEG_MAGIC, col),
            memory_file("IMG_0002.jpg", JPEG_MAGIC, col),
            memory_file("IMG_0003.jpg", JPEG_MAGIC, col),
        ])
        .await;

    // The PUT that observed the cancellation is the only one issued.
    assert_eq!(api.put_count(), 1);
    assert_eq!(report.outcomes.len(), 3);
    for report in &report.outcomes {
        assert_eq!(report.outcome, UploadOutcome::Cancelled);
    }
}

#[tokio::test]
async fn live_pair_uploads_as_one_asset() {
    let api = Arc::new(FakeRemote::default());
    let dedup = Arc::new(InMemoryDedupIndex::new());
    let col = Uuid::new_v4();
    let key = generate_key();

    let report = new_run(api.clone(), dedup.clone(), col, key)
        .run(vec![
            memory_file("IMG_0001.heic", &[1u8; 64], col),
            memory_file("IMG_0001.mp4", &[2u8; 64], col),
        ])
        .await;

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.successes(), 1);
    assert_eq!(report.outcomes[0].title, "IMG_0001.heic");
    assert_eq!(api.registrations.lock().unwrap().len(), 1);
    assert_eq!(api.put_count(), 2);
}

#[tokio::test]
async fn path_files_are_marked_uploaded_for_resume() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("IMG_0001.jpg");
    std::fs::write(&path, JPEG_MAGIC).unwrap();

    let api = Arc::new(FakeRemote::default());
    let dedup = Arc::new(InMemoryDedupIndex::new());
    let col = Uuid::new_v4();
    let marker = Arc::new(
        JsonFileMarker::load(dir.path().join("uploaded.json"))
            .await
            .unwrap(),
    );

    let mut run = UploadRun::new(UploadConfig::default(), api.clone(), dedup)
        .with_marker(marker.clone());
    run.add_collection_key(col, generate_key());

    let report = run
        .run(vec![EnqueuedFile {
            item: UploadItem::Path(path.clone()),
            file_name: "IMG_0001.jpg".to_string(),
            collection_id: col,
            metadata_override: None,
        }])
        .await;

    assert_eq!(report.successes(), 1);
    assert!(marker
        .is_marked(&path.to_string_lossy())
        .await
        .unwrap());
}
