//! Uniform chunked reading of upload items.
//!
//! `open_source` is the single exhaustive match over [`UploadItem`]; every
//! other component consumes the resulting [`OpenedSource`]. Streams yield
//! chunks of exactly [`CHUNK_SIZE`] bytes except the final, shorter one.
//! The underlying source's natural read size (filesystem block, archive
//! buffer) does not line up with the encryption chunk size, so a carry
//! buffer re-slices the bytes on the way through.

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, TimeZone, Utc};
use std::io::Read;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use pixlock_core::{UploadError, UploadItem, UploadResult, CHUNK_SIZE};

/// How many chunks may sit in the channel between reader and consumer.
/// Chunks are large, so this bounds memory to a few chunks per source.
const CHANNEL_DEPTH: usize = 2;

/// Read buffer for the underlying filesystem/archive reads.
const READ_BUF_SIZE: usize = 256 * 1024;

/// Size and mtime of a source, obtainable without consuming it.
#[derive(Debug, Clone, Copy)]
pub struct SourceStat {
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// A one-shot sequence of fixed-size chunks. Consuming it exhausts the
/// source; re-reading requires calling [`open_source`] again.
pub struct ChunkStream {
    rx: mpsc::Receiver<UploadResult<Bytes>>,
}

impl ChunkStream {
    pub async fn next_chunk(&mut self) -> Option<UploadResult<Bytes>> {
        self.rx.recv().await
    }

    /// Hand the underlying channel to another stage (the encryptor
    /// consumes plaintext chunks directly).
    pub fn into_receiver(self) -> mpsc::Receiver<UploadResult<Bytes>> {
        self.rx
    }

    /// Drain the stream into a single buffer. Used for small files that
    /// take the single-PUT transport path.
    pub async fn collect(mut self) -> UploadResult<Bytes> {
        let mut all = BytesMut::new();
        while let Some(chunk) = self.next_chunk().await {
            all.extend_from_slice(&chunk?);
        }
        Ok(all.freeze())
    }
}

/// An opened source: the chunk stream plus the facts every downstream
/// stage needs.
pub struct OpenedSource {
    pub stream: ChunkStream,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Re-slices arbitrarily sized input into fixed-size chunks, carrying the
/// remainder between pushes.
pub(crate) struct Rechunker {
    carry: BytesMut,
}

impl Rechunker {
    pub fn new() -> Self {
        Self {
            carry: BytesMut::with_capacity(CHUNK_SIZE),
        }
    }

    /// Feed bytes in; get back every complete chunk now available.
    pub fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.carry.extend_from_slice(data);
        let mut full = Vec::new();
        while self.carry.len() >= CHUNK_SIZE {
            full.push(self.carry.split_to(CHUNK_SIZE).freeze());
        }
        full
    }

    /// The final (possibly empty) chunk.
    pub fn finish(self) -> Bytes {
        self.carry.freeze()
    }
}

/// Open an upload item for one-shot chunked reading.
pub async fn open_source(item: &UploadItem) -> UploadResult<OpenedSource> {
    match item {
        UploadItem::Memory {
            data,
            last_modified,
        }
        | UploadItem::MemoryWithPath {
            data,
            last_modified,
            ..
        } => Ok(open_memory(data.clone(), *last_modified)),
        UploadItem::Path(path) => open_path(path).await,
        UploadItem::ZipEntry { archive, entry } => open_zip_entry(archive, entry).await,
    }
}

/// Size and mtime without consuming the source.
pub async fn stat_source(item: &UploadItem) -> UploadResult<SourceStat> {
    match item {
        UploadItem::Memory {
            data,
            last_modified,
        }
        | UploadItem::MemoryWithPath {
            data,
            last_modified,
            ..
        } => Ok(SourceStat {
            size: data.len() as u64,
            last_modified: *last_modified,
        }),
        UploadItem::Path(path) => {
            let meta = tokio::fs::metadata(path).await?;
            Ok(SourceStat {
                size: meta.len(),
                last_modified: fs_mtime(&meta),
            })
        }
        UploadItem::ZipEntry { archive, entry } => {
            let archive = archive.clone();
            let entry = entry.clone();
            tokio::task::spawn_blocking(move || zip_stat(&archive, &entry))
                .await
                .map_err(|e| UploadError::Internal(format!("zip stat task panicked: {e}")))?
        }
    }
}

/// Read the first `limit` bytes of a source, for content sniffing.
pub async fn read_prefix(item: &UploadItem, limit: usize) -> UploadResult<Bytes> {
    match item {
        UploadItem::Memory { data, .. } | UploadItem::MemoryWithPath { data, .. } => {
            Ok(data.slice(..data.len().min(limit)))
        }
        UploadItem::Path(path) => {
            let mut file = tokio::fs::File::open(path).await?;
            let mut buf = vec![0u8; limit];
            let mut filled = 0;
            while filled < limit {
                let n = file.read(&mut buf[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            buf.truncate(filled);
            Ok(Bytes::from(buf))
        }
        UploadItem::ZipEntry { archive, entry } => {
            let archive = archive.clone();
            let entry = entry.clone();
            tokio::task::spawn_blocking(move || zip_prefix(&archive, &entry, limit))
                .await
                .map_err(|e| UploadError::Internal(format!("zip read task panicked: {e}")))?
        }
    }
}

fn open_memory(data: Bytes, last_modified: DateTime<Utc>) -> OpenedSource {
    let size = data.len() as u64;
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    tokio::spawn(async move {
        let mut offset = 0;
        loop {
            let end = (offset + CHUNK_SIZE).min(data.len());
            let chunk = data.slice(offset..end);
            let last = end == data.len();
            if tx.send(Ok(chunk)).await.is_err() {
                return;
            }
            if last {
                return;
            }
            offset = end;
        }
    });
    OpenedSource {
        stream: ChunkStream { rx },
        size,
        last_modified,
    }
}

async fn open_path(path: &Path) -> UploadResult<OpenedSource> {
    let meta = tokio::fs::metadata(path).await?;
    let size = meta.len();
    let last_modified = fs_mtime(&meta);
    let mut file = tokio::fs::File::open(path).await?;

    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    tokio::spawn(async move {
        let mut rechunker = Rechunker::new();
        let mut buf = vec![0u8; READ_BUF_SIZE];
        let mut emitted = false;
        loop {
            match file.read(&mut buf).await {
                Ok(0) => {
                    // A source that is an exact multiple of CHUNK_SIZE has no
                    // carry; only an empty source still owes its one chunk.
                    let last = rechunker.finish();
                    if !last.is_empty() || !emitted {
                        let _ = tx.send(Ok(last)).await;
                    }
                    return;
                }
                Ok(n) => {
                    for chunk in rechunker.push(&buf[..n]) {
                        if tx.send(Ok(chunk)).await.is_err() {
                            return;
                        }
                        emitted = true;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e.into())).await;
                    return;
                }
            }
        }
    });

    Ok(OpenedSource {
        stream: ChunkStream { rx },
        size,
        last_modified,
    })
}

async fn open_zip_entry(archive: &Path, entry: &str) -> UploadResult<OpenedSource> {
    let stat = {
        let archive = archive.to_path_buf();
        let entry = entry.to_string();
        tokio::task::spawn_blocking(move || zip_stat(&archive, &entry))
            .await
            .map_err(|e| UploadError::Internal(format!("zip stat task panicked: {e}")))??
    };

    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    let archive = archive.to_path_buf();
    let entry = entry.to_string();
    tokio::task::spawn_blocking(move || {
        let send = |msg| tx.blocking_send(msg).is_ok();
        let mut zip = match open_archive(&archive) {
            Ok(zip) => zip,
            Err(e) => {
                send(Err(e));
                return;
            }
        };
        let mut file = match zip.by_name(&entry) {
            Ok(file) => file,
            Err(e) => {
                send(Err(UploadError::Source(format!(
                    "zip entry {entry} not readable: {e}"
                ))));
                return;
            }
        };
        let mut rechunker = Rechunker::new();
        let mut buf = vec![0u8; READ_BUF_SIZE];
        let mut emitted = false;
        loop {
            match file.read(&mut buf) {
                Ok(0) => {
                    let last = rechunker.finish();
                    if !last.is_empty() || !emitted {
                        send(Ok(last));
                    }
                    return;
                }
                Ok(n) => {
                    for chunk in rechunker.push(&buf[..n]) {
                        if !send(Ok(chunk)) {
                            return;
                        }
                        emitted = true;
                    }
                }
                Err(e) => {
                    send(Err(e.into()));
                    return;
                }
            }
        }
    });

    Ok(OpenedSource {
        stream: ChunkStream { rx },
        size: stat.size,
        last_modified: stat.last_modified,
    })
}

fn open_archive(path: &Path) -> UploadResult<zip::ZipArchive<std::fs::File>> {
    let file = std::fs::File::open(path)?;
    zip::ZipArchive::new(file)
        .map_err(|e| UploadError::Source(format!("invalid zip archive {}: {e}", path.display())))
}

fn zip_stat(archive: &Path, entry: &str) -> UploadResult<SourceStat> {
    let mut zip = open_archive(archive)?;
    let file = zip
        .by_name(entry)
        .map_err(|e| UploadError::Source(format!("zip entry {entry} not found: {e}")))?;
    Ok(SourceStat {
        size: file.size(),
        last_modified: zip_mtime(&file),
    })
}

fn zip_prefix(archive: &Path, entry: &str, limit: usize) -> UploadResult<Bytes> {
    let mut zip = open_archive(archive)?;
    let file = zip
        .by_name(entry)
        .map_err(|e| UploadError::Source(format!("zip entry {entry} not found: {e}")))?;
    let mut buf = Vec::with_capacity(limit);
    file.take(limit as u64).read_to_end(&mut buf)?;
    Ok(Bytes::from(buf))
}

fn zip_mtime(file: &zip::read::ZipFile) -> DateTime<Utc> {
    let dt = file.last_modified();
    Utc.with_ymd_and_hms(
        dt.year() as i32,
        dt.month() as u32,
        dt.day() as u32,
        dt.hour() as u32,
        dt.minute() as u32,
        dt.second() as u32,
    )
    .single()
    .unwrap_or_else(Utc::now)
}

fn fs_mtime(meta: &std::fs::Metadata) -> DateTime<Utc> {
    meta.modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}
