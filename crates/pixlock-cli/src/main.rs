//! pixlock CLI — end-to-end-encrypted media upload client.
//!
//! Set PIXLOCK_API_URL and PIXLOCK_AUTH_TOKEN (or PIXLOCK_ACCESS_TOKEN for
//! public albums). The collection key is passed base64-encoded.

use anyhow::{bail, Context};
use base64::Engine;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use pixlock_cli::{init_tracing, truncate};
use pixlock_core::{UploadConfig, UploadItem, UploadOutcome};
use pixlock_crypto::{AssetKey, KEY_LEN};
use pixlock_transport::{Auth, RemoteClient};
use pixlock_uploader::{EnqueuedFile, InMemoryDedupIndex, JsonFileMarker, RunReport, UploadRun};

#[derive(Parser)]
#[command(name = "pixlock", about = "Encrypted media upload client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload files, directories or zip archives into a collection
    Upload {
        /// Files, directories or .zip archives to upload
        paths: Vec<PathBuf>,
        /// Destination collection UUID
        #[arg(long)]
        collection: Uuid,
        /// Collection key, base64 (defaults to PIXLOCK_COLLECTION_KEY)
        #[arg(long)]
        key: Option<String>,
    },
    /// Generate a fresh collection key
    Keygen,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Upload {
            paths,
            collection,
            key,
        } => upload(paths, collection, key).await,
        Commands::Keygen => {
            let key = pixlock_crypto::generate_key();
            println!(
                "{}",
                base64::engine::general_purpose::STANDARD.encode(key)
            );
            Ok(())
        }
    }
}

async fn upload(
    paths: Vec<PathBuf>,
    collection: Uuid,
    key: Option<String>,
) -> anyhow::Result<()> {
    let config = UploadConfig::from_env().context("Failed to load configuration")?;
    let key = decode_key(key)?;

    let auth = match (&config.auth_token, &config.public_access_token) {
        (Some(token), _) => Auth::Session(token.clone()),
        (None, Some(token)) => Auth::PublicAlbum(token.clone()),
        (None, None) => bail!("Set PIXLOCK_AUTH_TOKEN or PIXLOCK_ACCESS_TOKEN"),
    };
    let api = Arc::new(RemoteClient::new(
        &config.api_base_url,
        auth,
        config.request_timeout,
        config.progress_stall_timeout,
    )?);

    let mut files = Vec::new();
    for path in &paths {
        collect_files(path, collection, &mut files)?;
    }
    if files.is_empty() {
        bail!("Nothing to upload");
    }
    tracing::info!(files = files.len(), %collection, "Starting upload");

    let dedup = Arc::new(InMemoryDedupIndex::new());
    let mut run = UploadRun::new(config.clone(), api, dedup);
    if let Some(path) = &config.mark_uploaded_path {
        let marker = JsonFileMarker::load(path.clone())
            .await
            .with_context(|| format!("Cannot open mark-uploaded store {}", path.display()))?;
        run = run.with_marker(Arc::new(marker));
    }
    run.add_collection_key(collection, key);

    let cancel = run.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let mut progress = run.progress();
    tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let percent = *progress.borrow_and_update();
            tracing::info!(percent = format_args!("{percent:.1}"), "Upload progress");
        }
    });

    let report = run.run(files).await;
    print_report(&report);

    let failed = report.outcomes.len() - report.successes();
    if failed > 0 {
        bail!("{failed} of {} files did not upload", report.outcomes.len());
    }
    Ok(())
}

fn decode_key(arg: Option<String>) -> anyhow::Result<AssetKey> {
    let encoded = match arg {
        Some(key) => key,
        None => std::env::var("PIXLOCK_COLLECTION_KEY")
            .context("Pass --key or set PIXLOCK_COLLECTION_KEY")?,
    };
    let raw = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .context("Collection key is not valid base64")?;
    let key: AssetKey = raw
        .try_into()
        .map_err(|_| anyhow::anyhow!("Collection key must be {KEY_LEN} bytes"))?;
    Ok(key)
}

fn collect_files(
    path: &Path,
    collection: Uuid,
    out: &mut Vec<EnqueuedFile>,
) -> anyhow::Result<()> {
    let meta = std::fs::metadata(path)
        .with_context(|| format!("Cannot read {}", path.display()))?;

    if meta.is_dir() {
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            collect_files(&entry.path(), collection, out)?;
        }
        return Ok(());
    }

    if path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
    {
        return collect_zip_entries(path, collection, out);
    }

    let file_name = path
        .file_name()
        .with_context(|| format!("{} has no file name", path.display()))?
        .to_string_lossy()
        .into_owned();
    out.push(EnqueuedFile {
        item: UploadItem::Path(path.to_path_buf()),
        file_name,
        collection_id: collection,
        metadata_override: None,
    });
    Ok(())
}

/// Enqueue each file inside the archive without extracting it; the source
/// reader streams entries straight out of the zip.
fn collect_zip_entries(
    archive: &Path,
    collection: Uuid,
    out: &mut Vec<EnqueuedFile>,
) -> anyhow::Result<()> {
    let file = std::fs::File::open(archive)?;
    let zip = zip::ZipArchive::new(file)
        .with_context(|| format!("{} is not a readable zip archive", archive.display()))?;

    let names: Vec<String> = zip.file_names().map(str::to_string).collect();
    for name in names {
        if name.ends_with('/') || name.starts_with("__MACOSX/") {
            continue;
        }
        let base = name.rsplit('/').next().unwrap_or(name.as_str());
        if base.starts_with('.') {
            continue;
        }
        out.push(EnqueuedFile {
            item: UploadItem::ZipEntry {
                archive: archive.to_path_buf(),
                entry: name.clone(),
            },
            file_name: base.to_string(),
            collection_id: collection,
            metadata_override: None,
        });
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("\n{:<44} {:<38} {}", "File", "Collection", "Outcome");
    println!("{}", "-".repeat(110));
    for entry in &report.outcomes {
        println!(
            "{:<44} {:<38} {}",
            truncate(&entry.title, 44),
            entry.collection_id,
            describe(&entry.outcome)
        );
    }
    println!(
        "\n{} of {} succeeded",
        report.successes(),
        report.outcomes.len()
    );
}

fn describe(outcome: &UploadOutcome) -> String {
    match outcome {
        UploadOutcome::Uploaded { remote_id } => format!("uploaded ({remote_id})"),
        UploadOutcome::UploadedWithStaticThumbnail { remote_id } => {
            format!("uploaded, placeholder thumbnail ({remote_id})")
        }
        UploadOutcome::AlreadyUploaded { remote_id } => {
            format!("already uploaded ({remote_id})")
        }
        UploadOutcome::AddedSymlink { remote_id } => {
            format!("attached existing upload ({remote_id})")
        }
        UploadOutcome::Unsupported => "unsupported".to_string(),
        UploadOutcome::TooLarge => "too large".to_string(),
        UploadOutcome::Blocked => "blocked".to_string(),
        UploadOutcome::Cancelled => "cancelled".to_string(),
        UploadOutcome::Failed { reason } => format!("failed: {reason}"),
    }
}
