//! Configuration module
//!
//! Run configuration for the upload client, loaded from the environment
//! (with `.env` support via dotenvy). Chunking geometry is deliberately not
//! configurable; see the constants in the crate root.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024 * 1024;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;
const DEFAULT_PROGRESS_STALL_SECS: u64 = 30;

/// Upload client configuration.
#[derive(Clone, Debug)]
pub struct UploadConfig {
    /// Base URL of the remote API, e.g. `https://api.pixlock.example`.
    pub api_base_url: String,
    /// Session token for authenticated endpoints.
    pub auth_token: Option<String>,
    /// Capability token for the public-album endpoint variants.
    pub public_access_token: Option<String>,
    /// Number of parallel upload workers.
    pub concurrency: usize,
    /// Files larger than this short-circuit to `TooLarge` without touching
    /// the network.
    pub max_upload_bytes: u64,
    /// Overall per-request timeout.
    pub request_timeout: Duration,
    /// A transfer whose progress callback stalls longer than this is
    /// aborted and counted as a failure for that asset.
    pub progress_stall_timeout: Duration,
    /// Where the mark-uploaded store persists its state (desktop resume).
    pub mark_uploaded_path: Option<PathBuf>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080".to_string(),
            auth_token: None,
            public_access_token: None,
            concurrency: DEFAULT_CONCURRENCY,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            progress_stall_timeout: Duration::from_secs(DEFAULT_PROGRESS_STALL_SECS),
            mark_uploaded_path: None,
        }
    }
}

impl UploadConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            api_base_url: env::var("PIXLOCK_API_URL").unwrap_or(defaults.api_base_url),
            auth_token: env::var("PIXLOCK_AUTH_TOKEN").ok(),
            public_access_token: env::var("PIXLOCK_ACCESS_TOKEN").ok(),
            concurrency: parse_env("PIXLOCK_CONCURRENCY", defaults.concurrency)?,
            max_upload_bytes: parse_env("PIXLOCK_MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            request_timeout: Duration::from_secs(parse_env(
                "PIXLOCK_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?),
            progress_stall_timeout: Duration::from_secs(parse_env(
                "PIXLOCK_PROGRESS_STALL_SECS",
                DEFAULT_PROGRESS_STALL_SECS,
            )?),
            mark_uploaded_path: env::var("PIXLOCK_MARK_UPLOADED_PATH").ok().map(PathBuf::from),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.concurrency == 0 {
            anyhow::bail!("PIXLOCK_CONCURRENCY must be at least 1");
        }
        if self.max_upload_bytes == 0 {
            anyhow::bail!("PIXLOCK_MAX_UPLOAD_BYTES must be non-zero");
        }
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://") {
            anyhow::bail!("PIXLOCK_API_URL must be an http(s) URL");
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, anyhow::Error>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", key, e)),
        Err(_) => Ok(default),
    }
}
