use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Default part size used when the client does not choose one (8 MiB).
pub const DEFAULT_PART_SIZE: i64 = 8 * 1024 * 1024;

/// Smallest part the store protocol accepts for non-final parts (5 MiB).
pub const MIN_PART_SIZE: i64 = 5 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,

    /// Directory where server-driven jobs buffer incoming files.
    pub scratch_dir: String,

    /// S3-compatible endpoint override; None uses the SDK default chain.
    pub s3_endpoint: Option<String>,
    pub s3_region: String,
    pub s3_bucket: String,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
    /// Path-style addressing, required by most S3-compatible stores.
    pub s3_force_path_style: bool,

    pub policy: UploadPolicy,
}

/// Validation limits and scheduling knobs shared by the upload services.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    /// Content-type prefixes accepted for upload (e.g. `video/`).
    pub accepted_content_types: Vec<String>,

    /// Hard ceiling on declared/actual file size, bytes.
    pub max_file_size: i64,

    /// Part size used when the client does not supply one.
    pub default_part_size: i64,

    /// Lower bound on client-chosen part sizes.
    pub min_part_size: i64,

    /// Upper bound on client-chosen part sizes.
    pub max_part_size: i64,

    /// Lifetime of pre-signed URLs, minutes.
    pub presign_expiry_minutes: i64,

    /// Largest allowed `end_part - start_part + 1` in one presign call.
    pub max_presign_batch: i32,

    /// Maximum number of streaming jobs uploading concurrently.
    pub upload_workers: usize,

    /// How long terminal job snapshots stay visible to pollers, seconds.
    pub job_retention_secs: u64,

    /// Interval between registry eviction sweeps, seconds.
    pub sweep_interval_secs: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Resumable multipart upload gateway")]
pub struct Args {
    /// Host to bind to (overrides UPLOAD_GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides UPLOAD_GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides UPLOAD_GATEWAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Scratch directory for buffered uploads (overrides UPLOAD_GATEWAY_SCRATCH_DIR)
    #[arg(long)]
    pub scratch_dir: Option<String>,

    /// Object store bucket (overrides UPLOAD_GATEWAY_S3_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Object store endpoint URL (overrides UPLOAD_GATEWAY_S3_ENDPOINT)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("UPLOAD_GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env("UPLOAD_GATEWAY_PORT", 3000u16)?;
        let env_db = env::var("UPLOAD_GATEWAY_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/upload_gateway.db".into());
        let env_scratch =
            env::var("UPLOAD_GATEWAY_SCRATCH_DIR").unwrap_or_else(|_| "./data/scratch".into());

        let env_endpoint = env::var("UPLOAD_GATEWAY_S3_ENDPOINT").ok();
        let s3_region =
            env::var("UPLOAD_GATEWAY_S3_REGION").unwrap_or_else(|_| "us-east-1".into());
        let env_bucket = env::var("UPLOAD_GATEWAY_S3_BUCKET").unwrap_or_else(|_| "uploads".into());
        let s3_access_key = env::var("UPLOAD_GATEWAY_S3_ACCESS_KEY").ok();
        let s3_secret_key = env::var("UPLOAD_GATEWAY_S3_SECRET_KEY").ok();
        let s3_force_path_style = parse_env("UPLOAD_GATEWAY_S3_FORCE_PATH_STYLE", true)?;

        let accepted_content_types = env::var("UPLOAD_GATEWAY_ACCEPTED_CONTENT_TYPES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_else(|_| vec!["video/".to_string()]);

        let policy = UploadPolicy {
            accepted_content_types,
            max_file_size: parse_env("UPLOAD_GATEWAY_MAX_FILE_SIZE", 10 * 1024 * 1024 * 1024i64)?,
            default_part_size: parse_env("UPLOAD_GATEWAY_DEFAULT_PART_SIZE", DEFAULT_PART_SIZE)?,
            min_part_size: parse_env("UPLOAD_GATEWAY_MIN_PART_SIZE", MIN_PART_SIZE)?,
            max_part_size: parse_env("UPLOAD_GATEWAY_MAX_PART_SIZE", 100 * 1024 * 1024i64)?,
            presign_expiry_minutes: parse_env("UPLOAD_GATEWAY_PRESIGN_EXPIRY_MINUTES", 15i64)?,
            max_presign_batch: parse_env("UPLOAD_GATEWAY_MAX_PRESIGN_BATCH", 100i32)?,
            upload_workers: parse_env("UPLOAD_GATEWAY_UPLOAD_WORKERS", 4usize)?,
            job_retention_secs: parse_env("UPLOAD_GATEWAY_JOB_RETENTION_SECS", 600u64)?,
            sweep_interval_secs: parse_env("UPLOAD_GATEWAY_SWEEP_INTERVAL_SECS", 60u64)?,
        };

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            scratch_dir: args.scratch_dir.unwrap_or(env_scratch),
            s3_endpoint: args.endpoint.or(env_endpoint),
            s3_region,
            s3_bucket: args.bucket.unwrap_or(env_bucket),
            s3_access_key,
            s3_secret_key,
            s3_force_path_style,
            policy,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read an env var and parse it, falling back to `default` when unset.
fn parse_env<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).context(format!("reading {}", name)),
    }
}
