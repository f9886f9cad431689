use anyhow::Result;
use axum::{Router, extract::DefaultBodyLimit};
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, io::ErrorKind, path::Path, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use routes::routes::AppState;
use services::{
    job_service::JobService,
    metadata_store::MetadataStore,
    object_store::{ObjectStore, S3ObjectStore},
    upload_service::UploadService,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!(
        addr = %cfg.addr(),
        bucket = %cfg.s3_bucket,
        endpoint = cfg.s3_endpoint.as_deref().unwrap_or("<sdk default>"),
        scratch_dir = %cfg.scratch_dir,
        "Starting upload-gateway"
    );

    // --- Ensure scratch directory exists ---
    if !Path::new(&cfg.scratch_dir).exists() {
        fs::create_dir_all(&cfg.scratch_dir)?;
        tracing::info!("Created scratch directory at {}", cfg.scratch_dir);
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");

    // Create parent directory and database file if needed; SQLite will not
    // create either on its own with a plain URL.
    let db_path_obj = Path::new(db_path);
    if let Some(parent) = db_path_obj.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    if !db_path_obj.exists() {
        fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(db_path)?;
    }

    let db: Arc<sqlx::Pool<sqlx::Sqlite>> = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await?,
    );

    // --- Handle migration mode ---
    if migrate {
        run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize core services ---
    let store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::connect(&cfg).await);
    let metadata = MetadataStore::new(db.clone());
    let uploads = UploadService::new(store.clone(), metadata.clone(), cfg.policy.clone());
    let jobs = JobService::new(store, metadata, cfg.policy.clone());
    jobs.spawn_sweeper();

    let state = AppState {
        uploads,
        jobs,
        db: db.clone(),
        scratch_dir: PathBuf::from(&cfg.scratch_dir),
    };

    // --- Build router ---
    // Server-driven submissions carry whole files, so the body limit tracks
    // the configured file-size ceiling plus form-encoding overhead.
    let body_limit = cfg.policy.max_file_size.max(0) as usize + 1024 * 1024;
    let app: Router = routes::routes::routes()
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Run SQLite migrations manually from the embedded SQL file.
async fn run_migrations(db: &Arc<sqlx::Pool<sqlx::Sqlite>>) -> Result<()> {
    let path = "migrations/0001_init.sql";

    if !Path::new(path).exists() {
        anyhow::bail!("Migration file not found: {}", path);
    }

    let sql = fs::read_to_string(path)?;
    let statements = sql
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(&**db).await?;
    }

    Ok(())
}
