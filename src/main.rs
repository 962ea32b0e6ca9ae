use anyhow::{Context, Result};
use axum::{Router, extract::DefaultBodyLimit, http::Method, http::header};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::{fs, net::TcpListener};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use services::{
    pdf_repository::SqlitePdfRepository, session_store::FsSessionStore, session_sweeper,
    summarizer::HttpSummarizer, upload_service::UploadService,
};

/// Headroom on top of `max_file_size` for multipart framing and form fields.
const MULTIPART_OVERHEAD: u64 = 1024 * 1024;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting pdf-upload-backend with config: {:?}", cfg);

    // --- Ensure storage directories exist ---
    for dir in [&cfg.upload_dir, &cfg.sessions_dir] {
        if !fs::try_exists(dir).await.unwrap_or(false) {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
            tracing::info!("Created directory at {}", dir.display());
        }
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    tracing::debug!("Connecting using raw URL => {}", db_url);

    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !fs::try_exists(parent).await.unwrap_or(false) {
            fs::create_dir_all(parent).await?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parsing database URL {}", db_url))?
        .create_if_missing(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("connecting to {}", db_url))?,
    );

    let repo = SqlitePdfRepository::new(db);
    repo.migrate().await.context("running migrations")?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize core service ---
    let store = FsSessionStore::new(cfg.sessions_dir.clone());
    tracing::info!("Upload sessions stored under {}", store.base_path().display());
    let summarizer = HttpSummarizer::new(cfg.summarizer_url.clone(), cfg.summarizer_timeout)
        .context("building summarizer client")?;
    let service = UploadService::new(
        Arc::new(store),
        Arc::new(repo),
        Arc::new(summarizer),
        cfg.upload_dir.clone(),
        cfg.max_file_size,
    );

    let _sweeper = session_sweeper::spawn(service.clone(), cfg.session_ttl, cfg.sweep_interval);

    // --- Build router ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE]);
    let body_limit = usize::try_from(cfg.max_file_size.saturating_add(MULTIPART_OVERHEAD))
        .unwrap_or(usize::MAX);

    let app: Router = routes::routes::routes()
        .with_state(service)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

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
