//! Health & readiness handlers.
//!
//! - GET /healthz  -> liveness ("ok")
//! - GET /readyz   -> readiness that checks the database and the upload directory

use crate::services::upload_service::UploadService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::HashMap, path::Path};
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Always 200; never touches the database or disk.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// 1. Pings the metadata database through the repository.
/// 2. Writes, reads back and deletes a probe file in the upload directory,
///    which is where assembled PDFs land.
///
/// HTTP 200 when both pass, 503 otherwise.
pub async fn readyz(State(service): State<UploadService>) -> impl IntoResponse {
    let sqlite_check = match service.repository().health_check().await {
        Ok(()) => (true, None),
        Err(e) => (false, Some(format!("error: {}", e))),
    };
    let disk_check = probe_dir(service.upload_dir()).await;

    let overall_ok = sqlite_check.0 && disk_check.0;

    let mut checks = HashMap::new();
    checks.insert(
        "sqlite",
        CheckStatus {
            ok: sqlite_check.0,
            error: sqlite_check.1,
        },
    );
    checks.insert(
        "disk",
        CheckStatus {
            ok: disk_check.0,
            error: disk_check.1,
        },
    );

    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" }.into(),
        checks,
    };
    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn probe_dir(dir: &Path) -> (bool, Option<String>) {
    let tmp_path = dir.join(format!(".readyz-{}", Uuid::new_v4()));
    if let Err(e) = fs::write(&tmp_path, b"readyz").await {
        return (false, Some(format!("could not write tmp file: {}", e)));
    }
    let result = match fs::read(&tmp_path).await {
        Ok(bytes) if bytes == b"readyz" => (true, None),
        Ok(_) => (false, Some("file content mismatch".to_string())),
        Err(e) => (false, Some(format!("could not read tmp file: {}", e))),
    };
    match fs::remove_file(&tmp_path).await {
        Err(e) if result.0 => (true, Some(format!("could not remove tmp file: {}", e))),
        _ => result,
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
