//! Defines routes for the resumable upload API.
//!
//! ## Structure
//! - **Upload protocol**
//!   - `POST /upload/init`     — open or resume a session
//!   - `POST /upload/chunk`    — store one chunk (multipart)
//!   - `GET  /upload/status`   — list received chunk indices
//!   - `POST /upload/complete` — assemble, validate, record and summarize
//!
//! - **Probes**
//!   - `GET /healthz`, `GET /readyz`

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        upload_handlers::{complete_upload, init_upload, upload_chunk, upload_status},
    },
    services::upload_service::UploadService,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build the router; every handler shares the `UploadService` state.
pub fn routes() -> Router<UploadService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/upload/init", post(init_upload))
        .route("/upload/chunk", post(upload_chunk))
        .route("/upload/status", get(upload_status))
        .route("/upload/complete", post(complete_upload))
}
