//! HTTP handlers for the resumable upload protocol.
//! Chunk bodies are streamed into the session store whenever the multipart
//! fields naming the session arrive before the chunk itself.

use crate::{
    errors::AppError,
    models::session::{SummaryStyle, UploadId},
    services::upload_service::{
        ChunkReceipt, CompletedUpload, NewSession, SessionStatus, SessionTicket, UploadService,
    },
};
use axum::{
    Json,
    extract::{Multipart, Query, State, rejection::JsonRejection},
};
use bytes::Bytes;
use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use std::io;

/// Body of `POST /upload/init`. Both camelCase and snake_case are accepted.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadReq {
    #[serde(default, alias = "original_filename")]
    pub original_filename: String,
    #[serde(default, alias = "file_size")]
    pub file_size: i64,
    #[serde(default, alias = "chunk_size")]
    pub chunk_size: i64,
    #[serde(default, alias = "total_chunks")]
    pub total_chunks: i64,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default, alias = "upload_id")]
    pub upload_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadIdReq {
    #[serde(default, alias = "upload_id")]
    pub upload_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadResp {
    pub success: bool,
    pub upload_id: UploadId,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub style: SummaryStyle,
}

impl From<SessionTicket> for InitUploadResp {
    fn from(ticket: SessionTicket) -> Self {
        Self {
            success: true,
            upload_id: ticket.upload_id,
            chunk_size: ticket.chunk_size,
            total_chunks: ticket.total_chunks,
            style: ticket.style,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResp {
    pub success: bool,
    pub upload_id: UploadId,
    pub chunk_index: u32,
    pub already_uploaded: bool,
}

impl From<ChunkReceipt> for ChunkResp {
    fn from(receipt: ChunkReceipt) -> Self {
        Self {
            success: true,
            upload_id: receipt.upload_id,
            chunk_index: receipt.chunk_index,
            already_uploaded: receipt.already_uploaded,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResp {
    pub success: bool,
    pub upload_id: UploadId,
    pub received_indices: Vec<u32>,
    pub total_chunks: u32,
    pub chunk_size: u64,
    pub file_size: u64,
    pub original_filename: String,
    pub style: SummaryStyle,
}

impl From<SessionStatus> for StatusResp {
    fn from(status: SessionStatus) -> Self {
        Self {
            success: true,
            upload_id: status.upload_id,
            received_indices: status.received_indices,
            total_chunks: status.total_chunks,
            chunk_size: status.chunk_size,
            file_size: status.file_size,
            original_filename: status.original_filename,
            style: status.style,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResp {
    pub success: bool,
    pub artifact_id: i64,
    pub filename: String,
    pub original_filename: String,
    pub style: SummaryStyle,
    pub summary_text: String,
    pub language: String,
    pub process_time_ms: i64,
    pub file_size: u64,
    pub checksum: String,
}

impl From<CompletedUpload> for CompleteResp {
    fn from(done: CompletedUpload) -> Self {
        Self {
            success: true,
            artifact_id: done.artifact_id,
            filename: done.filename,
            original_filename: done.original_filename,
            style: done.style,
            summary_text: done.summary_text,
            language: done.language,
            process_time_ms: done.process_time_ms,
            file_size: done.file_size,
            checksum: done.checksum,
        }
    }
}

/// `POST /upload/init`
pub async fn init_upload(
    State(service): State<UploadService>,
    payload: Result<Json<InitUploadReq>, JsonRejection>,
) -> Result<Json<InitUploadResp>, AppError> {
    let Json(req) = payload?;
    let ticket = service
        .init_session(NewSession {
            original_filename: req.original_filename,
            file_size: req.file_size,
            chunk_size: req.chunk_size,
            total_chunks: req.total_chunks,
            style: req.style,
            upload_id: req.upload_id,
        })
        .await?;
    Ok(Json(ticket.into()))
}

/// `POST /upload/chunk` with multipart fields `uploadId`, `chunkIndex`, `chunk`.
pub async fn upload_chunk(
    State(service): State<UploadService>,
    mut multipart: Multipart,
) -> Result<Json<ChunkResp>, AppError> {
    let mut upload_id: Option<String> = None;
    let mut chunk_index: Option<u32> = None;
    let mut buffered: Option<Bytes> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "uploadId" | "upload_id" => upload_id = Some(field.text().await?.trim().to_string()),
            "chunkIndex" | "chunk_index" => {
                chunk_index = Some(parse_chunk_index(&field.text().await?)?)
            }
            "chunk" => {
                if let (Some(id), Some(index)) = (upload_id.as_deref(), chunk_index) {
                    let body = field.map(|part| part.map_err(io::Error::other)).boxed();
                    let receipt = service.receive_chunk(id, index, body).await?;
                    return Ok(Json(receipt.into()));
                }
                buffered = Some(field.bytes().await?);
            }
            _ => {}
        }
    }

    let (Some(id), Some(index)) = (upload_id, chunk_index) else {
        return Err(AppError::bad_request("uploadId and chunkIndex are required"));
    };
    let Some(data) = buffered else {
        return Err(AppError::bad_request("chunk file is required"));
    };

    let body = stream::once(async move { Ok::<_, io::Error>(data) }).boxed();
    let receipt = service.receive_chunk(&id, index, body).await?;
    Ok(Json(receipt.into()))
}

/// `GET /upload/status?uploadId=...`
pub async fn upload_status(
    State(service): State<UploadService>,
    Query(query): Query<UploadIdReq>,
) -> Result<Json<StatusResp>, AppError> {
    let id = required_upload_id(query.upload_id)?;
    let status = service.status(&id).await?;
    Ok(Json(status.into()))
}

/// `POST /upload/complete`
pub async fn complete_upload(
    State(service): State<UploadService>,
    payload: Result<Json<UploadIdReq>, JsonRejection>,
) -> Result<Json<CompleteResp>, AppError> {
    let Json(req) = payload?;
    let id = required_upload_id(req.upload_id)?;
    let done = service.complete(&id).await?;
    Ok(Json(done.into()))
}

fn required_upload_id(raw: Option<String>) -> Result<String, AppError> {
    match raw.map(|id| id.trim().to_string()) {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(AppError::bad_request("uploadId is required")),
    }
}

fn parse_chunk_index(raw: &str) -> Result<u32, AppError> {
    raw.trim().parse::<u32>().map_err(|_| {
        AppError::bad_request(format!(
            "chunkIndex must be a non-negative integer, got `{}`",
            raw.trim()
        ))
    })
}

#[cfg(test)]
mod tests {
    use crate::{
        routes::routes::routes,
        services::{
            memory_store::MemorySessionStore,
            test_support::{FakeRepo, FakeSummarizer},
            upload_service::UploadService,
        },
    };
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
    };
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "chunk-boundary";

    struct Harness {
        app: Router,
        repo: Arc<FakeRepo>,
        _dir: TempDir,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let repo = Arc::new(FakeRepo::default());
        let service = UploadService::new(
            Arc::new(MemorySessionStore::new()),
            repo.clone(),
            Arc::new(FakeSummarizer { fail: false }),
            dir.path(),
            64,
        );
        Harness {
            app: routes().with_state(service),
            repo,
            _dir: dir,
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    /// Build a multipart body; `fields` are sent in the given order.
    fn multipart(fields: &[(&str, &[u8])]) -> Request<Body> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            if *name == "chunk" {
                body.extend_from_slice(
                    b"Content-Disposition: form-data; name=\"chunk\"; filename=\"blob\"\r\n\
                      Content-Type: application/octet-stream\r\n\r\n",
                );
            } else {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                        .as_bytes(),
                );
            }
            body.extend_from_slice(value);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        Request::post("/upload/chunk")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn init(app: &Router, id: &str) {
        let (status, body) = send(
            app,
            post_json(
                "/upload/init",
                json!({
                    "originalFilename": "doc.pdf",
                    "fileSize": 15,
                    "chunkSize": 10,
                    "totalChunks": 2,
                    "style": "Bullets",
                    "uploadId": id,
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
    }

    #[tokio::test]
    async fn init_returns_ticket() {
        let h = harness();
        let (status, body) = send(
            &h.app,
            post_json(
                "/upload/init",
                json!({
                    "original_filename": "report.PDF",
                    "file_size": 15,
                    "chunk_size": 10,
                    "total_chunks": 2,
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["chunkSize"], 10);
        assert_eq!(body["totalChunks"], 2);
        assert_eq!(body["style"], "standard");
        assert!(!body["uploadId"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn init_rejections_use_error_body() {
        let h = harness();
        let (status, body) = send(
            &h.app,
            post_json(
                "/upload/init",
                json!({"originalFilename": "a.txt", "fileSize": 1, "chunkSize": 1, "totalChunks": 1}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(body["status"], 415);

        let (status, _) = send(
            &h.app,
            post_json(
                "/upload/init",
                json!({"originalFilename": "a.pdf", "fileSize": 0, "chunkSize": 1, "totalChunks": 1}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &h.app,
            post_json(
                "/upload/init",
                json!({"originalFilename": "a.pdf", "fileSize": 65, "chunkSize": 65, "totalChunks": 1}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

        let req = Request::post("/upload/init")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&h.app, req).await;
        assert!(status.is_client_error());
        assert!(body["error"].as_str().unwrap().starts_with("invalid JSON"));
    }

    #[tokio::test]
    async fn chunk_upload_is_idempotent_in_either_field_order() {
        let h = harness();
        init(&h.app, "order").await;

        let (status, body) = send(
            &h.app,
            multipart(&[("uploadId", b"order"), ("chunkIndex", b"0"), ("chunk", b"%PDF-1.4\n ")]),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["alreadyUploaded"], false);
        assert_eq!(body["chunkIndex"], 0);

        // chunk first, identifiers after
        let (status, body) = send(
            &h.app,
            multipart(&[("chunk", b"%PDF-1.4\n "), ("upload_id", b"order"), ("chunk_index", b"0")]),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["alreadyUploaded"], true);
    }

    #[tokio::test]
    async fn chunk_errors_map_to_statuses() {
        let h = harness();
        init(&h.app, "errs").await;

        let (status, body) =
            send(&h.app, multipart(&[("uploadId", b"errs"), ("chunkIndex", b"1"), ("chunk", b"abc")])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("size mismatch"));

        let (status, _) =
            send(&h.app, multipart(&[("uploadId", b"errs"), ("chunkIndex", b"2"), ("chunk", b"abc")])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            send(&h.app, multipart(&[("uploadId", b"errs"), ("chunkIndex", b"-1"), ("chunk", b"abc")])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            send(&h.app, multipart(&[("uploadId", b"nobody"), ("chunkIndex", b"0"), ("chunk", b"abc")])).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&h.app, multipart(&[("uploadId", b"errs"), ("chunkIndex", b"0")])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "chunk file is required");
    }

    #[tokio::test]
    async fn status_complete_round_trip() {
        let h = harness();
        init(&h.app, "trip").await;

        send(&h.app, multipart(&[("uploadId", b"trip"), ("chunkIndex", b"1"), ("chunk", b"%%EOF")])).await;

        let status_req = || {
            Request::get("/upload/status?uploadId=trip")
                .body(Body::empty())
                .unwrap()
        };
        let (status, body) = send(&h.app, status_req()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["receivedIndices"], json!([1]));
        assert_eq!(body["fileSize"], 15);
        assert_eq!(body["style"], "bullets");

        let (status, body) = send(&h.app, post_json("/upload/complete", json!({"uploadId": "trip"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["missing_chunk"], 0);

        send(&h.app, multipart(&[("uploadId", b"trip"), ("chunkIndex", b"0"), ("chunk", b"%PDF-1.4\n ")])).await;
        let (status, body) = send(&h.app, post_json("/upload/complete", json!({"upload_id": "trip"}))).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["originalFilename"], "doc.pdf");
        assert_eq!(body["style"], "bullets");
        assert_eq!(body["summaryText"], "bullets summary of 15 bytes");
        assert_eq!(body["language"], "en");
        assert_eq!(body["fileSize"], 15);
        assert_eq!(body["checksum"].as_str().unwrap().len(), 32);
        assert_eq!(h.repo.files.lock().unwrap().len(), 1);

        let (status, _) = send(&h.app, status_req()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_upload_id_is_bad_request() {
        let h = harness();
        let (status, _) = send(
            &h.app,
            Request::get("/upload/status").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&h.app, post_json("/upload/complete", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
