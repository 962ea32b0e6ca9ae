//! Client for the external summarization service.
//!
//! The service accepts the finished PDF as a multipart `file` field plus a
//! `style` query parameter and answers with JSON
//! `{"summary": ..., "detected_language": ...}`.

use crate::models::session::SummaryStyle;
use async_trait::async_trait;
use reqwest::{
    Body, Client, StatusCode,
    multipart::{Form, Part},
};
use serde::Deserialize;
use std::{io, path::Path, time::Duration, time::Instant};
use thiserror::Error;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

/// Summary text stored when the summarizer cannot be reached.
pub const FALLBACK_SUMMARY: &str =
    "Summary unavailable - summarization service is under maintenance";

pub const UNKNOWN_LANGUAGE: &str = "unknown";

#[derive(Debug, Error)]
pub enum SummarizerError {
    #[error("summarizer request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("summarizer responded with status {0}")]
    Status(StatusCode),
    #[error("could not read artifact for summarization: {0}")]
    Io(#[from] io::Error),
}

/// Result of one summarization call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryOutcome {
    pub summary_text: String,
    pub language: String,
    pub process_time_ms: i64,
}

impl SummaryOutcome {
    /// Placeholder used when summarization failed.
    pub fn fallback() -> Self {
        Self {
            summary_text: FALLBACK_SUMMARY.to_string(),
            language: UNKNOWN_LANGUAGE.to_string(),
            process_time_ms: 0,
        }
    }
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        path: &Path,
        style: SummaryStyle,
    ) -> Result<SummaryOutcome, SummarizerError>;
}

#[derive(Deserialize)]
struct SummarizerResponse {
    summary: String,
    #[serde(default)]
    detected_language: Option<String>,
}

/// [`Summarizer`] that talks to the summarization service over HTTP.
#[derive(Clone)]
pub struct HttpSummarizer {
    client: Client,
    endpoint: String,
}

impl HttpSummarizer {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, SummarizerError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Summarizer for HttpSummarizer {
    async fn summarize(
        &self,
        path: &Path,
        style: SummaryStyle,
    ) -> Result<SummaryOutcome, SummarizerError> {
        let started = Instant::now();

        let file = File::open(path).await?;
        let len = file.metadata().await?.len();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.pdf")
            .to_string();

        let part = Part::stream_with_length(Body::wrap_stream(ReaderStream::new(file)), len)
            .file_name(file_name)
            .mime_str("application/pdf")?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("style", style.as_str())])
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SummarizerError::Status(response.status()));
        }

        let raw = response.text().await?;
        let elapsed = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
        Ok(parse_summary(&raw, elapsed))
    }
}

/// Interpret a successful response body. Bodies that are not the expected
/// JSON are kept verbatim as the summary.
fn parse_summary(raw: &str, process_time_ms: i64) -> SummaryOutcome {
    match serde_json::from_str::<SummarizerResponse>(raw) {
        Ok(parsed) => SummaryOutcome {
            summary_text: parsed.summary,
            language: parsed
                .detected_language
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_LANGUAGE.to_string()),
            process_time_ms,
        },
        Err(_) => SummaryOutcome {
            summary_text: raw.to_string(),
            language: UNKNOWN_LANGUAGE.to_string(),
            process_time_ms,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::{Multipart, Query},
        http::StatusCode as AxumStatus,
        routing::post,
    };
    use serde_json::json;
    use std::collections::HashMap;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    async fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/summarize", addr)
    }

    fn pdf_on_disk(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, b"%PDF-1.7 test body").unwrap();
        path
    }

    #[test]
    fn parse_json_response() {
        let out = parse_summary(r#"{"summary":"ringkas","detected_language":"id"}"#, 12);
        assert_eq!(out.summary_text, "ringkas");
        assert_eq!(out.language, "id");
        assert_eq!(out.process_time_ms, 12);
    }

    #[test]
    fn parse_plain_text_response() {
        let out = parse_summary("just text", 3);
        assert_eq!(out.summary_text, "just text");
        assert_eq!(out.language, UNKNOWN_LANGUAGE);
    }

    #[test]
    fn fallback_has_zero_duration() {
        let out = SummaryOutcome::fallback();
        assert_eq!(out.summary_text, FALLBACK_SUMMARY);
        assert_eq!(out.process_time_ms, 0);
    }

    #[tokio::test]
    async fn posts_file_and_style() {
        async fn handler(
            Query(q): Query<HashMap<String, String>>,
            mut form: Multipart,
        ) -> Json<serde_json::Value> {
            let mut file_len = 0;
            let mut file_name = String::new();
            while let Some(field) = form.next_field().await.unwrap() {
                if field.name() == Some("file") {
                    file_name = field.file_name().unwrap_or_default().to_string();
                    file_len = field.bytes().await.unwrap().len();
                }
            }
            Json(json!({
                "summary": format!("{}:{}:{}", q["style"], file_name, file_len),
                "detected_language": "en",
            }))
        }

        let url = serve(Router::new().route("/summarize", post(handler))).await;
        let dir = TempDir::new().unwrap();
        let summarizer = HttpSummarizer::new(url, Duration::from_secs(5)).unwrap();

        let out = summarizer
            .summarize(&pdf_on_disk(&dir), SummaryStyle::Executive)
            .await
            .unwrap();
        assert_eq!(out.summary_text, "executive:doc.pdf:18");
        assert_eq!(out.language, "en");
        assert!(out.process_time_ms >= 0);
    }

    #[tokio::test]
    async fn error_status_is_an_error() {
        let url = serve(Router::new().route(
            "/summarize",
            post(|_body: axum::body::Bytes| async { AxumStatus::SERVICE_UNAVAILABLE }),
        ))
        .await;
        let dir = TempDir::new().unwrap();
        let summarizer = HttpSummarizer::new(url, Duration::from_secs(5)).unwrap();

        let err = summarizer
            .summarize(&pdf_on_disk(&dir), SummaryStyle::Standard)
            .await
            .unwrap_err();
        assert!(matches!(err, SummarizerError::Status(s) if s.as_u16() == 503));
    }
}
