//! Represents a generated summary attached to a PDF.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Row in `summaries`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Summary {
    pub id: i64,

    /// Parent `pdf_files.id`.
    pub pdf_id: i64,

    pub summary_text: String,

    /// Normalized style name (`standard`, `executive`, ...).
    pub summary_style: String,

    /// Time the summarizer took; `0` when the fallback text was used.
    pub process_time_ms: i64,

    pub language_detected: Option<String>,
}

#[derive(Clone, Debug)]
pub struct NewSummary {
    pub pdf_id: i64,
    pub summary_text: String,
    pub summary_style: String,
    pub process_time_ms: i64,
    pub language_detected: Option<String>,
}
