//! Represents a finalized PDF stored in the permanent upload directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Row in `pdf_files`, one per successfully assembled upload.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct PdfFile {
    /// Database identifier, returned to the client as `artifactId`.
    pub id: i64,

    /// Name of the artifact on disk (`<unix>_<tag>_<original>`).
    pub filename: String,

    /// Name the client uploaded the file under.
    pub original_filename: String,

    /// Full path of the artifact.
    pub filepath: String,

    /// Size in bytes.
    pub filesize: i64,

    /// MD5 of the assembled bytes.
    pub checksum: Option<String>,

    /// When the upload was finalized.
    pub upload_time: DateTime<Utc>,
}

/// Values needed to insert a new `pdf_files` row.
#[derive(Clone, Debug)]
pub struct NewPdfFile {
    pub filename: String,
    pub original_filename: String,
    pub filepath: String,
    pub filesize: i64,
    pub checksum: Option<String>,
    pub upload_time: DateTime<Utc>,
}
