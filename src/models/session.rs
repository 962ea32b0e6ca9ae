//! Upload session metadata and the chunk layout derived from it.
//!
//! A session describes one logical file transfer. The metadata record is the
//! single source of truth for how many chunks exist and how large each one
//! must be; chunk files themselves carry no header.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

const UPLOAD_ID_MAX_LEN: usize = 128;

/// Opaque identifier of an upload session.
///
/// Ids double as directory names in the on-disk store, so only ASCII
/// alphanumerics, `-` and `_` are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UploadId(String);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("upload id `{0}` is invalid")]
pub struct InvalidUploadId(pub String);

impl UploadId {
    /// Parse a client-supplied id. Surrounding whitespace is ignored.
    pub fn parse(raw: &str) -> Result<Self, InvalidUploadId> {
        let trimmed = raw.trim();
        if trimmed.is_empty()
            || trimmed.len() > UPLOAD_ID_MAX_LEN
            || !trimmed
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(InvalidUploadId(raw.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Fresh server-side id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UploadId {
    type Error = InvalidUploadId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<UploadId> for String {
    fn from(id: UploadId) -> Self {
        id.0
    }
}

/// Summary flavour requested by the client.
///
/// Unknown or empty inputs fall back to [`SummaryStyle::Standard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStyle {
    #[default]
    Standard,
    Executive,
    Bullets,
    Detailed,
}

impl SummaryStyle {
    /// Normalize free-form client input into a known style.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "executive" => Self::Executive,
            "bullets" => Self::Bullets,
            "detailed" => Self::Detailed,
            _ => Self::Standard,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Executive => "executive",
            Self::Bullets => "bullets",
            Self::Detailed => "detailed",
        }
    }
}

impl fmt::Display for SummaryStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted description of one upload session (`meta.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    /// Name the client uploaded the file under.
    pub original_filename: String,

    /// Total size of the logical file in bytes.
    pub file_size: u64,

    /// Size of every chunk except possibly the last.
    pub chunk_size: u64,

    /// Number of chunks the client will send.
    pub total_chunks: u32,

    pub style: SummaryStyle,

    pub created_at: DateTime<Utc>,
}

/// A chunk index that does not map onto the declared file.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkRangeError {
    #[error("chunk index {index} out of range (total chunks {total})")]
    IndexOutOfRange { index: u32, total: u32 },
    #[error("chunk index {index} starts past the end of the file")]
    StartPastEnd { index: u32 },
}

impl SessionMeta {
    /// Byte length chunk `index` must have.
    ///
    /// Every chunk is `chunk_size` bytes except the last, which carries the
    /// remainder.
    pub fn expected_chunk_size(&self, index: u32) -> Result<u64, ChunkRangeError> {
        if index >= self.total_chunks {
            return Err(ChunkRangeError::IndexOutOfRange {
                index,
                total: self.total_chunks,
            });
        }
        let start = u64::from(index)
            .checked_mul(self.chunk_size)
            .ok_or(ChunkRangeError::StartPastEnd { index })?;
        if start >= self.file_size {
            return Err(ChunkRangeError::StartPastEnd { index });
        }
        Ok((self.file_size - start).min(self.chunk_size))
    }

    /// `ceil(file_size / chunk_size)`, or `None` when the sizes are zero or
    /// the count does not fit in a `u32`.
    pub fn chunk_count_for(file_size: u64, chunk_size: u64) -> Option<u32> {
        if file_size == 0 || chunk_size == 0 {
            return None;
        }
        u32::try_from(file_size.div_ceil(chunk_size)).ok()
    }

    /// Whether the session was created before `cutoff`.
    pub fn is_older_than(&self, cutoff: DateTime<Utc>) -> bool {
        self.created_at < cutoff
    }
}
