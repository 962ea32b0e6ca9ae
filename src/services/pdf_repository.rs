//! Relational persistence for finalized uploads and their summaries.
//!
//! The upload core only needs to insert rows; reads, updates and exports
//! live elsewhere. SQLite via sqlx is the default backend.

use crate::models::{
    pdf_file::{NewPdfFile, PdfFile},
    summary::{NewSummary, Summary},
};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

const INIT_MIGRATION: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("pdf record {0} not found")]
    PdfNotFound(i64),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Persistence collaborator used when an upload is finalized.
#[async_trait]
pub trait PdfRepository: Send + Sync {
    async fn insert_pdf_file(&self, file: &NewPdfFile) -> RepoResult<PdfFile>;

    async fn insert_summary(&self, summary: &NewSummary) -> RepoResult<Summary>;

    /// Remove a pdf row (and its summaries). Used to undo a half-finished
    /// finalize.
    async fn delete_pdf_file(&self, id: i64) -> RepoResult<()>;

    async fn health_check(&self) -> RepoResult<()>;
}

/// SQLite-backed [`PdfRepository`].
#[derive(Clone)]
pub struct SqlitePdfRepository {
    db: Arc<SqlitePool>,
}

impl SqlitePdfRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema. Every statement is `IF NOT EXISTS`, so this
    /// is safe to run on each startup.
    pub async fn migrate(&self) -> RepoResult<()> {
        let statements = INIT_MIGRATION
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());

        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl PdfRepository for SqlitePdfRepository {
    async fn insert_pdf_file(&self, file: &NewPdfFile) -> RepoResult<PdfFile> {
        let row = sqlx::query_as::<_, PdfFile>(
            r#"
            INSERT INTO pdf_files (
                filename, original_filename, filepath, filesize, checksum, upload_time
            ) VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id, filename, original_filename, filepath, filesize,
                      checksum, upload_time
            "#,
        )
        .bind(&file.filename)
        .bind(&file.original_filename)
        .bind(&file.filepath)
        .bind(file.filesize)
        .bind(file.checksum.as_deref())
        .bind(file.upload_time)
        .fetch_one(&*self.db)
        .await?;
        Ok(row)
    }

    async fn insert_summary(&self, summary: &NewSummary) -> RepoResult<Summary> {
        let row = sqlx::query_as::<_, Summary>(
            r#"
            INSERT INTO summaries (
                pdf_id, summary_text, summary_style, process_time_ms, language_detected
            ) VALUES (?, ?, ?, ?, ?)
            RETURNING id, pdf_id, summary_text, summary_style, process_time_ms,
                      language_detected
            "#,
        )
        .bind(summary.pdf_id)
        .bind(&summary.summary_text)
        .bind(&summary.summary_style)
        .bind(summary.process_time_ms)
        .bind(summary.language_detected.as_deref())
        .fetch_one(&*self.db)
        .await?;
        Ok(row)
    }

    async fn delete_pdf_file(&self, id: i64) -> RepoResult<()> {
        sqlx::query("DELETE FROM summaries WHERE pdf_id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        let result = sqlx::query("DELETE FROM pdf_files WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::PdfNotFound(id));
        }
        Ok(())
    }

    async fn health_check(&self) -> RepoResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }
}
