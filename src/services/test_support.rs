//! Fake collaborators shared by service and handler tests.

use crate::{
    models::{
        pdf_file::{NewPdfFile, PdfFile},
        session::SummaryStyle,
        summary::{NewSummary, Summary},
    },
    services::{
        pdf_repository::{PdfRepository, RepoError},
        summarizer::{SummarizerError, SummaryOutcome, Summarizer},
    },
};
use async_trait::async_trait;
use std::{
    io::{self, ErrorKind},
    path::Path,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicI64, Ordering},
    },
};
use tokio::fs;

/// Records rows in memory; either insert can be switched to fail.
#[derive(Default)]
pub struct FakeRepo {
    next_id: AtomicI64,
    pub files: Mutex<Vec<PdfFile>>,
    pub summaries: Mutex<Vec<Summary>>,
    pub fail_files: AtomicBool,
    pub fail_summaries: AtomicBool,
}

#[async_trait]
impl PdfRepository for FakeRepo {
    async fn insert_pdf_file(&self, file: &NewPdfFile) -> Result<PdfFile, RepoError> {
        if self.fail_files.load(Ordering::SeqCst) {
            return Err(RepoError::Sqlx(sqlx::Error::PoolTimedOut));
        }
        let row = PdfFile {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            filename: file.filename.clone(),
            original_filename: file.original_filename.clone(),
            filepath: file.filepath.clone(),
            filesize: file.filesize,
            checksum: file.checksum.clone(),
            upload_time: file.upload_time,
        };
        self.files.lock().unwrap().push(row.clone());
        Ok(row)
    }

    async fn insert_summary(&self, summary: &NewSummary) -> Result<Summary, RepoError> {
        if self.fail_summaries.load(Ordering::SeqCst) {
            return Err(RepoError::Sqlx(sqlx::Error::PoolTimedOut));
        }
        let mut summaries = self.summaries.lock().unwrap();
        let row = Summary {
            id: summaries.len() as i64 + 1,
            pdf_id: summary.pdf_id,
            summary_text: summary.summary_text.clone(),
            summary_style: summary.summary_style.clone(),
            process_time_ms: summary.process_time_ms,
            language_detected: summary.language_detected.clone(),
        };
        summaries.push(row.clone());
        Ok(row)
    }

    async fn delete_pdf_file(&self, id: i64) -> Result<(), RepoError> {
        self.files.lock().unwrap().retain(|f| f.id != id);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), RepoError> {
        Ok(())
    }
}

/// Answers `"<style> summary of <n> bytes"` in English, or fails.
pub struct FakeSummarizer {
    pub fail: bool,
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(
        &self,
        path: &Path,
        style: SummaryStyle,
    ) -> Result<SummaryOutcome, SummarizerError> {
        if self.fail {
            return Err(SummarizerError::Io(io::Error::new(
                ErrorKind::ConnectionRefused,
                "summarizer down",
            )));
        }
        let len = fs::metadata(path).await?.len();
        Ok(SummaryOutcome {
            summary_text: format!("{} summary of {} bytes", style, len),
            language: "en".into(),
            process_time_ms: 7,
        })
    }
}
