//! Core data models for the chunked upload backend.
//!
//! `session` holds the in-flight upload state kept by the session store.
//! `pdf_file` and `summary` map onto the relational tables written once an
//! upload is finalized; they derive `sqlx::FromRow` and serialize as JSON.

pub mod pdf_file;
pub mod session;
pub mod summary;
