pub mod pdf_repository;
pub mod session_locks;
pub mod session_store;
pub mod session_sweeper;
pub mod summarizer;
pub mod upload_service;

#[cfg(test)]
pub mod memory_store;
#[cfg(test)]
pub mod test_support;
