use crate::models::DocumentId;
use std::time::Duration;

pub const DEFAULT_PROCESSOR_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

pub const COLLECTION_PREFIX: &str = "doc_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Applied to each processor call unless the caller supplies its own.
    pub processor_timeout: Duration,
    pub max_file_size: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            processor_timeout: DEFAULT_PROCESSOR_TIMEOUT,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

pub fn collection_name(document_id: DocumentId) -> String {
    format!("{COLLECTION_PREFIX}{document_id}")
}
