//! Error types for the knowledge base pipeline.

use shared::CompletionError;
use thiserror::Error;

/// Failures that abort a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The paginated data source could not be read
    #[error("Data source unavailable: {0}")]
    SourceUnavailable(String),

    /// Pagination hit the page bound without reaching an empty page
    #[error("Corpus exceeded {max_pages} pages ({records} records) without reaching the end")]
    CorpusTooLarge { max_pages: usize, records: usize },

    /// A chunk could not be answered
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    /// Pipeline settings out of range
    #[error("Invalid pipeline settings: {0}")]
    InvalidSettings(String),
}

/// A completion call for one chunk failed or came back empty.
#[derive(Error, Debug)]
#[error("Synthesis failed for chunk {chunk}: {source}")]
pub struct SynthesisError {
    pub chunk: usize,
    #[source]
    pub source: CompletionError,
}

/// The snapshot file could not be written.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A source row whose tag payload cannot be used.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("Malformed record {id}: {reason}")]
pub struct MalformedRecord {
    pub id: String,
    pub reason: String,
}

/// Model output that does not follow the answer schema.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("Malformed answer: {reason}")]
pub struct MalformedAnswer {
    pub reason: String,
}

impl MalformedAnswer {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}
