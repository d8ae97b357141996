//! Pipeline error types.
//!
//! Distinguishes recoverable failures (a single document failing to parse is
//! skipped during ingestion) from pipeline-level faults (corrupt index
//! storage, a scanner that cannot run, an unreachable model).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A single file could not be parsed. Recoverable: ingestion logs the
    /// failure and continues with the remaining files.
    #[error("failed to parse {file}: {reason}")]
    Parse { file: String, reason: String },

    /// Writing the index to disk failed. In-memory inserts from the current
    /// ingestion batch are discarded so memory and disk stay consistent.
    #[error("failed to persist index to {path}: {reason}")]
    IndexPersist { path: String, reason: String },

    #[error("embedding request failed: {0}")]
    Embedding(String),

    /// A scanner itself faulted. Distinct from a scanner *activating*, which
    /// is a normal ScanResult and never an error.
    #[error("scanner '{kind}' fault: {reason}")]
    Scanner { kind: String, reason: String },

    #[error("model call timed out after {0}s")]
    LlmTimeout(u64),

    #[error("model call failed: {0}")]
    Llm(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Per-file errors that ingestion recovers from by skipping the file.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PipelineError::Parse { .. })
    }
}
