//! Error types for the chat-log-ingest library.
//!
//! Fatal failures use `IngestError`; the storage seam has its own
//! `StoreError` so store implementations do not depend on pipeline types.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Which kind of record a failed batch carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    /// Conversation rows
    Conversation,
    /// Message rows
    Message,
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conversation => write!(f, "conversation"),
            Self::Message => write!(f, "message"),
        }
    }
}

/// Errors raised by a `ConversationStore` implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// The store refused the request (constraint violation, quota, ...)
    #[error("Store rejected request: {0}")]
    Rejected(String),

    /// A blocking store task panicked or was cancelled
    #[error("Store task failed: {0}")]
    Task(String),
}

/// Fatal errors that stop an ingestion run.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Bad file type, empty file, bad parameters
    #[error("Validation error: {0}")]
    Validation(String),

    /// Header matched no known vendor signature
    #[error("Unrecognized CSV format. Supported formats: WRL, RCWS. Columns found: {columns}")]
    UnrecognizedFormat {
        /// Header columns as read from the file
        columns: String,
    },

    /// Detected format is missing columns it needs
    #[error("Missing required columns: {0}")]
    MissingColumns(String),

    /// A store batch failed; earlier batches stay committed
    #[error("Failed to save {kind} batch {batch_index} ({batches_succeeded} batches already saved): {message}")]
    Persistence {
        /// Record kind of the failed batch
        kind: BatchKind,
        /// 1-based index of the failed batch
        batch_index: usize,
        /// Number of batches of this kind committed before the failure
        batches_succeeded: usize,
        /// Underlying store message
        message: String,
    },

    /// Network failure or timeout while sending a chunk
    #[error("Transport error on chunk {chunk_index} ({chunks_succeeded} chunks already sent): {message}")]
    Transport {
        /// 1-based index of the failed chunk
        chunk_index: usize,
        /// Number of chunks accepted before the failure
        chunks_succeeded: usize,
        /// Underlying transport message
        message: String,
    },

    /// Store failure outside of a numbered batch (existence lookup, title update)
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Caller requested an abort
    #[error("Ingestion cancelled")]
    Cancelled,

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    /// Taxonomy name used in error reports.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::UnrecognizedFormat { .. } | Self::MissingColumns(_) => "ValidationError",
            Self::Transport { .. } | Self::Cancelled | Self::Io(_) => "TransportError",
            Self::Persistence { .. } | Self::Store(_) => "PersistenceError",
        }
    }
}

/// Convenience type alias for Result with IngestError
pub type Result<T> = std::result::Result<T, IngestError>;

/// Convenience type alias for store results
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Structured error object handed back to callers: `{error, details, step}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Short error category or message
    pub error: String,
    /// Full error message
    #[serde(default)]
    pub details: String,
    /// Pipeline step that failed, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}
