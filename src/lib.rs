//! Chat Log Ingest - CSV Chat Export Ingestion
//!
//! A Rust library for turning vendor chat-log CSV exports into
//! conversations and messages in a relational store.
//!
//! # Features
//!
//! - Format detection for WRL and RCWS exports
//! - Repair of records split by unescaped newlines
//! - Deterministic conversation ids from phone numbers or opaque chat hashes
//! - Batched, two-phase persistence with progress reporting
//! - Chunked uploads with a stateful receiver

/// Configuration management
pub mod config;
/// SQLite store and connection pooling
pub mod db;
/// Error types
pub mod error;
/// Dry-run export writers
pub mod file_writer;
/// Vendor format detection
pub mod format;
/// Titles and sender names
pub mod inference;
/// Logging setup and utilities
pub mod logging;
/// Metrics collection
pub mod metrics;
/// Data models and structures
pub mod models;
/// Row normalization
pub mod normalize;
/// CSV line parsing and record repair
pub mod parser;
/// Batched persistence
pub mod persistence;
/// Progress notifications
pub mod progress;
/// Server side of chunked uploads
pub mod receiver;
/// Storage seam and in-memory store
pub mod repository;
/// Conversation key resolution
pub mod resolver;
/// Database schema definitions
pub mod schema;
/// Ingestion orchestrator
pub mod service;
/// Upload reading and compression metrics
pub mod source;
/// Client side of the upload transport
pub mod transport;
/// Chunking and size helpers
pub mod utils;
/// Input validation
pub mod validation;

// Re-export key components for easier access
pub use db::SqliteStore;
pub use error::{ErrorReport, IngestError, StoreError};
pub use format::CsvFormat;
pub use models::{ConversationId, IngestSummary, NewConversation, NewMessage};
pub use repository::{ConversationStore, MemoryStore};
pub use service::{IngestFailure, IngestOptions, IngestRequest, IngestStep, IngestionService};
