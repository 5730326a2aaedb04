//! Ingestion orchestrator.
//!
//! Drives one upload through validation, format detection, line repair,
//! normalization, key resolution and the two persistence phases, reporting
//! progress along the way. Any fatal error ends the run in `Failed` and is
//! returned together with the step it happened in.

use std::fmt;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ErrorReport, IngestError, Result};
use crate::format::{select_format, CsvFormat};
use crate::inference::{sender_name, BusinessNames};
use crate::logging::OperationTimer;
use crate::metrics::MetricsCollector;
use crate::models::{CompressionStats, IngestSummary, NewConversation, NewMessage};
use crate::normalize::{CanonicalRow, RowNormalizer, RowOutcome};
use crate::parser::{parse_header, parse_line, reconstruct_lines, split_lines};
use crate::persistence::{BatchPersister, BatchSettings, ConversationSet};
use crate::progress::{ProgressObserver, ProgressTracker};
use crate::repository::ConversationStore;
use crate::resolver::ConversationKeyResolver;
use crate::source::compression_stats;
use crate::validation::UploadValidator;

/// What to do with a content row that has no timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampFallback {
    /// Stamp the message with the ingestion time
    #[serde(rename = "now")]
    IngestionTime,
    /// Drop the row
    #[serde(rename = "skip")]
    SkipRow,
}

/// Tunables for an ingestion run
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Batch sizing and pacing for the store
    pub batch: BatchSettings,
    /// Largest accepted upload
    pub max_file_size_bytes: u64,
    /// Most physical lines folded into one broken record
    pub max_join_lines: usize,
    /// Country code stripped from phone-like keys
    pub country_code: String,
    /// Policy for content rows without a timestamp
    pub timestamp_fallback: TimestampFallback,
    /// Measure deflate size of the upload
    pub compression_metrics: bool,
    /// Display names for outgoing messages
    pub business_names: BusinessNames,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            batch: BatchSettings::default(),
            max_file_size_bytes: 50 * 1024 * 1024,
            max_join_lines: 10,
            country_code: "55".to_string(),
            timestamp_fallback: TimestampFallback::IngestionTime,
            compression_metrics: false,
            business_names: BusinessNames::default(),
        }
    }
}

/// One upload to ingest
#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// Original file name, used for the extension check
    pub file_name: String,
    /// Decoded CSV text
    pub content: String,
    /// Owner of the created conversations
    pub user_id: i64,
    /// Skip detection and trust this format
    pub format_override: Option<CsvFormat>,
}

/// Orchestrator states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStep {
    /// Not started
    Idle,
    /// File name, size and line count checks
    Validating,
    /// Vendor format detection
    Detecting,
    /// Repair of split records
    Reconstructing,
    /// Rows to canonical rows
    Normalizing,
    /// Conversation ids and senders
    Resolving,
    /// Conversation batches
    PersistingConversations,
    /// Message batches
    PersistingMessages,
    /// Finished successfully
    Done,
    /// Stopped on a fatal error
    Failed,
}

impl IngestStep {
    /// Stable step name used in reports and metrics
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Detecting => "detecting",
            Self::Reconstructing => "reconstructing",
            Self::Normalizing => "normalizing",
            Self::Resolving => "resolving",
            Self::PersistingConversations => "persisting_conversations",
            Self::PersistingMessages => "persisting_messages",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for IngestStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A failed run: the step it stopped in and why
#[derive(Error, Debug)]
#[error("Ingestion failed while {step}: {error}")]
pub struct IngestFailure {
    /// Step that was running when the error happened
    pub step: IngestStep,
    /// Underlying error
    #[source]
    pub error: IngestError,
}

impl IngestFailure {
    /// Serializable `{error, details, step}` object for callers
    #[must_use]
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            error: self.error.category().to_string(),
            details: self.error.to_string(),
            step: Some(self.step.name().to_string()),
        }
    }
}

/// Non-fatal counters gathered while preparing rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowStats {
    /// Physical lines folded into a preceding record
    pub merged_lines: usize,
    /// Unrecoverable or malformed records
    pub dropped_rows: usize,
    /// Non-content rows
    pub skipped_rows: usize,
    /// Rows that had no timestamp
    pub timestamp_fallbacks: usize,
}

/// Everything derived from an upload before the store is touched
#[derive(Debug, Clone)]
pub struct PreparedIngest {
    /// Detected or forced format
    pub format: CsvFormat,
    /// Conversations seen, in first-seen order
    pub conversations: ConversationSet,
    /// Store rows for those conversations
    pub new_conversations: Vec<NewConversation>,
    /// Messages in source order
    pub messages: Vec<NewMessage>,
    /// Row counters
    pub stats: RowStats,
    /// Raw keys that landed on an id owned by another key
    pub hash_collisions: usize,
    /// Present when compression metrics are enabled
    pub compression: Option<CompressionStats>,
}

/// Turns canonical rows into messages, tracking conversations as it goes.
///
/// Shared by whole-file ingestion and the chunk receiver, which keeps one
/// assembler alive across the chunks of an upload.
#[derive(Debug)]
pub struct MessageAssembler {
    format: CsvFormat,
    resolver: ConversationKeyResolver,
    conversations: ConversationSet,
    options: IngestOptions,
    ingestion_time: String,
}

impl MessageAssembler {
    /// Assembler for one upload of `format`
    pub fn new(format: CsvFormat, options: IngestOptions) -> Self {
        Self {
            format,
            resolver: ConversationKeyResolver::new(options.country_code.clone()),
            conversations: ConversationSet::new(),
            options,
            ingestion_time: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Resolve and attribute one canonical row; `None` when the row is dropped
    pub fn assemble(&mut self, row: CanonicalRow, stats: &mut RowStats) -> Option<NewMessage> {
        let timestamp = match row.timestamp.clone() {
            Some(ts) => ts,
            None => {
                stats.timestamp_fallbacks += 1;
                match self.options.timestamp_fallback {
                    TimestampFallback::IngestionTime => self.ingestion_time.clone(),
                    TimestampFallback::SkipRow => return None,
                }
            },
        };

        let resolved = self.resolver.resolve(&row.key);
        let started = row.conversation_started.as_deref().or(Some(timestamp.as_str()));
        self.conversations.observe(resolved.id, row.phone.as_deref(), started);

        let sender = sender_name(self.format, &row, &self.options.business_names, &self.options.country_code);
        Some(NewMessage {
            conversation_id: resolved.id,
            sender,
            content: row.body,
            timestamp,
            from_me: row.from_me,
        })
    }

    /// Conversations seen so far
    #[must_use]
    pub const fn conversations(&self) -> &ConversationSet {
        &self.conversations
    }

    /// Hash collisions detected so far
    #[must_use]
    pub const fn hash_collisions(&self) -> usize {
        self.resolver.collisions()
    }

    /// Format fixed for this assembler
    #[must_use]
    pub const fn format(&self) -> CsvFormat {
        self.format
    }
}

/// Normalize tokenized data lines, counting malformed and skipped rows
pub fn normalize_lines<S: AsRef<str>>(
    normalizer: &RowNormalizer, lines: &[S], stats: &mut RowStats, progress: &ProgressTracker, range: (u8, u8),
) -> Vec<CanonicalRow> {
    let metrics = MetricsCollector::default();
    let tag = normalizer.format().tag();
    let total = lines.len();
    let mut rows = Vec::with_capacity(total);
    let (mut malformed, mut skipped) = (0, 0);

    for (idx, line) in lines.iter().enumerate() {
        match normalizer.normalize(&parse_line(line.as_ref())) {
            RowOutcome::Content(row) => rows.push(row),
            RowOutcome::Skipped(reason) => {
                debug!(row = idx + 1, ?reason, "Skipping non-content row");
                skipped += 1;
            },
            RowOutcome::Malformed => malformed += 1,
        }
        if idx % 25 == 0 {
            progress.report_within(range.0, range.1, idx, total, &format!("Processed {idx} of {total} rows"));
        }
    }

    stats.dropped_rows += malformed;
    stats.skipped_rows += skipped;
    metrics.record_rows(tag, "content", rows.len());
    metrics.record_rows(tag, "skipped", skipped);
    metrics.record_rows(tag, "malformed", malformed);
    rows
}

/// Orchestrates ingestion runs against one store
pub struct IngestionService {
    store: Arc<dyn ConversationStore>,
    options: IngestOptions,
    metrics: MetricsCollector,
}

impl IngestionService {
    /// Service writing to `store`
    pub fn new(store: Arc<dyn ConversationStore>, options: IngestOptions) -> Self {
        Self {
            store,
            options,
            metrics: MetricsCollector::default(),
        }
    }

    /// Options this service runs with
    #[must_use]
    pub const fn options(&self) -> &IngestOptions {
        &self.options
    }

    /// Run every step up to `Resolving` without touching the store
    pub async fn prepare(
        &self, request: &IngestRequest, progress: Arc<dyn ProgressObserver>,
    ) -> std::result::Result<PreparedIngest, IngestFailure> {
        let tracker = ProgressTracker::new(progress);
        let mut step = IngestStep::Idle;
        match self.prepare_steps(request, &tracker, &mut step).await {
            Ok(prepared) => Ok(prepared),
            Err(error) => Err(self.fail(step, error, &tracker)),
        }
    }

    /// Ingest an upload to completion
    pub async fn ingest(
        &self, request: &IngestRequest, progress: Arc<dyn ProgressObserver>,
    ) -> std::result::Result<IngestSummary, IngestFailure> {
        self.ingest_cancellable(request, progress, &CancellationToken::new()).await
    }

    /// Ingest an upload, stopping before the next batch once `cancel` fires
    pub async fn ingest_cancellable(
        &self, request: &IngestRequest, progress: Arc<dyn ProgressObserver>, cancel: &CancellationToken,
    ) -> std::result::Result<IngestSummary, IngestFailure> {
        let tracker = ProgressTracker::new(progress);
        let mut step = IngestStep::Idle;
        match self.run(request, &tracker, cancel, &mut step).await {
            Ok(summary) => Ok(summary),
            Err(error) => Err(self.fail(step, error, &tracker)),
        }
    }

    fn fail(&self, step: IngestStep, error: IngestError, tracker: &ProgressTracker) -> IngestFailure {
        error!(step = %step, category = error.category(), error = %error, "Ingestion failed");
        self.metrics.record_error(error.category(), step.name());
        tracker.report(tracker.current(), &format!("Failed while {step}: {error}"));
        IngestFailure { step, error }
    }

    async fn run(
        &self, request: &IngestRequest, tracker: &ProgressTracker, cancel: &CancellationToken, step: &mut IngestStep,
    ) -> Result<IngestSummary> {
        let prepared = self.prepare_steps(request, tracker, step).await?;
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }

        let persister = BatchPersister::new(Arc::clone(&self.store), self.options.batch.clone());

        *step = IngestStep::PersistingConversations;
        tracker.report(70, &format!("Creating {} conversations", prepared.new_conversations.len()));
        let timer = OperationTimer::new("persisting_conversations");
        let conversations = persister
            .persist_conversations(&prepared.new_conversations, tracker, cancel)
            .await?;
        timer.finish();

        *step = IngestStep::PersistingMessages;
        tracker.report(75, &format!("Saving {} messages", prepared.messages.len()));
        let timer = OperationTimer::new("persisting_messages");
        let messages = persister.persist_messages(&prepared.messages, tracker, cancel).await?;
        timer.finish();

        *step = IngestStep::Done;
        let summary = IngestSummary {
            format: prepared.format.tag().to_string(),
            total_messages: messages.inserted,
            conversations: prepared.conversations.len(),
            conversations_created: conversations.created,
            phones_identified: prepared.conversations.phones_identified(),
            message_batches: messages.batches,
            merged_lines: prepared.stats.merged_lines,
            dropped_rows: prepared.stats.dropped_rows,
            skipped_rows: prepared.stats.skipped_rows,
            timestamp_fallbacks: prepared.stats.timestamp_fallbacks,
            hash_collisions: prepared.hash_collisions,
            compression: prepared.compression,
        };

        info!(
            format = %summary.format,
            messages = summary.total_messages,
            conversations = summary.conversations,
            created = summary.conversations_created,
            "Ingestion completed"
        );
        tracker.report(
            100,
            &format!(
                "Done: {} messages in {} conversations",
                summary.total_messages, summary.conversations
            ),
        );
        Ok(summary)
    }

    async fn prepare_steps(
        &self, request: &IngestRequest, tracker: &ProgressTracker, step: &mut IngestStep,
    ) -> Result<PreparedIngest> {
        *step = IngestStep::Validating;
        tracker.report(5, "Validating file");
        let timer = OperationTimer::new("validating");
        UploadValidator::validate_file_name(&request.file_name)?;
        UploadValidator::validate_user_id(request.user_id)?;
        UploadValidator::validate_size(request.content.len() as u64, self.options.max_file_size_bytes)?;
        let lines = split_lines(&request.content);
        UploadValidator::validate_line_count(lines.len())?;

        let compression = if self.options.compression_metrics {
            tracker.report(10, "Measuring compression");
            Some(compression_stats(&request.content).await?)
        } else {
            None
        };
        timer.finish();

        *step = IngestStep::Detecting;
        tracker.report(15, "Detecting CSV format");
        let header_line = lines[0];
        let headers = parse_header(header_line);
        let format = select_format(header_line, &headers, request.format_override)?;

        *step = IngestStep::Reconstructing;
        tracker.report(25, &format!("{} format detected, repairing broken lines", format.tag()));
        let timer = OperationTimer::new("reconstructing");
        let repaired = reconstruct_lines(&lines, headers.len(), self.options.max_join_lines);
        let mut stats = RowStats {
            merged_lines: repaired.merged,
            dropped_rows: repaired.dropped,
            ..RowStats::default()
        };
        timer.finish();
        if repaired.merged > 0 || repaired.dropped > 0 {
            info!(merged = repaired.merged, dropped = repaired.dropped, "Repaired split records");
        }

        *step = IngestStep::Normalizing;
        tracker.report(30, "Normalizing rows");
        let timer = OperationTimer::new("normalizing");
        let normalizer = RowNormalizer::new(format, &headers);
        let rows = normalize_lines(&normalizer, &repaired.lines[1..], &mut stats, tracker, (30, 50));
        timer.finish();

        *step = IngestStep::Resolving;
        tracker.report(50, &format!("Grouping {} messages into conversations", rows.len()));
        let timer = OperationTimer::new("resolving");
        let mut assembler = MessageAssembler::new(format, self.options.clone());
        let total = rows.len();
        let mut messages = Vec::with_capacity(total);
        for (idx, row) in rows.into_iter().enumerate() {
            if let Some(message) = assembler.assemble(row, &mut stats) {
                messages.push(message);
            }
            if idx % 25 == 0 {
                tracker.report_within(50, 70, idx, total, &format!("Resolved {idx} of {total} messages"));
            }
        }
        timer.finish();

        if stats.timestamp_fallbacks > 0 {
            warn!(
                count = stats.timestamp_fallbacks,
                policy = ?self.options.timestamp_fallback,
                "Rows without a timestamp"
            );
        }

        let conversations = assembler.conversations().clone();
        let new_conversations = conversations.to_new_conversations(request.user_id, &self.options.country_code);
        tracker.report(
            70,
            &format!(
                "{} messages in {} conversations ({} phones identified)",
                messages.len(),
                conversations.len(),
                conversations.phones_identified()
            ),
        );

        Ok(PreparedIngest {
            format,
            hash_collisions: assembler.hash_collisions(),
            conversations,
            new_conversations,
            messages,
            stats,
            compression,
        })
    }
}
