//! Two-phase batched writes: every conversation first, then every message.
//!
//! Batches commit independently. A failed batch stops the run and the error
//! names it; earlier batches stay committed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{BatchKind, IngestError, Result};
use crate::inference::conversation_title;
use crate::metrics::{MetricsCollector, MetricsTimer};
use crate::models::{ConversationId, NewConversation, NewMessage};
use crate::normalize::parse_source_timestamp;
use crate::progress::ProgressTracker;
use crate::repository::ConversationStore;

/// Progress sub-range for conversation batches
pub const CONVERSATION_PROGRESS: (u8, u8) = (70, 75);
/// Progress sub-range for message batches
pub const MESSAGE_PROGRESS: (u8, u8) = (75, 95);

/// Batch sizing and pacing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSettings {
    /// Conversations per insert call
    pub conversation_batch_size: usize,
    /// Messages per insert call
    pub message_batch_size: usize,
    /// Ids per existence lookup
    pub lookup_chunk_size: usize,
    /// Pause between consecutive batches
    pub batch_delay: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            conversation_batch_size: 100,
            message_batch_size: 100,
            lookup_chunk_size: 500,
            batch_delay: Duration::from_millis(50),
        }
    }
}

/// Conversation discovered during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConversation {
    /// Derived id
    pub id: ConversationId,
    /// First phone number seen for this conversation
    pub phone: Option<String>,
    /// Earliest source timestamp seen for this conversation
    pub started: Option<String>,
}

/// Ordered set of conversations discovered during a run
#[derive(Debug, Clone, Default)]
pub struct ConversationSet {
    order: Vec<ConversationId>,
    entries: HashMap<ConversationId, PendingConversation>,
}

impl ConversationSet {
    /// Empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a row belongs to `id`.
    ///
    /// The first non-empty phone wins; the start time keeps the earliest value
    /// that parses, or the first value seen when none parse.
    pub fn observe(&mut self, id: ConversationId, phone: Option<&str>, started: Option<&str>) {
        let entry = self.entries.entry(id).or_insert_with(|| {
            self.order.push(id);
            PendingConversation {
                id,
                phone: None,
                started: None,
            }
        });

        if entry.phone.is_none() {
            entry.phone = phone.filter(|p| !p.trim().is_empty()).map(str::to_string);
        }

        if let Some(candidate) = started {
            let earlier = match entry.started.as_deref() {
                None => true,
                Some(current) => match (parse_source_timestamp(candidate), parse_source_timestamp(current)) {
                    (Some(new), Some(old)) => new < old,
                    (Some(_), None) => true,
                    _ => false,
                },
            };
            if earlier {
                entry.started = Some(candidate.to_string());
            }
        }
    }

    /// Ids in first-seen order
    #[must_use]
    pub fn ids(&self) -> Vec<ConversationId> {
        self.order.clone()
    }

    /// Conversations in first-seen order
    pub fn iter(&self) -> impl Iterator<Item = &PendingConversation> {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }

    /// Entry for `id`
    #[must_use]
    pub fn get(&self, id: ConversationId) -> Option<&PendingConversation> {
        self.entries.get(&id)
    }

    /// Number of conversations
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True when no conversation was seen
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Conversations with a captured phone number
    #[must_use]
    pub fn phones_identified(&self) -> usize {
        self.entries.values().filter(|c| c.phone.is_some()).count()
    }

    /// Store rows for every conversation, titled from the captured phone
    #[must_use]
    pub fn to_new_conversations(&self, user_id: i64, country_code: &str) -> Vec<NewConversation> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        self.iter()
            .map(|c| NewConversation {
                id: c.id,
                title: conversation_title(c.id, c.phone.as_deref(), country_code),
                user_id,
                created_at: c.started.clone().unwrap_or_else(|| now.clone()),
            })
            .collect()
    }
}

/// Result of the conversation phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversationOutcome {
    /// Conversations that already existed
    pub existing: usize,
    /// Conversations inserted by this run
    pub created: usize,
    /// Insert batches committed
    pub batches: usize,
}

/// Result of the message phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageOutcome {
    /// Messages inserted
    pub inserted: usize,
    /// Insert batches committed
    pub batches: usize,
}

/// Drives batched writes against a `ConversationStore`
#[derive(Clone)]
pub struct BatchPersister {
    store: Arc<dyn ConversationStore>,
    settings: BatchSettings,
    metrics: MetricsCollector,
}

impl BatchPersister {
    /// Persister writing to `store`
    pub fn new(store: Arc<dyn ConversationStore>, settings: BatchSettings) -> Self {
        Self {
            store,
            settings,
            metrics: MetricsCollector::default(),
        }
    }

    /// Ids among `ids` that the store already holds, looked up in chunks
    pub async fn existing_ids(&self, ids: &[ConversationId]) -> Result<HashSet<ConversationId>> {
        let mut existing = HashSet::new();
        for chunk in ids.chunks(self.settings.lookup_chunk_size.max(1)) {
            existing.extend(self.store.existing_conversation_ids(chunk).await?);
        }
        Ok(existing)
    }

    /// Phase one: create conversations the store does not have yet
    pub async fn persist_conversations(
        &self, rows: &[NewConversation], progress: &ProgressTracker, cancel: &CancellationToken,
    ) -> Result<ConversationOutcome> {
        let ids: Vec<ConversationId> = rows.iter().map(|r| r.id).collect();
        let existing = self.existing_ids(&ids).await?;
        let fresh: Vec<NewConversation> = rows.iter().filter(|r| !existing.contains(&r.id)).cloned().collect();

        let mut outcome = ConversationOutcome {
            existing: existing.len(),
            ..ConversationOutcome::default()
        };
        info!(total = rows.len(), existing = outcome.existing, new = fresh.len(), "Creating conversations");

        let batches: Vec<&[NewConversation]> = fresh.chunks(self.settings.conversation_batch_size.max(1)).collect();
        let total_batches = batches.len();
        for (idx, batch) in batches.into_iter().enumerate() {
            if idx > 0 {
                self.pause(cancel).await?;
            } else if cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }

            let timer = MetricsTimer::new(self.metrics, BatchKind::Conversation, batch.len());
            match self.store.insert_conversations(batch).await {
                Ok(inserted) => {
                    timer.finish(true);
                    outcome.created += inserted;
                    outcome.batches += 1;
                    debug!(batch = idx + 1, inserted, "Conversation batch saved");
                },
                Err(e) => {
                    timer.finish(false);
                    error!(batch = idx + 1, error = %e, "Conversation batch failed");
                    return Err(IngestError::Persistence {
                        kind: BatchKind::Conversation,
                        batch_index: idx + 1,
                        batches_succeeded: outcome.batches,
                        message: e.to_string(),
                    });
                },
            }

            let (start, end) = CONVERSATION_PROGRESS;
            progress.report_within(
                start,
                end,
                idx + 1,
                total_batches,
                &format!("Created {} conversations (batch {}/{})", outcome.created, idx + 1, total_batches),
            );
        }

        Ok(outcome)
    }

    /// Phase two: insert messages in source order
    pub async fn persist_messages(
        &self, messages: &[NewMessage], progress: &ProgressTracker, cancel: &CancellationToken,
    ) -> Result<MessageOutcome> {
        let mut outcome = MessageOutcome::default();
        let batches: Vec<&[NewMessage]> = messages.chunks(self.settings.message_batch_size.max(1)).collect();
        let total_batches = batches.len();
        info!(messages = messages.len(), batches = total_batches, "Saving messages");

        for (idx, batch) in batches.into_iter().enumerate() {
            if idx > 0 {
                self.pause(cancel).await?;
            } else if cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }

            let timer = MetricsTimer::new(self.metrics, BatchKind::Message, batch.len());
            match self.store.insert_messages(batch).await {
                Ok(inserted) => {
                    timer.finish(true);
                    outcome.inserted += inserted;
                    outcome.batches += 1;
                },
                Err(e) => {
                    timer.finish(false);
                    error!(batch = idx + 1, error = %e, "Message batch failed");
                    return Err(IngestError::Persistence {
                        kind: BatchKind::Message,
                        batch_index: idx + 1,
                        batches_succeeded: outcome.batches,
                        message: e.to_string(),
                    });
                },
            }

            let (start, end) = MESSAGE_PROGRESS;
            progress.report_within(
                start,
                end,
                outcome.inserted,
                messages.len(),
                &format!(
                    "Saved {} of {} messages (batch {}/{})",
                    outcome.inserted,
                    messages.len(),
                    idx + 1,
                    total_batches
                ),
            );
        }

        Ok(outcome)
    }

    async fn pause(&self, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            () = cancel.cancelled() => Err(IngestError::Cancelled),
            () = tokio::time::sleep(self.settings.batch_delay) => Ok(()),
        }
    }
}
