//! Data models for conversation reconstruction and storage
//!
//! This module contains the records handed to the store, the identifiers
//! derived during ingestion and the summary returned to callers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Smallest id produced by hashing a raw conversation key
pub const HASH_BAND_START: u32 = 10_000_000;
/// Width of the hash band; hashed ids fall in `[10_000_000, 60_000_000)`
pub const HASH_BAND_WIDTH: u32 = 50_000_000;
/// Largest id accepted from a numeric key
pub const MAX_CONVERSATION_ID: u32 = 999_999_999;

/// Numeric conversation identifier, always within `0..=999_999_999`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(u32);

impl ConversationId {
    /// Wrap a raw value, rejecting anything above the safety ceiling
    #[must_use]
    pub const fn new(value: u32) -> Option<Self> {
        if value > MAX_CONVERSATION_ID {
            None
        } else {
            Some(Self(value))
        }
    }

    /// Id inside the hash band for a band offset
    #[must_use]
    pub(crate) const fn in_hash_band(offset: u32) -> Self {
        Self(HASH_BAND_START + offset % HASH_BAND_WIDTH)
    }

    /// Underlying integer value
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Conversation row to create in the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewConversation {
    /// Derived conversation id (primary key)
    pub id: ConversationId,
    /// Display title
    pub title: String,
    /// Owning tenant/user
    pub user_id: i64,
    /// ISO 8601 creation time, from the source file when available
    pub created_at: String,
}

/// Message row to create in the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    /// Conversation this message belongs to
    pub conversation_id: ConversationId,
    /// Display name of the sender
    pub sender: String,
    /// Body text or synthesized placeholder
    pub content: String,
    /// ISO 8601 timestamp
    pub timestamp: String,
    /// True when the business sent the message
    #[serde(rename = "fromMe")]
    pub from_me: bool,
}

/// Conversation as stored, returned by store lookups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredConversation {
    /// Conversation id
    pub id: ConversationId,
    /// Display title
    pub title: String,
    /// Owning tenant/user
    pub user_id: i64,
    /// ISO 8601 creation time
    pub created_at: String,
}

/// Size metrics of a deflate pass over the upload
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionStats {
    /// Raw upload size in bytes
    pub original_bytes: u64,
    /// Compressed size in bytes
    pub compressed_bytes: u64,
}

impl CompressionStats {
    /// Size reduction in percent (0 when the input is empty)
    #[must_use]
    pub fn ratio_percent(&self) -> f64 {
        if self.original_bytes == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let saved = (self.original_bytes as f64 - self.compressed_bytes as f64) / self.original_bytes as f64;
        saved * 100.0
    }
}

/// Result of a successful ingestion run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    /// Detected or forced format tag
    pub format: String,
    /// Messages written to the store
    pub total_messages: usize,
    /// Distinct conversations touched by this run
    pub conversations: usize,
    /// Conversations newly created by this run
    pub conversations_created: usize,
    /// Conversations with an identified phone number
    pub phones_identified: usize,
    /// Message batches committed
    pub message_batches: usize,
    /// Physical lines merged back into a broken record
    pub merged_lines: usize,
    /// Records dropped because they could not be reconstructed or had too few fields
    pub dropped_rows: usize,
    /// Rows filtered out as non-content (system events, empty text)
    pub skipped_rows: usize,
    /// Messages stamped with ingestion time because the source had no timestamp
    pub timestamp_fallbacks: usize,
    /// Distinct raw keys that hashed onto an already-used id
    pub hash_collisions: usize,
    /// Compression metrics, when computed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressionStats>,
}
