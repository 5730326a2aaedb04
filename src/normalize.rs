//! Row normalization: vendor records to canonical message rows.
//!
//! Each vendor format has its own typed record so the format-specific rules
//! below are exhaustive matches rather than lookups into a loose map.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use std::collections::HashMap;

use crate::format::CsvFormat;
use crate::resolver::RawConversationKey;

/// Kind of message a row carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// Plain text (`text` in WRL, `chat` in RCWS)
    Text,
    /// Document attachment
    Document,
    /// Image attachment
    Image,
    /// Anything else, including system events such as `note_action`
    Other(String),
}

impl MessageKind {
    fn parse(format: CsvFormat, raw: &str) -> Self {
        let lowered = raw.trim().to_lowercase();
        match (format, lowered.as_str()) {
            (CsvFormat::Wrl, "text") | (CsvFormat::Rcws, "chat") => Self::Text,
            (CsvFormat::Wrl, "document") => Self::Document,
            (_, "image") => Self::Image,
            _ => Self::Other(lowered),
        }
    }

    /// Whether rows of this kind become messages for `format`
    #[must_use]
    pub const fn is_content(&self, format: CsvFormat) -> bool {
        match format {
            CsvFormat::Wrl => matches!(self, Self::Text | Self::Document | Self::Image),
            CsvFormat::Rcws => matches!(self, Self::Text | Self::Image),
        }
    }
}

/// Raw WRL export row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WrlRecord {
    /// Chat/phone identifier
    pub chat_id: Option<String>,
    /// Contact phone number
    pub mobile_number: Option<String>,
    /// Conversation creation time
    pub chat_created: Option<String>,
    /// Per-message identifier
    pub message_id: Option<String>,
    /// Outgoing flag
    pub from_me: Option<String>,
    /// Direction column (informational)
    pub direction: Option<String>,
    /// Message kind
    pub kind: Option<String>,
    /// Body or caption
    pub text: Option<String>,
    /// Message time
    pub message_created: Option<String>,
}

/// Raw RCWS export row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RcwsRecord {
    /// Row identifier
    pub id: Option<String>,
    /// Opaque chat hash
    pub chat: Option<String>,
    /// Contact phone number
    pub phone: Option<String>,
    /// Outgoing flag
    pub is_out: Option<String>,
    /// Sender display id
    pub wa_sender_id: Option<String>,
    /// Message kind
    pub kind: Option<String>,
    /// Body or caption
    pub text: Option<String>,
    /// Unix seconds or ISO string
    pub timestamp: Option<String>,
    /// Secondary creation time
    pub created: Option<String>,
}

/// One tokenized row, tagged by vendor format
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRecord {
    /// WRL row
    Wrl(WrlRecord),
    /// RCWS row
    Rcws(RcwsRecord),
}

/// Canonical row handed to key resolution and role inference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRow {
    /// Raw conversation key
    pub key: RawConversationKey,
    /// Phone number associated with the conversation, unformatted
    pub phone: Option<String>,
    /// Explicit sender id, when the format has one
    pub sender_id: Option<String>,
    /// Message body or placeholder
    pub body: String,
    /// Normalized timestamp; `None` when the row had none
    pub timestamp: Option<String>,
    /// Conversation start time reported by the source
    pub conversation_started: Option<String>,
    /// True when the business sent the message
    pub from_me: bool,
    /// Message kind
    pub kind: MessageKind,
}

/// Why a row produced no message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Kind is not content-bearing for the format
    NonContentKind(String),
    /// Text row with an empty body
    EmptyText,
}

/// Result of normalizing one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    /// Row becomes a message
    Content(CanonicalRow),
    /// Row is valid but carries no content
    Skipped(SkipReason),
    /// Row has too few fields to be trusted
    Malformed,
}

/// Maps tokenized rows of one file to canonical rows
#[derive(Debug, Clone)]
pub struct RowNormalizer {
    format: CsvFormat,
    columns: HashMap<String, usize>,
    header_len: usize,
}

impl RowNormalizer {
    /// Build a normalizer for a header already validated against `format`
    #[must_use]
    pub fn new(format: CsvFormat, headers: &[String]) -> Self {
        let mut columns = HashMap::with_capacity(headers.len());
        for (idx, name) in headers.iter().enumerate() {
            columns.entry(name.trim().to_lowercase()).or_insert(idx);
        }
        Self {
            format,
            columns,
            header_len: headers.len(),
        }
    }

    /// Format this normalizer was built for
    #[must_use]
    pub const fn format(&self) -> CsvFormat {
        self.format
    }

    /// Number of header columns
    #[must_use]
    pub const fn header_len(&self) -> usize {
        self.header_len
    }

    fn field(&self, fields: &[String], name: &str) -> Option<String> {
        let idx = *self.columns.get(name)?;
        let value = fields.get(idx)?.trim();
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    }

    /// Pull the typed vendor record out of a tokenized row
    #[must_use]
    pub fn extract(&self, fields: &[String]) -> SourceRecord {
        let get = |name: &str| self.field(fields, name);
        match self.format {
            CsvFormat::Wrl => SourceRecord::Wrl(WrlRecord {
                chat_id: get("chat_id"),
                mobile_number: get("mobile_number"),
                chat_created: get("chat_created"),
                message_id: get("message_id"),
                from_me: get("fromme"),
                direction: get("direction"),
                kind: get("type"),
                text: get("text"),
                message_created: get("message_created"),
            }),
            CsvFormat::Rcws => SourceRecord::Rcws(RcwsRecord {
                id: get("_id"),
                chat: get("chat"),
                phone: get("phone"),
                is_out: get("is_out"),
                wa_sender_id: get("wa_sender_id"),
                kind: get("type"),
                text: get("text"),
                timestamp: get("timestamp"),
                created: get("created"),
            }),
        }
    }

    /// Normalize one tokenized row
    #[must_use]
    pub fn normalize(&self, fields: &[String]) -> RowOutcome {
        if fields.len() + 2 < self.header_len {
            return RowOutcome::Malformed;
        }
        normalize_record(self.extract(fields))
    }
}

/// Apply the format-specific filter, body and ownership rules to a record
#[must_use]
pub fn normalize_record(record: SourceRecord) -> RowOutcome {
    match record {
        SourceRecord::Wrl(row) => {
            let kind = MessageKind::parse(CsvFormat::Wrl, row.kind.as_deref().unwrap_or("text"));
            if let Some(reason) = skip_reason(CsvFormat::Wrl, &kind, row.text.as_deref()) {
                return RowOutcome::Skipped(reason);
            }

            let key = RawConversationKey::from_fields(row.chat_id.clone(), row.message_id);
            let phone = row.mobile_number.or_else(|| row.chat_id.filter(|id| looks_like_phone(id)));
            let timestamp = row.message_created.as_deref().and_then(normalize_timestamp);

            RowOutcome::Content(CanonicalRow {
                key,
                phone,
                sender_id: None,
                body: synthesize_body(&kind, row.text),
                conversation_started: row.chat_created.or_else(|| timestamp.clone()),
                timestamp,
                from_me: row.from_me.as_deref().is_some_and(is_truthy),
                kind,
            })
        },
        SourceRecord::Rcws(row) => {
            let kind = MessageKind::parse(CsvFormat::Rcws, row.kind.as_deref().unwrap_or("chat"));
            if let Some(reason) = skip_reason(CsvFormat::Rcws, &kind, row.text.as_deref()) {
                return RowOutcome::Skipped(reason);
            }

            let key = RawConversationKey::from_fields(row.chat, row.id);
            let timestamp = row
                .timestamp
                .as_deref()
                .or(row.created.as_deref())
                .and_then(normalize_timestamp);
            let sender_id = row.wa_sender_id.filter(|s| !s.eq_ignore_ascii_case("null"));

            RowOutcome::Content(CanonicalRow {
                key,
                phone: row.phone,
                sender_id,
                body: synthesize_body(&kind, row.text),
                conversation_started: timestamp.clone(),
                timestamp,
                from_me: row.is_out.as_deref().is_some_and(is_truthy),
                kind,
            })
        },
    }
}

fn skip_reason(format: CsvFormat, kind: &MessageKind, text: Option<&str>) -> Option<SkipReason> {
    if !kind.is_content(format) {
        let name = match kind {
            MessageKind::Other(name) => name.clone(),
            _ => String::new(),
        };
        return Some(SkipReason::NonContentKind(name));
    }
    if *kind == MessageKind::Text && text.is_none_or(|t| t.trim().is_empty()) {
        return Some(SkipReason::EmptyText);
    }
    None
}

/// Body for a content row: raw text for text rows, a placeholder otherwise
#[must_use]
pub fn synthesize_body(kind: &MessageKind, text: Option<String>) -> String {
    match kind {
        MessageKind::Text => text.unwrap_or_default(),
        MessageKind::Document => format!("📎 Document: {}", text.unwrap_or_else(|| "File sent".to_string())),
        MessageKind::Image => match text {
            Some(caption) => format!("🖼️ Image: {caption}"),
            None => "🖼️ Image sent".to_string(),
        },
        MessageKind::Other(name) => format!("📎 {name}: {}", text.unwrap_or_else(|| "Media sent".to_string())),
    }
}

/// Boolean-like flag values used by the exports
#[must_use]
pub fn is_truthy(value: &str) -> bool {
    let v = value.trim();
    v == "1" || v.eq_ignore_ascii_case("true")
}

fn looks_like_phone(value: &str) -> bool {
    !value.chars().any(char::is_alphabetic) && value.chars().filter(char::is_ascii_digit).count() >= 10
}

/// Normalize a source timestamp.
///
/// A bare integer is Unix epoch seconds and becomes ISO 8601 UTC; anything
/// else passes through untouched. Blank values yield `None`.
#[must_use]
pub fn normalize_timestamp(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(secs) = raw.parse::<i64>() {
        if let Some(dt) = DateTime::from_timestamp(secs, 0) {
            return Some(dt.to_rfc3339_opts(SecondsFormat::Millis, true));
        }
    }
    Some(raw.to_string())
}

/// Parse a normalized timestamp for ordering; `None` when unrecognized
#[must_use]
pub fn parse_source_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
