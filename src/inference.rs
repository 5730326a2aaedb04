//! Conversation titles and sender display names.

use serde::{Deserialize, Serialize};

use crate::format::CsvFormat;
use crate::models::ConversationId;
use crate::normalize::CanonicalRow;

/// Business display names used as the sender of outgoing messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessNames {
    /// Sender name for outgoing WRL messages
    pub wrl: String,
    /// Sender name for outgoing RCWS messages
    pub rcws: String,
}

impl Default for BusinessNames {
    fn default() -> Self {
        Self {
            wrl: "WRL Bonés".to_string(),
            rcws: "RCWS Advogados".to_string(),
        }
    }
}

impl BusinessNames {
    /// Display name for `format`
    #[must_use]
    pub fn for_format(&self, format: CsvFormat) -> &str {
        match format {
            CsvFormat::Wrl => &self.wrl,
            CsvFormat::Rcws => &self.rcws,
        }
    }
}

/// Label for incoming messages with no usable contact identifier
#[must_use]
pub const fn contact_label(format: CsvFormat) -> &'static str {
    match format {
        CsvFormat::Wrl => "Contact",
        CsvFormat::Rcws => "Client",
    }
}

/// Format a phone number as `(AA) NNNNN-NNNN` or `(AA) NNNN-NNNN`.
///
/// The country code is dropped when the number carries it. Returns `None`
/// when fewer than 10 national digits remain.
#[must_use]
pub fn format_phone(raw: &str, country_code: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    let national = match digits.strip_prefix(country_code) {
        Some(rest) if !country_code.is_empty() && digits.len() >= 12 => rest,
        _ => digits.as_str(),
    };

    match national.len() {
        0..=9 => None,
        10 => Some(format!("({}) {}-{}", &national[..2], &national[2..6], &national[6..])),
        len => {
            let n = &national[len - 11..];
            Some(format!("({}) {}-{}", &n[..2], &n[2..7], &n[7..]))
        },
    }
}

/// Title for a conversation: the formatted phone, else `Conversation <id>`
#[must_use]
pub fn conversation_title(id: ConversationId, phone: Option<&str>, country_code: &str) -> String {
    phone
        .and_then(|p| format_phone(p, country_code))
        .unwrap_or_else(|| format!("Conversation {id}"))
}

/// Sender display name for a canonical row.
///
/// Outgoing rows use the business name. Incoming rows use the explicit
/// sender id, then the phone (formatted when possible), then a generic label.
#[must_use]
pub fn sender_name(format: CsvFormat, row: &CanonicalRow, names: &BusinessNames, country_code: &str) -> String {
    if row.from_me {
        return names.for_format(format).to_string();
    }
    if let Some(sender) = &row.sender_id {
        return sender.clone();
    }
    match &row.phone {
        Some(phone) => format_phone(phone, country_code).unwrap_or_else(|| phone.clone()),
        None => contact_label(format).to_string(),
    }
}
