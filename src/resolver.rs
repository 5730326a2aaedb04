//! Conversation key resolution.
//!
//! Raw keys are phone-like numbers (WRL `chat_id`) or opaque hashes (RCWS
//! `chat`). Both map onto a `ConversationId` that fits the store's integer
//! column. Resolution is pure for a given key: no clock, no seed.

use rand::Rng;
use std::collections::HashMap;
use tracing::warn;

use crate::models::{ConversationId, HASH_BAND_WIDTH};

/// Raw key material for one row
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RawConversationKey {
    /// Chat identifier column
    Primary(String),
    /// Row identifier, used when the chat identifier is blank
    Secondary(String),
    /// Neither field present
    Missing,
}

impl RawConversationKey {
    /// Pick the primary field, then the secondary one
    #[must_use]
    pub fn from_fields(primary: Option<String>, secondary: Option<String>) -> Self {
        match (primary, secondary) {
            (Some(p), _) => Self::Primary(p),
            (None, Some(s)) => Self::Secondary(s),
            (None, None) => Self::Missing,
        }
    }

    /// Raw key text, if any
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Primary(s) | Self::Secondary(s) => Some(s),
            Self::Missing => None,
        }
    }
}

/// Hash a raw key into `[10_000_000, 60_000_000)`.
///
/// 32-bit polynomial hash (`h * 31 + unit` over UTF-16 code units, wrapping),
/// folded into the band by absolute remainder plus offset. The band is shared
/// with ids already persisted by earlier imports, so the function must stay
/// bit-for-bit stable.
#[must_use]
pub fn hash_key(raw: &str) -> ConversationId {
    let mut hash: i32 = 0;
    for unit in raw.encode_utf16() {
        hash = hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(i32::from(unit));
    }
    #[allow(clippy::cast_possible_wrap)]
    let width = HASH_BAND_WIDTH as i32;
    ConversationId::in_hash_band((hash % width).unsigned_abs())
}

/// Numeric id for a phone-like key, or `None` when the key must be hashed.
///
/// Non-digits are stripped; a leading country code is removed when more than
/// 11 digits remain; the last 9 digits form the id. Keys with letters, keys
/// without digits and keys whose suffix is zero all return `None`.
#[must_use]
pub fn numeric_key(raw: &str, country_code: &str) -> Option<ConversationId> {
    if raw.chars().any(char::is_alphabetic) {
        return None;
    }
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    let national = match digits.strip_prefix(country_code) {
        Some(rest) if digits.len() > 11 && !country_code.is_empty() => rest,
        _ => digits.as_str(),
    };
    let suffix = &national[national.len().saturating_sub(9)..];
    let value: u32 = suffix.parse().ok()?;
    if value == 0 {
        return None;
    }
    ConversationId::new(value)
}

/// Id assigned to one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKey {
    /// Derived id
    pub id: ConversationId,
    /// Raw key the id came from; `None` for synthesized ids
    pub raw: Option<String>,
}

/// Memoizing resolver for one ingestion run
#[derive(Debug)]
pub struct ConversationKeyResolver {
    country_code: String,
    memo: HashMap<String, ConversationId>,
    owners: HashMap<ConversationId, (String, bool)>,
    collisions: usize,
}

impl ConversationKeyResolver {
    /// New resolver stripping `country_code` from long numeric keys
    #[must_use]
    pub fn new(country_code: impl Into<String>) -> Self {
        Self {
            country_code: country_code.into(),
            memo: HashMap::new(),
            owners: HashMap::new(),
            collisions: 0,
        }
    }

    /// Resolve a raw key to its conversation id
    pub fn resolve(&mut self, key: &RawConversationKey) -> ResolvedKey {
        let Some(raw) = key.as_str() else {
            let id = random_id();
            warn!(conversation_id = %id, "Row has no conversation key, using a synthesized id");
            return ResolvedKey { id, raw: None };
        };

        if let Some(id) = self.memo.get(raw) {
            return ResolvedKey {
                id: *id,
                raw: Some(raw.to_string()),
            };
        }

        let (id, hashed) = match numeric_key(raw, &self.country_code) {
            Some(id) => (id, false),
            None => (hash_key(raw), true),
        };
        self.track_owner(raw, id, hashed);
        self.memo.insert(raw.to_string(), id);
        ResolvedKey {
            id,
            raw: Some(raw.to_string()),
        }
    }

    fn track_owner(&mut self, raw: &str, id: ConversationId, hashed: bool) {
        match self.owners.get(&id) {
            // Numeric keys that differ only in formatting share an id on purpose.
            Some((owner, owner_hashed)) if owner != raw && (hashed || *owner_hashed) => {
                self.collisions += 1;
                warn!(conversation_id = %id, first = %owner, second = %raw, "Conversation id collision");
            },
            Some(_) => {},
            None => {
                self.owners.insert(id, (raw.to_string(), hashed));
            },
        }
    }

    /// Distinct raw keys that landed on an id already owned by another key
    #[must_use]
    pub const fn collisions(&self) -> usize {
        self.collisions
    }
}

fn random_id() -> ConversationId {
    let value = rand::thread_rng().gen_range(1..=999_999);
    ConversationId::new(value).unwrap_or(ConversationId::in_hash_band(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_key_strips_country_code() {
        assert_eq!(numeric_key("5511999990000", "55").map(ConversationId::get), Some(999_990_000));
        assert_eq!(numeric_key("+55 (11) 99999-0000", "55").map(ConversationId::get), Some(999_990_000));
        assert_eq!(numeric_key("11999990000", "55").map(ConversationId::get), Some(999_990_000));
    }

    #[test]
    fn test_numeric_key_short() {
        assert_eq!(numeric_key("12345", "55").map(ConversationId::get), Some(12345));
    }

    #[test]
    fn test_alphabetic_key_is_hashed() {
        assert_eq!(numeric_key("abc123hash", "55"), None);
        let id = hash_key("abc123hash").get();
        assert!((10_000_000..60_000_000).contains(&id));
    }

    #[test]
    fn test_zero_key_is_hashed() {
        assert_eq!(numeric_key("000000000", "55"), None);
        let mut resolver = ConversationKeyResolver::new("55");
        let resolved = resolver.resolve(&RawConversationKey::Primary("000000000".to_string()));
        assert!(resolved.id.get() >= 10_000_000);
    }

    #[test]
    fn test_known_hash_values() {
        // "a" = 97
        assert_eq!(hash_key("a").get(), 10_000_097);
        // "ab" = 97 * 31 + 98
        assert_eq!(hash_key("ab").get(), 10_003_105);
    }

    #[test]
    fn test_missing_key_synthesized() {
        let mut resolver = ConversationKeyResolver::new("55");
        let resolved = resolver.resolve(&RawConversationKey::Missing);
        assert!(resolved.raw.is_none());
        assert!((1..=999_999).contains(&resolved.id.get()));
    }

    #[test]
    fn test_same_phone_different_format_no_collision() {
        let mut resolver = ConversationKeyResolver::new("55");
        let a = resolver.resolve(&RawConversationKey::Primary("5511999990000".to_string()));
        let b = resolver.resolve(&RawConversationKey::Primary("11999990000".to_string()));
        assert_eq!(a.id, b.id);
        assert_eq!(resolver.collisions(), 0);
    }
}
