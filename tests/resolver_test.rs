//! Unit tests for resolver.rs module

use chat_log_ingest::models::{HASH_BAND_START, HASH_BAND_WIDTH, MAX_CONVERSATION_ID};
use chat_log_ingest::resolver::{hash_key, numeric_key, ConversationKeyResolver, RawConversationKey};
use proptest::prelude::*;

#[test]
fn test_hash_known_values() {
    assert_eq!(hash_key("a").get(), 10_000_097);
    assert_eq!(hash_key("ab").get(), 10_003_105);
}

#[test]
fn test_numeric_key_strips_country_code() {
    assert_eq!(numeric_key("5511999990000", "55").map(|id| id.get()), Some(999_990_000));
    assert_eq!(numeric_key("+55 (11) 99999-0000", "55").map(|id| id.get()), Some(999_990_000));
}

#[test]
fn test_numeric_key_keeps_last_nine_digits() {
    assert_eq!(numeric_key("11999990000", "55").map(|id| id.get()), Some(999_990_000));
    assert_eq!(numeric_key("12345", "55").map(|id| id.get()), Some(12_345));
}

#[test]
fn test_numeric_key_rejects_letters_and_zero() {
    assert_eq!(numeric_key("abc123", "55"), None);
    assert_eq!(numeric_key("000000000", "55"), None);
    assert_eq!(numeric_key("---", "55"), None);
}

#[test]
fn test_resolver_hashes_opaque_keys() {
    let mut resolver = ConversationKeyResolver::new("55");
    let resolved = resolver.resolve(&RawConversationKey::Primary("abc123hash".to_string()));

    assert_eq!(resolved.id, hash_key("abc123hash"));
    assert_eq!(resolved.raw.as_deref(), Some("abc123hash"));
}

#[test]
fn test_resolver_is_stable_across_runs() {
    let key = RawConversationKey::Primary("5511988887777".to_string());
    let first = ConversationKeyResolver::new("55").resolve(&key);
    let second = ConversationKeyResolver::new("55").resolve(&key);
    assert_eq!(first, second);
}

#[test]
fn test_resolver_formatting_variants_share_id_without_collision() {
    let mut resolver = ConversationKeyResolver::new("55");
    let a = resolver.resolve(&RawConversationKey::Primary("5511999990000".to_string()));
    let b = resolver.resolve(&RawConversationKey::Primary("+55 11 99999-0000".to_string()));

    assert_eq!(a.id, b.id);
    assert_eq!(resolver.collisions(), 0);
}

#[test]
fn test_resolver_missing_key_gets_small_id() {
    let mut resolver = ConversationKeyResolver::new("55");
    let resolved = resolver.resolve(&RawConversationKey::Missing);

    assert!(resolved.raw.is_none());
    assert!((1..=999_999).contains(&resolved.id.get()));
}

proptest! {
    #[test]
    fn prop_hash_stays_in_band(raw in "\\PC{0,40}") {
        let id = hash_key(&raw).get();
        prop_assert!(id >= HASH_BAND_START);
        prop_assert!(id < HASH_BAND_START + HASH_BAND_WIDTH);
        prop_assert_eq!(hash_key(&raw), hash_key(&raw));
    }

    #[test]
    fn prop_numeric_key_within_ceiling(raw in "[0-9+() -]{1,30}") {
        if let Some(id) = numeric_key(&raw, "55") {
            prop_assert!(id.get() >= 1);
            prop_assert!(id.get() <= MAX_CONVERSATION_ID);
        }
    }
}
