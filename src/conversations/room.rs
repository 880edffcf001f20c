//! Canonical room identity.
//!
//! A conversation between two participants has exactly one id no matter
//! which side opens it: the pair is sorted lexicographically and joined as
//! `conversation_<min>_<max>`.

use crate::error::ChatError;

/// Order a participant pair canonically (smaller id first).
pub fn sorted_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Derive the canonical room id for a participant pair.
/// Commutative in its arguments; rejects empty ids and self-pairs instead
/// of panicking.
pub fn room_id(a: &str, b: &str) -> Result<String, ChatError> {
    if a.is_empty() || b.is_empty() {
        return Err(ChatError::Validation(
            "participant ids must be non-empty".to_string(),
        ));
    }
    if a == b {
        return Err(ChatError::Validation(
            "cannot open a conversation with yourself".to_string(),
        ));
    }

    let (first, second) = sorted_pair(a, b);
    Ok(format!("conversation_{first}_{second}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_commutative() {
        let ab = room_id("partner-42", "customer-7").unwrap();
        let ba = room_id("customer-7", "partner-42").unwrap();
        assert_eq!(ab, ba);
        assert_eq!(ab, "conversation_customer-7_partner-42");
    }

    #[test]
    fn test_distinct_pairs_get_distinct_ids() {
        let first = room_id("alice", "bob").unwrap();
        let second = room_id("alice", "carol").unwrap();
        let third = room_id("bob", "carol").unwrap();
        assert_ne!(first, second);
        assert_ne!(first, third);
        assert_ne!(second, third);
    }

    #[test]
    fn test_rejects_self_pair() {
        assert!(room_id("alice", "alice").is_err());
    }

    #[test]
    fn test_rejects_empty_participant() {
        assert!(room_id("", "bob").is_err());
        assert!(room_id("alice", "").is_err());
    }

    #[test]
    fn test_sorted_pair_orders_lexicographically() {
        assert_eq!(sorted_pair("b", "a"), ("a", "b"));
        assert_eq!(sorted_pair("a", "b"), ("a", "b"));
    }
}
