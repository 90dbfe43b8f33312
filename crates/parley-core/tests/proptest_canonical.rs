//! Property-based tests for canonical serialization and signing

#![allow(clippy::expect_used, clippy::unwrap_used)]

use parley_core::{canonicalize, sha256, Keypair, Signature};
use proptest::prelude::*;
use serde_json::Value;

/// Strategy for JSON values restricted to what protocol payloads carry:
/// strings, integers, booleans, nulls, and nested arrays/objects of those.
fn json_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|i| Value::Number(i.into())),
        "[a-zA-Z0-9 _\\-\"\\\\]{0,24}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::hash_map("[a-z_]{1,12}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    /// Canonicalization is deterministic
    #[test]
    fn canonicalize_deterministic(value in json_value()) {
        let a = canonicalize(&value).unwrap();
        let b = canonicalize(&value).unwrap();
        prop_assert_eq!(a, b);
    }

    /// Canonical output re-parses to the same value
    #[test]
    fn canonicalize_round_trips(value in json_value()) {
        let canonical = canonicalize(&value).unwrap();
        let reparsed: Value = serde_json::from_str(&canonical).unwrap();
        prop_assert_eq!(canonicalize(&reparsed).unwrap(), canonical);
    }

    /// Canonical form is independent of field insertion order
    #[test]
    fn canonicalize_order_independent(value in json_value()) {
        let canonical = canonicalize(&value).unwrap();
        // A parse of pretty-printed JSON rebuilds the maps in document order,
        // which differs from the original insertion order for sorted output.
        let pretty = serde_json::to_string_pretty(&value).unwrap();
        let reparsed: Value = serde_json::from_str(&pretty).unwrap();
        prop_assert_eq!(canonicalize(&reparsed).unwrap(), canonical);
    }

    /// Signing canonical bytes verifies; tampering breaks verification
    #[test]
    fn canonical_sign_verify(value in json_value(), flip in any::<u8>()) {
        let keypair = Keypair::generate();
        let canonical = canonicalize(&value).unwrap();
        let signature = keypair.sign(canonical.as_bytes());
        prop_assert!(keypair.public_key().verify(canonical.as_bytes(), &signature));

        let mut tampered = canonical.clone().into_bytes();
        if !tampered.is_empty() {
            let idx = flip as usize % tampered.len();
            tampered[idx] = tampered[idx].wrapping_add(1);
            prop_assert!(!keypair.public_key().verify(&tampered, &signature));
        }
    }

    /// Signature hex round-trip preserves verification
    #[test]
    fn signature_hex_round_trip(message in any::<Vec<u8>>()) {
        let keypair = Keypair::generate();
        let signature = keypair.sign(&message);
        let restored = Signature::from_hex(&signature.to_hex()).unwrap();
        prop_assert!(keypair.public_key().verify(&message, &restored));
    }

    /// Hashes of canonical bytes are stable identifiers
    #[test]
    fn canonical_hash_deterministic(value in json_value()) {
        let canonical = canonicalize(&value).unwrap();
        prop_assert_eq!(sha256(canonical.as_bytes()), sha256(canonical.as_bytes()));
    }
}
