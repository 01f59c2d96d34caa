//! Tests for the viewed-files map round-trip law.

use super::*;

/// serialize-then-parse is the identity on the map.
#[test]
fn test_round_trip_is_identity() {
    let mut viewed = ViewedFiles::default();
    viewed.set("src/lib.rs", true);
    viewed.set("README.md", false);

    let round_tripped = ViewedFiles::parse(&viewed.serialize());
    assert_eq!(round_tripped, viewed);
}

/// Setting a key after a round trip equals setting it on the original:
/// the map is total modulo key ordering.
#[test]
fn test_set_commutes_with_round_trip() {
    let mut original = ViewedFiles::default();
    original.set("a.rs", true);
    original.set("b.rs", false);

    let mut through_serde = ViewedFiles::parse(&original.serialize());
    through_serde.set("c.rs", true);

    let mut direct = original.clone();
    direct.set("c.rs", true);

    assert_eq!(through_serde, direct);
    assert_eq!(through_serde.serialize(), direct.serialize());
}

/// Serialization is canonical regardless of insertion order.
#[test]
fn test_serialization_is_key_ordered() {
    let mut forward = ViewedFiles::default();
    forward.set("a.rs", true);
    forward.set("z.rs", true);

    let mut reverse = ViewedFiles::default();
    reverse.set("z.rs", true);
    reverse.set("a.rs", true);

    assert_eq!(forward.serialize(), reverse.serialize());
}

/// Malformed or empty stored values parse to the empty map.
#[test]
fn test_malformed_input_parses_empty() {
    assert!(ViewedFiles::parse("").is_empty());
    assert!(ViewedFiles::parse("not json").is_empty());
    assert!(ViewedFiles::parse("[1,2,3]").is_empty());
}

/// Unknown paths read as not viewed.
#[test]
fn test_unknown_path_is_unviewed() {
    let mut viewed = ViewedFiles::default();
    viewed.set("a.rs", true);

    assert!(viewed.is_viewed("a.rs"));
    assert!(!viewed.is_viewed("missing.rs"));
    assert_eq!(viewed.len(), 1);
}
