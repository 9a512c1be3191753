//! Deterministic identifiers for legacy keys.
//!
//! The event-scoped schema keys rows by UUID columns, while older clients
//! keyed some entities by human-readable slugs. [`ensure_identifier`] bridges
//! the two by hashing the slug into a UUID-shaped value that is identical on
//! every device and every run, so repeated references to the same legacy key
//! always land on the same row.

use uuid::{Builder, Uuid, Variant, Version};

/// A UUID-shaped identifier in canonical hyphenated form.
pub type Identifier = String;

/// Seeds of the four FNV-1a lanes that make up the 128 identifier bits.
const LANE_SEEDS: [u32; 4] = [0x811c_9dc5, 0x9e37_79b1, 0x85eb_ca6b, 0xc2b2_ae35];

const FNV_PRIME: u32 = 16_777_619;

/// Length of the canonical hyphenated form.
const HYPHENATED_LEN: usize = 36;

/// FNV-1a over UTF-16 code units, matching identifiers minted by web clients.
fn fnv1a32(input: &str, seed: u32) -> u32 {
    input
        .encode_utf16()
        .fold(seed, |hash, unit| (hash ^ u32::from(unit)).wrapping_mul(FNV_PRIME))
}

/// Structural check: canonical hyphenated form, version 1-5, RFC 4122 variant.
///
/// Says nothing about whether a row with this id exists.
pub fn is_identifier(value: &str) -> bool {
    if value.len() != HYPHENATED_LEN {
        return false;
    }

    match Uuid::try_parse(value) {
        Ok(uuid) => {
            matches!(uuid.get_version_num(), 1..=5) && uuid.get_variant() == Variant::RFC4122
        }
        Err(_) => false,
    }
}

/// Derive a stable identifier from an arbitrary non-empty seed.
///
/// # Panics
///
/// Panics when `seed` is empty; an empty seed is a caller bug, not a runtime
/// condition.
pub fn stable_identifier_from(seed: &str) -> Identifier {
    assert!(!seed.is_empty(), "stable identifier seed must not be empty");

    let mut bytes = [0u8; 16];
    for (lane, lane_seed) in LANE_SEEDS.iter().enumerate() {
        let start = lane * 4;
        bytes[start..start + 4].copy_from_slice(&fnv1a32(seed, *lane_seed).to_be_bytes());
    }

    // Only the shape bits are forced; the value is a hash, not a SHA-1 name UUID.
    Builder::from_bytes(bytes)
        .with_variant(Variant::RFC4122)
        .with_version(Version::Sha1)
        .into_uuid()
        .to_string()
}

/// Return `value` untouched when it is already an identifier, otherwise the
/// stable identifier of `namespace:value`.
pub fn ensure_identifier(value: &str, namespace: &str) -> Identifier {
    if is_identifier(value) {
        return value.to_string();
    }
    stable_identifier_from(&format!("{}:{}", namespace, value))
}

/// Identifier for a record created on this device. A non-blank seed gives a
/// reproducible id; otherwise a random v4 id is generated.
pub fn create_client_identifier(seed: Option<&str>) -> Identifier {
    match seed {
        Some(seed) if !seed.trim().is_empty() => stable_identifier_from(seed),
        _ => Uuid::new_v4().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_identifier_is_deterministic() {
        let first = stable_identifier_from("player:alpha");
        let second = stable_identifier_from("player:alpha");

        assert_eq!(first, second);
        assert!(is_identifier(&first));
    }

    #[test]
    fn test_stable_identifier_matches_existing_clients() {
        assert_eq!(
            stable_identifier_from("player:alpha"),
            "06729fd6-4169-5caa-b934-eb747857cb26"
        );
        assert_eq!(
            stable_identifier_from("note:x"),
            "bbf901c7-1b97-5943-a042-0561de6fe097"
        );
        // Non-BMP characters hash as surrogate pairs.
        assert_eq!(
            stable_identifier_from("station:é😀"),
            "9b87dc73-eb96-506f-a0ac-788daedca2e3"
        );
    }

    #[test]
    fn test_distinct_seeds_give_distinct_identifiers() {
        let seeds: Vec<String> = (0..500).map(|i| format!("deliverable:{}", i)).collect();
        let mut ids: Vec<String> = seeds.iter().map(|s| stable_identifier_from(s)).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), seeds.len());
    }

    #[test]
    #[should_panic(expected = "must not be empty")]
    fn test_empty_seed_panics() {
        stable_identifier_from("");
    }

    #[test]
    fn test_is_identifier_shape() {
        assert!(is_identifier("f5d3d7fc-3a6f-4d95-b3dc-8f4307775a12"));
        assert!(is_identifier("F5D3D7FC-3A6F-4D95-B3DC-8F4307775A12"));
        // simple form, nil, bad variant, bad version
        assert!(!is_identifier("f5d3d7fc3a6f4d95b3dc8f4307775a12"));
        assert!(!is_identifier("00000000-0000-0000-0000-000000000000"));
        assert!(!is_identifier("f5d3d7fc-3a6f-4d95-73dc-8f4307775a12"));
        assert!(!is_identifier("f5d3d7fc-3a6f-7d95-b3dc-8f4307775a12"));
        assert!(!is_identifier("legacy-deliverable-id"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn test_ensure_identifier_preserves_valid_input() {
        let input = "f5d3d7fc-3a6f-4d95-b3dc-8f4307775a12";
        assert_eq!(ensure_identifier(input, "note"), input);
    }

    #[test]
    fn test_ensure_identifier_maps_legacy_keys() {
        let first = ensure_identifier("legacy-deliverable-id", "deliverable");
        let second = ensure_identifier("legacy-deliverable-id", "deliverable");

        assert_eq!(first, second);
        assert!(is_identifier(&first));
        assert_eq!(first, "4be87f9b-7123-545f-9de1-1509e83e402b");
        assert_ne!(first, ensure_identifier("legacy-deliverable-id", "note"));
    }

    #[test]
    fn test_ensure_identifier_is_idempotent() {
        let mapped = ensure_identifier("tunnel-walk-3", "clip");
        assert_eq!(ensure_identifier(&mapped, "clip"), mapped);
        assert_eq!(ensure_identifier(&mapped, "other"), mapped);
    }

    #[test]
    fn test_create_client_identifier() {
        assert_eq!(
            create_client_identifier(Some("deliverable:seed")),
            create_client_identifier(Some("deliverable:seed"))
        );

        let random = create_client_identifier(Some("   "));
        assert!(is_identifier(&random));
        assert_ne!(random, create_client_identifier(None));
    }
}
