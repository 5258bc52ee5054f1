//! Process-stable hashing for property entries.
//!
//! `std`'s `DefaultHasher` is randomly keyed per process, so anything that
//! might be persisted or compared across a binding boundary goes through
//! seed-0 xxh64 here instead. The combining step matches the entry hash used
//! by the language bindings:
//!
//! ```text
//! ((h(relation) * 31) << 4) ^ ((h(key) * 31) ^ !h(value))
//! ```
//!
//! where an unset value contributes the sentinel `0`.

use hashbrown::HashSet;
use xxhash_rust::xxh64::{xxh64, Xxh64};

use super::{PropertyEntry, RelationIdentity};

const SEED: u64 = 0;

/// Sentinel hash for an unset (null) value.
pub const NULL_VALUE_HASH: u64 = 0;

pub fn stable_hash_bytes(bytes: &[u8]) -> u64 {
    xxh64(bytes, SEED)
}

/// xxh64 over the UTF-8 bytes of `s`.
pub fn stable_hash_str(s: &str) -> u64 {
    xxh64(s.as_bytes(), SEED)
}

/// xxh64 over the big-endian fields of the identity. Same value as hashing
/// its encoded `RelationKey`.
pub fn stable_hash_relation(rel: &RelationIdentity) -> u64 {
    let mut hasher = Xxh64::new(SEED);
    hasher.update(&rel.origin.0.to_be_bytes());
    hasher.update(&rel.destination.0.to_be_bytes());
    hasher.update(&rel.version.to_be_bytes());
    hasher.digest()
}

pub fn stable_hash_value(value: Option<&str>) -> u64 {
    value.map_or(NULL_VALUE_HASH, stable_hash_str)
}

/// Canonical entry hash. Equal entries always produce equal hashes.
pub fn entry_hash(relation: &RelationIdentity, key: &str, value: Option<&str>) -> u64 {
    let rel_h = stable_hash_relation(relation).wrapping_mul(31) << 4;
    let key_h = stable_hash_str(key).wrapping_mul(31);
    rel_h ^ (key_h ^ !stable_hash_value(value))
}

/// Remove duplicate entries, keeping the first occurrence of each.
pub fn dedup_entries(entries: Vec<PropertyEntry>) -> Vec<PropertyEntry> {
    let mut seen = HashSet::with_capacity(entries.len());
    entries.into_iter().filter(|e| seen.insert(e.clone())).collect()
}
