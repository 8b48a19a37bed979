//! Canonical serialization for deterministic hashing.
//!
//! Thunks are content addressed: the hash of a thunk is derived from its
//! canonical JSON bytes, so two structurally identical thunks always share a
//! hash and any edit to a dependency map produces a new one.
//!
//! ## Determinism Guarantees
//!
//! - Stable field order: Struct fields serialize in declaration order
//! - Stable map order: dependency maps are `BTreeMap`, never `HashMap`
//! - Object hashes carry a one-byte type prefix (`T` thunk, `V` value)

use serde::Serialize;
use sha2::{Digest, Sha256};
use xxhash_rust::xxh64::xxh64;

use crate::types::ObjectType;

/// Serialize a value to canonical JSON bytes for hashing.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(value)
}

/// Compute the xxh64 fingerprint of a serializable value.
///
/// Used for configuration and stats fingerprints, never for object identity.
pub fn canonical_hash<T: Serialize>(value: &T) -> Result<u64, serde_json::Error> {
    let bytes = to_canonical_bytes(value)?;
    Ok(xxh64(&bytes, 0))
}

/// Compute the xxh64 fingerprint and return it as hex.
pub fn canonical_hash_hex<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(format!("{:016x}", canonical_hash(value)?))
}

/// Compute the content hash of raw object bytes.
///
/// The result is the type prefix followed by the hex SHA-256 digest and the
/// byte length, e.g. `T3a7b…0f00000042`.
pub fn object_hash(kind: ObjectType, bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{}{}{:08x}", kind.prefix(), hex::encode(digest), bytes.len())
}
