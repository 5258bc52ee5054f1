//! # Identity Codec
//!
//! `RelationIdentity` → `RelationKey`: a fixed 24-byte big-endian key laid
//! out as `origin | destination | version`. Byte order sorts the same way
//! the `(origin, destination, version)` tuple does, so backends can use the
//! raw bytes for ordered indexes.
//!
//! Validation lives here too. Every façade call runs it before touching
//! storage.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::{ObjectId, RelationIdentity};
use crate::{Error, Result};

pub const KEY_LEN: usize = 24;

/// Comparable, hashable encoding of a relation identity.
///
/// Serializes as its lowercase hex form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct RelationKey([u8; KEY_LEN]);

impl RelationKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Decode back into the identity this key was built from.
    pub fn identity(&self) -> RelationIdentity {
        let (origin, rest) = self.0.split_at(8);
        let (destination, version) = rest.split_at(8);
        RelationIdentity::new(
            ObjectId(u64::from_be_bytes(word(origin))),
            ObjectId(u64::from_be_bytes(word(destination))),
            i64::from_be_bytes(word(version)),
        )
    }
}

fn word(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(bytes);
    out
}

/// Check that an identity can name a stored relation.
pub fn validate(rel: &RelationIdentity) -> Result<()> {
    if rel.origin.is_none() {
        return Err(Error::MalformedIdentity(format!("{rel}: origin is the none object")));
    }
    if rel.destination.is_none() {
        return Err(Error::MalformedIdentity(format!("{rel}: destination is the none object")));
    }
    if rel.version < 0 {
        return Err(Error::MalformedIdentity(format!("{rel}: negative version {}", rel.version)));
    }
    Ok(())
}

/// Validate and encode.
pub fn encode(rel: &RelationIdentity) -> Result<RelationKey> {
    validate(rel)?;
    let mut out = [0u8; KEY_LEN];
    out[..8].copy_from_slice(&rel.origin.0.to_be_bytes());
    out[8..16].copy_from_slice(&rel.destination.0.to_be_bytes());
    out[16..].copy_from_slice(&rel.version.to_be_bytes());
    Ok(RelationKey(out))
}

/// Inverse of [`encode`]. Rejects wrong lengths and keys that decode to an
/// invalid identity.
pub fn decode(bytes: &[u8]) -> Result<RelationIdentity> {
    let raw: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
        Error::MalformedIdentity(format!("relation key must be {KEY_LEN} bytes, got {}", bytes.len()))
    })?;
    let rel = RelationKey(raw).identity();
    validate(&rel)?;
    Ok(rel)
}

impl fmt::Display for RelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for RelationKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut out = [0u8; KEY_LEN];
        hex::decode_to_slice(s, &mut out)
            .map_err(|e| Error::MalformedIdentity(format!("bad relation key `{s}`: {e}")))?;
        let rel = RelationKey(out).identity();
        validate(&rel)?;
        Ok(RelationKey(out))
    }
}

impl From<RelationKey> for String {
    fn from(key: RelationKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for RelationKey {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}
