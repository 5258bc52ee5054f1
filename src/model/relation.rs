//! Relation identity — the versioned edge a property hangs off.

use serde::{Deserialize, Serialize};

/// Opaque provenance object identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl ObjectId {
    /// The "no object" id. Never a valid relation endpoint.
    pub const NONE: ObjectId = ObjectId(0);

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Names a provenance relation at a point in time.
///
/// A plain value type: two identities are the same relation iff all three
/// fields match. Allocation and versioning belong to the identity system;
/// this crate only carries the triple around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationIdentity {
    pub origin: ObjectId,
    pub destination: ObjectId,
    pub version: i64,
}

impl RelationIdentity {
    pub fn new(origin: ObjectId, destination: ObjectId, version: i64) -> Self {
        Self { origin, destination, version }
    }

    /// Shorthand for raw ids, mostly useful in tests and bindings.
    pub fn from_raw(origin: u64, destination: u64, version: i64) -> Self {
        Self::new(ObjectId(origin), ObjectId(destination), version)
    }

    /// The same relation pair at another version.
    pub fn at_version(&self, version: i64) -> Self {
        Self { version, ..*self }
    }
}

impl std::fmt::Display for RelationIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{}@{}", self.origin, self.destination, self.version)
    }
}
