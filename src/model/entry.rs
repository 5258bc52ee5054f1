//! PropertyEntry — one (relation, key, value) fact.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use super::hashing;
use super::RelationIdentity;

/// A single property on a relation.
///
/// `value` is `None` when the property was recorded as null: present, but
/// unset. That is distinct from the property never having been set, which
/// the store reports as an absent entry.
///
/// Entries are produced by the store, either as the projection of a write or
/// of a stored record. Callers only ever read them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyEntry {
    relation: RelationIdentity,
    key: String,
    value: Option<String>,
}

impl PropertyEntry {
    #[cfg(test)]
    pub(crate) fn new(relation: RelationIdentity, key: impl Into<String>, value: Option<&str>) -> Self {
        Self::from_parts(relation, key.into(), value.map(str::to_owned))
    }

    pub(crate) fn from_parts(relation: RelationIdentity, key: String, value: Option<String>) -> Self {
        Self { relation, key, value }
    }

    pub fn relation(&self) -> &RelationIdentity {
        &self.relation
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn into_parts(self) -> (RelationIdentity, String, Option<String>) {
        (self.relation, self.key, self.value)
    }

    /// Process-stable hash, see [`hashing::entry_hash`].
    pub fn stable_hash(&self) -> u64 {
        hashing::entry_hash(&self.relation, &self.key, self.value())
    }

    /// Diagnostic form: `"<relation>-<key> = <value>"`, or just
    /// `"<key> = <value>"` without the relation. Unset values print as `null`.
    pub fn render(&self, include_relation: bool) -> String {
        let value = self.value().unwrap_or("null");
        if include_relation {
            format!("{}-{} = {}", self.relation, self.key, value)
        } else {
            format!("{} = {}", self.key, value)
        }
    }
}

impl Hash for PropertyEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.stable_hash());
    }
}

impl fmt::Display for PropertyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(true))
    }
}
