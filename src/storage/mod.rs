//! # Property Backend Trait
//!
//! This is THE contract between the query façade and any storage medium.
//! Every operation the property store needs is defined here.
//!
//! Backends receive relations already validated and encoded as
//! [`RelationKey`]s; identity checking is the façade's job.
//!
//! ## Implementations
//!
//! | Backend | Module | Description |
//! |---------|--------|-------------|
//! | `MemoryBackend` | `memory` | Sharded in-process indexes |
//! | `JournalBackend` | `journal` | Append-only JSON journal, replayed into memory |

pub mod memory;
pub mod journal;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;

use crate::codec::RelationKey;
use crate::model::{PropertyEntry, RelationIdentity};
use crate::Result;

pub use journal::JournalBackend;
pub use memory::MemoryBackend;

pub const DEFAULT_SHARDS: usize = 16;

fn default_shards() -> usize {
    DEFAULT_SHARDS
}

// ============================================================================
// Backend Configuration
// ============================================================================

/// Configuration for opening a property backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// In-memory (no persistence)
    Memory {
        #[serde(default = "default_shards")]
        shards: usize,
    },

    /// Journal file on local disk
    Journal {
        path: PathBuf,
        #[serde(default)]
        sync_on_write: bool,
        #[serde(default = "default_shards")]
        shards: usize,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Memory { shards: DEFAULT_SHARDS }
    }
}

impl BackendConfig {
    /// Parse a JSON config document, e.g. `{"kind": "journal", "path": "props.jsonl"}`.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Open the configured backend behind a trait object.
    pub fn open(&self) -> Result<Box<dyn PropertyBackend>> {
        match self {
            BackendConfig::Memory { shards } => Ok(Box::new(MemoryBackend::with_shards(*shards))),
            BackendConfig::Journal { path, sync_on_write, shards } => Ok(Box::new(
                JournalBackend::open_with(path, *sync_on_write, *shards)?,
            )),
        }
    }
}

// ============================================================================
// Backend capabilities
// ============================================================================

/// What a backend can do.
#[derive(Debug, Clone, Default)]
pub struct BackendCapabilities {
    pub durable: bool,
    pub supports_compaction: bool,
    pub shards: usize,
}

// ============================================================================
// PropertyBackend Trait
// ============================================================================

/// The storage contract for relation properties.
///
/// Writes to one `(relation, key)` record are linearizable: last writer wins.
/// Reads observe either the state before or after any single write, never a
/// partial record. There are no multi-record transactions.
#[async_trait]
pub trait PropertyBackend: Send + Sync + 'static {
    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Shut down the backend, flushing any pending writes. Every later call
    /// fails with `StoreUnavailable`.
    async fn shutdown(&self) -> Result<()>;

    // ========================================================================
    // Record CRUD
    // ========================================================================

    /// Upsert a property. `None` records an explicit null.
    async fn put(&self, rel: &RelationKey, key: &str, value: Option<String>) -> Result<()>;

    /// Look up one property. Outer `None`: never set. `Some(None)`: recorded null.
    async fn get(&self, rel: &RelationKey, key: &str) -> Result<Option<Option<String>>>;

    /// Remove one property. Returns true if it existed.
    async fn delete(&self, rel: &RelationKey, key: &str) -> Result<bool>;

    /// Remove every property of a relation. Returns how many were removed.
    async fn delete_relation(&self, rel: &RelationKey) -> Result<usize>;

    // ========================================================================
    // Scan
    // ========================================================================

    /// All properties of a relation, in insertion order.
    async fn list_by_relation(&self, rel: &RelationKey) -> Result<Vec<PropertyEntry>>;

    /// All entries with this key across relations, in first-insertion order.
    async fn list_by_key(&self, key: &str) -> Result<Vec<PropertyEntry>>;

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Total number of stored properties.
    async fn property_count(&self) -> Result<u64>;

    /// Number of relations carrying at least one property.
    async fn relation_count(&self) -> Result<u64>;

    /// All distinct property keys, sorted.
    async fn keys(&self) -> Result<Vec<String>>;

    /// All relations carrying at least one property, sorted by key order.
    async fn relations(&self) -> Result<Vec<RelationIdentity>>;

    // ========================================================================
    // Batch operations
    // ========================================================================

    /// Batch upsert.
    ///
    /// Default falls back to sequential `put` calls. Not atomic as a whole:
    /// a failure leaves the earlier records written.
    async fn put_batch(&self, records: Vec<(RelationKey, String, Option<String>)>) -> Result<()> {
        for (rel, key, value) in records {
            self.put(&rel, &key, value).await?;
        }
        Ok(())
    }

    // ========================================================================
    // Capability negotiation
    // ========================================================================

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }
}

#[async_trait]
impl PropertyBackend for Box<dyn PropertyBackend> {
    async fn shutdown(&self) -> Result<()> {
        (**self).shutdown().await
    }

    async fn put(&self, rel: &RelationKey, key: &str, value: Option<String>) -> Result<()> {
        (**self).put(rel, key, value).await
    }

    async fn get(&self, rel: &RelationKey, key: &str) -> Result<Option<Option<String>>> {
        (**self).get(rel, key).await
    }

    async fn delete(&self, rel: &RelationKey, key: &str) -> Result<bool> {
        (**self).delete(rel, key).await
    }

    async fn delete_relation(&self, rel: &RelationKey) -> Result<usize> {
        (**self).delete_relation(rel).await
    }

    async fn list_by_relation(&self, rel: &RelationKey) -> Result<Vec<PropertyEntry>> {
        (**self).list_by_relation(rel).await
    }

    async fn list_by_key(&self, key: &str) -> Result<Vec<PropertyEntry>> {
        (**self).list_by_key(key).await
    }

    async fn property_count(&self) -> Result<u64> {
        (**self).property_count().await
    }

    async fn relation_count(&self) -> Result<u64> {
        (**self).relation_count().await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        (**self).keys().await
    }

    async fn relations(&self) -> Result<Vec<RelationIdentity>> {
        (**self).relations().await
    }

    async fn put_batch(&self, records: Vec<(RelationKey, String, Option<String>)>) -> Result<()> {
        (**self).put_batch(records).await
    }

    fn capabilities(&self) -> BackendCapabilities {
        (**self).capabilities()
    }
}
