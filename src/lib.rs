//! # prov-props — Property Store for Provenance Relations
//!
//! Attaches key/value metadata to versioned provenance relations (edges
//! between objects in a lineage graph) and answers lookups both ways:
//! "what is tagged on this relation" and "which relations carry this tag".
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `PropertyBackend` is the contract between the façade and storage
//! 2. **Value identities**: `RelationIdentity` is compared by value, never by reference
//! 3. **Null is a value**: a property set to null is present; an unset property is absent
//! 4. **Stateless façade**: the backend is the single source of truth, nothing is cached here
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use prov_props::{PropertyStore, RelationIdentity};
//!
//! # async fn example() -> prov_props::Result<()> {
//! let store = PropertyStore::open_memory().await?;
//! let rel = RelationIdentity::from_raw(17, 42, 0);
//!
//! store.set_property(&rel, "env", Some("prod")).await?;
//! assert_eq!(store.get_property(&rel, "env").await?, Some(Some("prod".into())));
//!
//! for entry in store.list_properties(&rel).await? {
//!     println!("{}", entry.render(false));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Storage Backends
//!
//! | Backend | Constructor | Description |
//! |---------|-------------|-------------|
//! | Memory | `open_memory` | Sharded in-process indexes |
//! | Journal | `open_journal` | Append-only JSON journal on disk |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod codec;
pub mod storage;
pub mod export;

// ============================================================================
// Re-exports: Model
// ============================================================================

pub use model::{ObjectId, PropertyEntry, RelationIdentity};
pub use codec::RelationKey;

// ============================================================================
// Re-exports: Storage
// ============================================================================

pub use storage::{
    PropertyBackend, BackendConfig, BackendCapabilities,
    MemoryBackend, JournalBackend,
};

use std::path::Path;

use tracing::debug;

// ============================================================================
// Top-level store handle
// ============================================================================

/// The primary entry point. A `PropertyStore` wraps a backend and validates
/// every request before it reaches storage.
pub struct PropertyStore<B: PropertyBackend> {
    backend: B,
}

/// Counts reported by [`PropertyStore::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    pub properties: u64,
    pub relations: u64,
    pub keys: u64,
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidArgument("property key must not be empty".into()));
    }
    Ok(())
}

impl<B: PropertyBackend> PropertyStore<B> {
    /// Create a store over the given backend.
    pub fn with_backend(backend: B) -> Self {
        Self { backend }
    }

    /// Set a property (upsert). `None` records the property as null.
    pub async fn set_property(
        &self,
        relation: &RelationIdentity,
        key: &str,
        value: Option<&str>,
    ) -> Result<()> {
        let rel = codec::encode(relation)?;
        check_key(key)?;
        debug!(relation = %relation, key, null = value.is_none(), "store.set_property");
        self.backend.put(&rel, key, value.map(str::to_owned)).await
    }

    /// Look up a property. `None`: never set. `Some(None)`: set to null.
    pub async fn get_property(
        &self,
        relation: &RelationIdentity,
        key: &str,
    ) -> Result<Option<Option<String>>> {
        let rel = codec::encode(relation)?;
        check_key(key)?;
        self.backend.get(&rel, key).await
    }

    /// All properties of a relation, in insertion order.
    pub async fn list_properties(&self, relation: &RelationIdentity) -> Result<Vec<PropertyEntry>> {
        let rel = codec::encode(relation)?;
        self.backend.list_by_relation(&rel).await
    }

    /// Either every property of the relation, or only `key`.
    pub async fn get_properties(
        &self,
        relation: &RelationIdentity,
        key: Option<&str>,
    ) -> Result<Vec<PropertyEntry>> {
        let rel = codec::encode(relation)?;
        match key {
            None => self.backend.list_by_relation(&rel).await,
            Some(key) => {
                check_key(key)?;
                Ok(self
                    .backend
                    .get(&rel, key)
                    .await?
                    .map(|value| PropertyEntry::from_parts(*relation, key.to_string(), value))
                    .into_iter()
                    .collect())
            }
        }
    }

    /// Relations whose `key` property currently equals `value`, in
    /// first-insertion order. `None` matches properties set to null.
    pub async fn find_relations_by_property(
        &self,
        key: &str,
        value: Option<&str>,
    ) -> Result<Vec<RelationIdentity>> {
        check_key(key)?;
        let matching: Vec<PropertyEntry> = self
            .backend
            .list_by_key(key)
            .await?
            .into_iter()
            .filter(|e| e.value() == value)
            .collect();
        // Key and value are fixed here, so equal entries means equal relations.
        Ok(model::hashing::dedup_entries(matching)
            .into_iter()
            .map(|e| *e.relation())
            .collect())
    }

    /// Every entry with `key`, across relations.
    pub async fn find_entries_by_key(&self, key: &str) -> Result<Vec<PropertyEntry>> {
        check_key(key)?;
        self.backend.list_by_key(key).await
    }

    /// Remove one property. Returns true if it existed.
    pub async fn remove_property(&self, relation: &RelationIdentity, key: &str) -> Result<bool> {
        let rel = codec::encode(relation)?;
        check_key(key)?;
        debug!(relation = %relation, key, "store.remove_property");
        self.backend.delete(&rel, key).await
    }

    /// Remove every property of a relation (cascade on relation delete).
    pub async fn remove_relation(&self, relation: &RelationIdentity) -> Result<usize> {
        let rel = codec::encode(relation)?;
        let removed = self.backend.delete_relation(&rel).await?;
        debug!(relation = %relation, removed, "store.remove_relation");
        Ok(removed)
    }

    /// Batch upsert. Every record is validated before anything is written.
    pub async fn set_properties<I, K>(&self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = (RelationIdentity, K, Option<String>)>,
        K: Into<String>,
    {
        let mut batch = Vec::new();
        for (relation, key, value) in records {
            let rel = codec::encode(&relation)?;
            let key = key.into();
            check_key(&key)?;
            batch.push((rel, key, value));
        }
        debug!(records = batch.len(), "store.set_properties");
        self.backend.put_batch(batch).await
    }

    /// Property, relation and key counts.
    pub async fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            properties: self.backend.property_count().await?,
            relations: self.backend.relation_count().await?,
            keys: self.backend.keys().await?.len() as u64,
        })
    }

    /// Flush and close the backend.
    pub async fn shutdown(&self) -> Result<()> {
        self.backend.shutdown().await
    }

    /// Access the underlying backend (for advanced use).
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

/// In-memory store for testing and embedding.
impl PropertyStore<MemoryBackend> {
    pub async fn open_memory() -> Result<Self> {
        Ok(Self::with_backend(MemoryBackend::new()))
    }
}

/// Durable store on a local journal file.
impl PropertyStore<JournalBackend> {
    pub async fn open_journal(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::with_backend(JournalBackend::open(path)?))
    }
}

/// Store over whichever backend the config names.
impl PropertyStore<Box<dyn PropertyBackend>> {
    pub async fn open(config: &BackendConfig) -> Result<Self> {
        Ok(Self::with_backend(config.open()?))
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Malformed relation identity: {0}")]
    MalformedIdentity(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Corrupt journal: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Error {
    /// Only an unreachable backing medium is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
