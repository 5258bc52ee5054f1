//! In-memory storage backend.
//!
//! This is the reference implementation of `PropertyBackend`, and the
//! live state behind the journal backend.
//!
//! ## Layout
//!
//! - **Primary index**: `RelationKey → [Record]`, split into shards by
//!   relation key hash. A relation's records stay in insertion order.
//! - **Secondary index**: `key → {RelationKey → seq}`, split into shards by
//!   property key hash. `seq` is the global insertion sequence of the
//!   record, so `list_by_key` can replay first-insertion order.
//!
//! ## Locking
//!
//! Writers take the primary shard write lock, then the secondary shard
//! write lock. Readers never hold a secondary lock while acquiring a
//! primary one. Writes to relations in different shards do not contend.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use parking_lot::{RwLock, RwLockReadGuard};
use smallvec::SmallVec;

use crate::codec::RelationKey;
use crate::model::hashing::{stable_hash_bytes, stable_hash_str};
use crate::model::{PropertyEntry, RelationIdentity};
use crate::{Error, Result};
use super::{BackendCapabilities, PropertyBackend, DEFAULT_SHARDS};

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone)]
struct Record {
    key: String,
    value: Option<String>,
    seq: u64,
}

type RelationRecords = SmallVec<[Record; 4]>;
type PrimaryShard = HashMap<RelationKey, RelationRecords>;
type SecondaryShard = HashMap<String, HashMap<RelationKey, u64>>;

// ============================================================================
// MemoryBackend
// ============================================================================

/// Sharded in-memory property storage.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    primary: Box<[RwLock<PrimaryShard>]>,
    secondary: Box<[RwLock<SecondaryShard>]>,
    mask: usize,
    next_seq: AtomicU64,
    property_count: AtomicU64,
    closed: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// `shards` is rounded up to a power of two (minimum 1).
    pub fn with_shards(shards: usize) -> Self {
        let n = shards.max(1).next_power_of_two();
        Self {
            inner: Arc::new(MemoryInner {
                primary: (0..n).map(|_| RwLock::new(PrimaryShard::new())).collect(),
                secondary: (0..n).map(|_| RwLock::new(SecondaryShard::new())).collect(),
                mask: n - 1,
                next_seq: AtomicU64::new(1),
                property_count: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.inner.mask + 1
    }

    fn primary_shard(&self, rel: &RelationKey) -> &RwLock<PrimaryShard> {
        &self.inner.primary[stable_hash_bytes(rel.as_bytes()) as usize & self.inner.mask]
    }

    fn secondary_shard(&self, key: &str) -> &RwLock<SecondaryShard> {
        &self.inner.secondary[stable_hash_str(key) as usize & self.inner.mask]
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::StoreUnavailable("backend is shut down".into()));
        }
        Ok(())
    }

    pub(crate) fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    // ========================================================================
    // Write paths with a commit hook
    //
    // The hook runs while the record's primary shard lock is held, before
    // the in-memory state changes. If it fails nothing is applied. The
    // journal backend appends its log record from here.
    // ========================================================================

    pub(crate) fn put_with<F>(
        &self,
        rel: &RelationKey,
        key: &str,
        value: Option<String>,
        hook: F,
    ) -> Result<()>
    where
        F: FnOnce(&Option<String>) -> Result<()>,
    {
        self.ensure_open()?;
        let mut primary = self.primary_shard(rel).write();
        hook(&value)?;

        let records = primary.entry(*rel).or_default();
        if let Some(existing) = records.iter_mut().find(|r| r.key == key) {
            existing.value = value;
            return Ok(());
        }

        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        records.push(Record { key: key.to_string(), value, seq });
        self.inner.property_count.fetch_add(1, Ordering::Relaxed);
        self.secondary_shard(key)
            .write()
            .entry(key.to_string())
            .or_default()
            .insert(*rel, seq);
        Ok(())
    }

    pub(crate) fn delete_with<F>(&self, rel: &RelationKey, key: &str, hook: F) -> Result<bool>
    where
        F: FnOnce() -> Result<()>,
    {
        self.ensure_open()?;
        let mut primary = self.primary_shard(rel).write();
        let Some(records) = primary.get_mut(rel) else {
            return Ok(false);
        };
        let Some(pos) = records.iter().position(|r| r.key == key) else {
            return Ok(false);
        };
        hook()?;

        records.remove(pos);
        if records.is_empty() {
            primary.remove(rel);
        }
        self.inner.property_count.fetch_sub(1, Ordering::Relaxed);
        self.unindex_key(rel, key);
        Ok(true)
    }

    pub(crate) fn delete_relation_with<F>(&self, rel: &RelationKey, hook: F) -> Result<usize>
    where
        F: FnOnce() -> Result<()>,
    {
        self.ensure_open()?;
        let mut primary = self.primary_shard(rel).write();
        if !primary.contains_key(rel) {
            return Ok(0);
        }
        hook()?;

        let records = primary.remove(rel).unwrap_or_default();
        for record in &records {
            self.unindex_key(rel, &record.key);
        }
        self.inner.property_count.fetch_sub(records.len() as u64, Ordering::Relaxed);
        Ok(records.len())
    }

    /// Caller must hold the primary shard write lock for `rel`.
    fn unindex_key(&self, rel: &RelationKey, key: &str) {
        let mut secondary = self.secondary_shard(key).write();
        if let Some(postings) = secondary.get_mut(key) {
            postings.remove(rel);
            if postings.is_empty() {
                secondary.remove(key);
            }
        }
    }

    /// Read-lock every primary shard, in shard order, and hand back a view
    /// of all records. Writers block until the view is dropped.
    pub(crate) fn freeze(&self) -> Frozen<'_> {
        Frozen {
            guards: self.inner.primary.iter().map(|s| s.read()).collect(),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Consistent view over the whole primary index.
pub(crate) struct Frozen<'a> {
    guards: Vec<RwLockReadGuard<'a, PrimaryShard>>,
}

impl Frozen<'_> {
    /// Every record, in global insertion order.
    pub(crate) fn records(&self) -> Vec<(RelationKey, &str, Option<&str>)> {
        let mut all: Vec<(u64, RelationKey, &str, Option<&str>)> = self
            .guards
            .iter()
            .flat_map(|shard| shard.iter())
            .flat_map(|(rel, records)| {
                records.iter().map(move |r| (r.seq, *rel, r.key.as_str(), r.value.as_deref()))
            })
            .collect();
        all.sort_by_key(|(seq, ..)| *seq);
        all.into_iter().map(|(_, rel, key, value)| (rel, key, value)).collect()
    }
}

// ============================================================================
// PropertyBackend impl
// ============================================================================

#[async_trait]
impl PropertyBackend for MemoryBackend {
    async fn shutdown(&self) -> Result<()> {
        self.close();
        Ok(())
    }

    async fn put(&self, rel: &RelationKey, key: &str, value: Option<String>) -> Result<()> {
        self.put_with(rel, key, value, |_| Ok(()))
    }

    async fn get(&self, rel: &RelationKey, key: &str) -> Result<Option<Option<String>>> {
        self.ensure_open()?;
        let primary = self.primary_shard(rel).read();
        Ok(primary
            .get(rel)
            .and_then(|records| records.iter().find(|r| r.key == key))
            .map(|r| r.value.clone()))
    }

    async fn delete(&self, rel: &RelationKey, key: &str) -> Result<bool> {
        self.delete_with(rel, key, || Ok(()))
    }

    async fn delete_relation(&self, rel: &RelationKey) -> Result<usize> {
        self.delete_relation_with(rel, || Ok(()))
    }

    async fn list_by_relation(&self, rel: &RelationKey) -> Result<Vec<PropertyEntry>> {
        self.ensure_open()?;
        let identity = rel.identity();
        let primary = self.primary_shard(rel).read();
        Ok(primary
            .get(rel)
            .map(|records| {
                records
                    .iter()
                    .map(|r| PropertyEntry::from_parts(identity, r.key.clone(), r.value.clone()))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default())
    }

    async fn list_by_key(&self, key: &str) -> Result<Vec<PropertyEntry>> {
        self.ensure_open()?;
        let mut rels: Vec<(u64, RelationKey)> = {
            let secondary = self.secondary_shard(key).read();
            secondary
                .get(key)
                .map(|postings| postings.iter().map(|(rel, seq)| (*seq, *rel)).collect())
                .unwrap_or_default()
        };
        rels.sort_unstable();

        // Records may be deleted between the two lookups; skip those.
        let mut result = Vec::with_capacity(rels.len());
        for (_, rel) in rels {
            let primary = self.primary_shard(&rel).read();
            if let Some(record) = primary.get(&rel).and_then(|rs| rs.iter().find(|r| r.key == key)) {
                result.push(PropertyEntry::from_parts(rel.identity(), record.key.clone(), record.value.clone()));
            }
        }
        Ok(result)
    }

    async fn property_count(&self) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.inner.property_count.load(Ordering::Relaxed))
    }

    async fn relation_count(&self) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.inner.primary.iter().map(|s| s.read().len() as u64).sum())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        let mut keys: Vec<String> = self
            .inner
            .secondary
            .iter()
            .flat_map(|s| s.read().keys().cloned().collect::<Vec<_>>())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn relations(&self) -> Result<Vec<RelationIdentity>> {
        self.ensure_open()?;
        let mut rels: Vec<RelationKey> = self
            .inner
            .primary
            .iter()
            .flat_map(|s| s.read().keys().copied().collect::<Vec<_>>())
            .collect();
        rels.sort();
        Ok(rels.iter().map(RelationKey::identity).collect())
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            durable: false,
            supports_compaction: false,
            shards: self.shard_count(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;

    fn rk(o: u64, d: u64, v: i64) -> RelationKey {
        encode(&RelationIdentity::from_raw(o, d, v)).unwrap()
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let db = MemoryBackend::new();
        let r = rk(1, 2, 0);

        db.put(&r, "env", Some("prod".into())).await.unwrap();
        assert_eq!(db.get(&r, "env").await.unwrap(), Some(Some("prod".into())));
        assert_eq!(db.get(&r, "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_null_is_distinct_from_absent() {
        let db = MemoryBackend::new();
        let r = rk(1, 2, 0);

        db.put(&r, "note", None).await.unwrap();
        assert_eq!(db.get(&r, "note").await.unwrap(), Some(None));
        assert_eq!(db.property_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_keeps_position() {
        let db = MemoryBackend::new();
        let r = rk(1, 2, 0);

        db.put(&r, "a", Some("1".into())).await.unwrap();
        db.put(&r, "b", Some("2".into())).await.unwrap();
        db.put(&r, "a", Some("3".into())).await.unwrap();

        let entries = db.list_by_relation(&r).await.unwrap();
        let keys: Vec<&str> = entries.iter().map(|e| e.key()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(entries[0].value(), Some("3"));
        assert_eq!(db.property_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_list_by_key_first_insertion_order() {
        let db = MemoryBackend::with_shards(4);
        let (r1, r2, r3) = (rk(1, 2, 0), rk(3, 4, 0), rk(5, 6, 0));

        db.put(&r2, "env", Some("dev".into())).await.unwrap();
        db.put(&r1, "env", Some("prod".into())).await.unwrap();
        db.put(&r3, "other", Some("x".into())).await.unwrap();
        db.put(&r2, "env", Some("prod".into())).await.unwrap();

        let entries = db.list_by_key("env").await.unwrap();
        let rels: Vec<RelationIdentity> = entries.iter().map(|e| *e.relation()).collect();
        assert_eq!(rels, vec![r2.identity(), r1.identity()]);
        assert!(entries.iter().all(|e| e.value() == Some("prod")));
    }

    #[tokio::test]
    async fn test_delete() {
        let db = MemoryBackend::new();
        let r = rk(1, 2, 0);

        assert!(!db.delete(&r, "env").await.unwrap());
        db.put(&r, "env", Some("prod".into())).await.unwrap();
        assert!(db.delete(&r, "env").await.unwrap());
        assert!(!db.delete(&r, "env").await.unwrap());

        assert!(db.list_by_key("env").await.unwrap().is_empty());
        assert_eq!(db.relation_count().await.unwrap(), 0);
        assert!(db.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_relation_cascades() {
        let db = MemoryBackend::new();
        let (r1, r2) = (rk(1, 2, 0), rk(1, 2, 1));

        db.put(&r1, "a", Some("1".into())).await.unwrap();
        db.put(&r1, "b", None).await.unwrap();
        db.put(&r2, "a", Some("1".into())).await.unwrap();

        assert_eq!(db.delete_relation(&r1).await.unwrap(), 2);
        assert_eq!(db.delete_relation(&r1).await.unwrap(), 0);
        assert_eq!(db.property_count().await.unwrap(), 1);
        assert_eq!(db.keys().await.unwrap(), vec!["a".to_string()]);
        assert_eq!(db.relations().await.unwrap(), vec![r2.identity()]);
    }

    #[tokio::test]
    async fn test_shutdown_makes_store_unavailable() {
        let db = MemoryBackend::new();
        let r = rk(1, 2, 0);
        db.shutdown().await.unwrap();

        assert!(matches!(db.put(&r, "k", None).await, Err(Error::StoreUnavailable(_))));
        assert!(matches!(db.get(&r, "k").await, Err(Error::StoreUnavailable(_))));
        assert!(matches!(db.delete(&r, "k").await, Err(Error::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_failing_hook_applies_nothing() {
        let db = MemoryBackend::new();
        let r = rk(1, 2, 0);

        let res = db.put_with(&r, "k", Some("v".into()), |_| {
            Err(Error::StoreUnavailable("disk gone".into()))
        });
        assert!(res.is_err());
        assert_eq!(db.get(&r, "k").await.unwrap(), None);
        assert_eq!(db.property_count().await.unwrap(), 0);
    }

    #[test]
    fn test_shards_round_up() {
        assert_eq!(MemoryBackend::with_shards(0).shard_count(), 1);
        assert_eq!(MemoryBackend::with_shards(5).shard_count(), 8);
    }

    #[tokio::test]
    async fn test_frozen_records_in_insertion_order() {
        let db = MemoryBackend::with_shards(8);
        let (r1, r2) = (rk(9, 8, 0), rk(1, 2, 0));
        db.put(&r1, "x", Some("1".into())).await.unwrap();
        db.put(&r2, "y", None).await.unwrap();
        db.put(&r1, "z", Some("2".into())).await.unwrap();

        let frozen = db.freeze();
        let keys: Vec<&str> = frozen.records().iter().map(|(_, k, _)| *k).collect();
        assert_eq!(keys, vec!["x", "y", "z"]);
    }
}
