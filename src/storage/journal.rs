//! Journal storage backend — durable properties on local disk.
//!
//! Every mutation is appended to a line-framed journal before it is applied
//! to an embedded [`MemoryBackend`]. On open the journal is replayed to
//! rebuild the indexes.
//!
//! ```text
//! put / delete → shard lock → append journal line → apply in memory
//!              → release shard lock → group fsync (sync_on_write)
//! open         → read journal → check + replay into memory → reopen for append
//! compact      → freeze memory → rewrite journal as puts → rename
//! ```
//!
//! Each line is `<crc32 hex> <json record>`, the checksum taken over the JSON
//! bytes. A bad checksum on the final unterminated line is a torn write;
//! anywhere else it is corruption.
//!
//! The append happens under the record's shard lock, so for any single
//! `(relation, key)` the journal order is the apply order and replay
//! reproduces the last writer. Appends from all shards share the file
//! mutex, which is held for one unbuffered `write` only. The fsync runs
//! after every lock is released and covers every line written before it
//! started, so concurrent writers share one sync.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codec::RelationKey;
use crate::model::{PropertyEntry, RelationIdentity};
use crate::{Error, Result};
use super::{BackendCapabilities, MemoryBackend, PropertyBackend, DEFAULT_SHARDS};

// ============================================================================
// Journal records
// ============================================================================

/// One line of the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub(crate) enum JournalRecord {
    Put { rel: RelationKey, key: String, value: Option<String> },
    Delete { rel: RelationKey, key: String },
    DropRelation { rel: RelationKey },
}

impl JournalRecord {
    fn apply(self, memory: &MemoryBackend) -> Result<()> {
        match self {
            JournalRecord::Put { rel, key, value } => memory.put_with(&rel, &key, value, |_| Ok(())),
            JournalRecord::Delete { rel, key } => memory.delete_with(&rel, &key, || Ok(())).map(|_| ()),
            JournalRecord::DropRelation { rel } => memory.delete_relation_with(&rel, || Ok(())).map(|_| ()),
        }
    }
}

/// Frame a record as one checksummed journal line, newline included.
fn encode_line(record: &JournalRecord) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(record)?;
    let mut line = hex::encode(crc32fast::hash(&body).to_be_bytes()).into_bytes();
    line.push(b' ');
    line.extend_from_slice(&body);
    line.push(b'\n');
    Ok(line)
}

/// Inverse of [`encode_line`], given the line without its newline.
fn decode_line(line: &[u8]) -> std::result::Result<JournalRecord, String> {
    let split = line.iter().position(|b| *b == b' ').ok_or("missing checksum")?;
    let (crc, body) = (&line[..split], &line[split + 1..]);
    let mut stored = [0u8; 4];
    hex::decode_to_slice(crc, &mut stored).map_err(|e| format!("bad checksum field: {e}"))?;
    let stored = u32::from_be_bytes(stored);
    let actual = crc32fast::hash(body);
    if stored != actual {
        return Err(format!("checksum mismatch: stored {stored:08x}, computed {actual:08x}"));
    }
    serde_json::from_slice(body).map_err(|e| e.to_string())
}

fn unavailable(path: &Path, err: io::Error) -> Error {
    warn!(path = %path.display(), error = %err, "journal.io_failed");
    Error::StoreUnavailable(format!("journal {}: {err}", path.display()))
}

// ============================================================================
// JournalBackend
// ============================================================================

struct JournalFile {
    file: File,
    /// Length of the file up to the end of the last complete record.
    len: u64,
}

struct SyncState {
    file: File,
    /// Every byte below this offset is known to be on stable storage.
    synced: u64,
}

/// Durable property storage backed by an append-only journal file.
///
/// A write that fails is never left in the file: the partial line is cut
/// off again. If that cut, or an fsync, fails too, the journal is marked
/// failed and every later write returns `StoreUnavailable` until the file
/// is reopened.
pub struct JournalBackend {
    memory: MemoryBackend,
    /// `None` once the backend is shut down.
    writer: Mutex<Option<JournalFile>>,
    sync: Mutex<SyncState>,
    /// Journal length after the newest append.
    written: AtomicU64,
    failed: AtomicBool,
    path: PathBuf,
    sync_on_write: bool,
}

impl JournalBackend {
    /// Open (or create) the journal at `path` with default settings.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, false, DEFAULT_SHARDS)
    }

    pub fn open_with(path: impl AsRef<Path>, sync_on_write: bool, shards: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let memory = MemoryBackend::with_shards(shards);
        let replayed = replay(&path, &memory)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| unavailable(&path, e))?;
        let len = file.metadata().map_err(|e| unavailable(&path, e))?.len();
        let sync_file = file.try_clone().map_err(|e| unavailable(&path, e))?;

        info!(
            path = %path.display(),
            records = replayed,
            bytes = len,
            sync_on_write,
            shards = memory.shard_count(),
            "journal.open"
        );

        Ok(Self {
            memory,
            writer: Mutex::new(Some(JournalFile { file, len })),
            sync: Mutex::new(SyncState { file: sync_file, synced: len }),
            written: AtomicU64::new(len),
            failed: AtomicBool::new(false),
            path,
            sync_on_write,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_failed(&self) -> Result<()> {
        if self.failed.load(Ordering::Acquire) {
            return Err(Error::StoreUnavailable(format!(
                "journal {} failed, reopen to recover",
                self.path.display()
            )));
        }
        Ok(())
    }

    fn mark_failed(&self, err: &io::Error) {
        self.failed.store(true, Ordering::Release);
        warn!(path = %self.path.display(), error = %err, "journal.failed");
    }

    /// Append one record. Returns the journal length just past it.
    fn append(&self, record: &JournalRecord) -> Result<u64> {
        let line = encode_line(record)?;

        let mut guard = self.writer.lock();
        let journal = guard
            .as_mut()
            .ok_or_else(|| Error::StoreUnavailable("journal is shut down".into()))?;
        self.check_failed()?;

        if let Err(e) = journal.file.write_all(&line) {
            // Whatever part of the line reached the file must not replay.
            if let Err(cut) = journal.file.set_len(journal.len) {
                self.mark_failed(&cut);
            }
            return Err(unavailable(&self.path, e));
        }
        journal.len += line.len() as u64;
        self.written.store(journal.len, Ordering::Release);
        Ok(journal.len)
    }

    /// Make every byte below `end` durable. No-op unless `sync_on_write`.
    ///
    /// Called with no shard lock held. Writers queue on the sync mutex; one
    /// fsync covers everything appended before it began, so the writers
    /// behind it usually find their line already synced.
    fn sync_through(&self, end: u64) -> Result<()> {
        if !self.sync_on_write {
            return Ok(());
        }
        let mut sync = self.sync.lock();
        if sync.synced >= end {
            return Ok(());
        }
        let target = self.written.load(Ordering::Acquire);
        if let Err(e) = sync.file.sync_data() {
            self.mark_failed(&e);
            return Err(unavailable(&self.path, e));
        }
        sync.synced = sync.synced.max(target);
        Ok(())
    }

    /// Rewrite the journal so it holds one `put` per live property.
    ///
    /// Writers are blocked for the duration. Returns the number of records
    /// written.
    pub fn compact(&self) -> Result<usize> {
        let frozen = self.memory.freeze();
        let mut guard = self.writer.lock();
        let journal = guard
            .as_mut()
            .ok_or_else(|| Error::StoreUnavailable("journal is shut down".into()))?;
        self.check_failed()?;

        let records = frozen.records();
        let tmp = self.path.with_extension("compact");
        let len = {
            let file = File::create(&tmp).map_err(|e| unavailable(&tmp, e))?;
            let mut out = BufWriter::new(file);
            let mut len = 0u64;
            for (rel, key, value) in &records {
                let line = encode_line(&JournalRecord::Put {
                    rel: *rel,
                    key: key.to_string(),
                    value: value.map(str::to_owned),
                })?;
                out.write_all(&line).map_err(|e| unavailable(&tmp, e))?;
                len += line.len() as u64;
            }
            out.flush().map_err(|e| unavailable(&tmp, e))?;
            out.get_ref().sync_all().map_err(|e| unavailable(&tmp, e))?;
            len
        };
        fs::rename(&tmp, &self.path).map_err(|e| unavailable(&self.path, e))?;

        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| unavailable(&self.path, e))?;
        let sync_file = file.try_clone().map_err(|e| unavailable(&self.path, e))?;
        *journal = JournalFile { file, len };
        self.written.store(len, Ordering::Release);
        *self.sync.lock() = SyncState { file: sync_file, synced: len };

        info!(path = %self.path.display(), records = records.len(), bytes = len, "journal.compact");
        Ok(records.len())
    }
}

/// Replay the journal at `path` into `memory`. A missing file is an empty
/// journal. A final line without a newline that fails its check is a torn
/// write: it is logged and cut off. Any other bad line is corruption.
fn replay(path: &Path, memory: &MemoryBackend) -> Result<usize> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(unavailable(path, e)),
    };

    let mut applied = 0usize;
    let mut good_len = 0usize;
    let mut torn = false;
    for (lineno, segment) in bytes.split_inclusive(|b| *b == b'\n').enumerate() {
        let terminated = segment.ends_with(b"\n");
        let line = segment.trim_ascii_end();
        if line.is_empty() {
            good_len += segment.len();
            continue;
        }
        match decode_line(line) {
            Ok(record) => {
                record.apply(memory)?;
                applied += 1;
                good_len += segment.len();
                if !terminated {
                    // Complete record, missing only its newline.
                    torn = true;
                }
            }
            Err(e) if !terminated => {
                warn!(path = %path.display(), line = lineno + 1, error = %e, "journal.replay.torn_tail");
                torn = true;
            }
            Err(e) => {
                return Err(Error::Corrupt(format!("{} line {}: {e}", path.display(), lineno + 1)));
            }
        }
    }

    if torn {
        repair_tail(path, &bytes[..good_len])?;
    }
    debug!(path = %path.display(), records = applied, "journal.replay.done");
    Ok(applied)
}

/// Truncate to the last good byte and make sure the file ends in a newline.
fn repair_tail(path: &Path, good: &[u8]) -> Result<()> {
    let file = OpenOptions::new().write(true).open(path).map_err(|e| unavailable(path, e))?;
    file.set_len(good.len() as u64).map_err(|e| unavailable(path, e))?;
    if !good.is_empty() && !good.ends_with(b"\n") {
        let mut file = OpenOptions::new().append(true).open(path).map_err(|e| unavailable(path, e))?;
        file.write_all(b"\n").map_err(|e| unavailable(path, e))?;
    }
    Ok(())
}

// ============================================================================
// PropertyBackend impl
// ============================================================================

#[async_trait]
impl PropertyBackend for JournalBackend {
    async fn shutdown(&self) -> Result<()> {
        let mut guard = self.writer.lock();
        if let Some(journal) = guard.take() {
            journal.file.sync_all().map_err(|e| unavailable(&self.path, e))?;
        }
        self.memory.close();
        debug!(path = %self.path.display(), "journal.shutdown");
        Ok(())
    }

    async fn put(&self, rel: &RelationKey, key: &str, value: Option<String>) -> Result<()> {
        let mut end = 0;
        self.memory.put_with(rel, key, value, |value| {
            end = self.append(&JournalRecord::Put { rel: *rel, key: key.to_string(), value: value.clone() })?;
            Ok(())
        })?;
        self.sync_through(end)
    }

    async fn get(&self, rel: &RelationKey, key: &str) -> Result<Option<Option<String>>> {
        self.memory.get(rel, key).await
    }

    async fn delete(&self, rel: &RelationKey, key: &str) -> Result<bool> {
        let mut end = 0;
        let removed = self.memory.delete_with(rel, key, || {
            end = self.append(&JournalRecord::Delete { rel: *rel, key: key.to_string() })?;
            Ok(())
        })?;
        self.sync_through(end)?;
        Ok(removed)
    }

    async fn delete_relation(&self, rel: &RelationKey) -> Result<usize> {
        let mut end = 0;
        let removed = self.memory.delete_relation_with(rel, || {
            end = self.append(&JournalRecord::DropRelation { rel: *rel })?;
            Ok(())
        })?;
        self.sync_through(end)?;
        Ok(removed)
    }

    async fn list_by_relation(&self, rel: &RelationKey) -> Result<Vec<PropertyEntry>> {
        self.memory.list_by_relation(rel).await
    }

    async fn list_by_key(&self, key: &str) -> Result<Vec<PropertyEntry>> {
        self.memory.list_by_key(key).await
    }

    async fn property_count(&self) -> Result<u64> {
        self.memory.property_count().await
    }

    async fn relation_count(&self) -> Result<u64> {
        self.memory.relation_count().await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.memory.keys().await
    }

    async fn relations(&self) -> Result<Vec<RelationIdentity>> {
        self.memory.relations().await
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            durable: true,
            supports_compaction: true,
            shards: self.memory.shard_count(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
