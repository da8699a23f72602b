//! On-disk inverted index: term -> concatenated posting records.
//!
//! Each index is a sled database. Every read and write through a handle
//! goes through one mutex; a handle marked for reload reopens the database
//! before the next access.

use crate::codec::{decode_records, encode_records, WordDetails, RECORD_SIZE};
use crate::config::StoreConfig;
use crate::{DocId, IndexError, Result};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Highest `N` tried for `<name>.tmp.<N>`.
pub const MAX_MERGE_INDEXES: u32 = 999;

const META_TREE: &str = "__store_meta";
const META_KEY: &[u8] = b"meta";
const STORE_VERSION: u32 = 1;
/// Page-cache bytes granted per hash bucket.
const CACHE_BYTES_PER_BUCKET: u64 = 64;

lazy_static! {
    static ref MERGE_SUFFIX: Regex = Regex::new(r"^(.+)\.tmp\.(\d+)$").expect("valid regex");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreMeta {
    version: u32,
    bucket_count: u32,
}

/// Result of [`IndexStore::open`]: whether a repair was needed first.
pub enum Opened {
    Clean(IndexStore),
    Repaired(IndexStore),
}

impl Opened {
    pub fn was_repaired(&self) -> bool {
        matches!(self, Opened::Repaired(_))
    }

    pub fn into_store(self) -> IndexStore {
        match self {
            Opened::Clean(store) | Opened::Repaired(store) => store,
        }
    }
}

struct Inner {
    db: Option<sled::Db>,
    needs_reload: bool,
    closed: bool,
}

pub struct IndexStore {
    path: PathBuf,
    mode: OpenMode,
    config: StoreConfig,
    bucket_count: u32,
    inner: Mutex<Inner>,
}

fn open_db(path: &Path, config: &StoreConfig) -> sled::Result<sled::Db> {
    let buckets = config.min_buckets.min(config.max_buckets).max(1);
    sled::Config::new()
        .path(path)
        .cache_capacity(u64::from(buckets) * CACHE_BYTES_PER_BUCKET)
        .open()
}

fn load_bucket_count(db: &sled::Db, mode: OpenMode, config: &StoreConfig) -> Result<u32> {
    let meta_tree = db.open_tree(META_TREE)?;
    if let Some(raw) = meta_tree.get(META_KEY)? {
        let meta: StoreMeta = bincode::deserialize(&raw)?;
        if meta.bucket_count > config.max_buckets {
            tracing::warn!(
                stored = meta.bucket_count,
                max = config.max_buckets,
                "index bucket count exceeds configured maximum; recreate the index to change it"
            );
        }
        return Ok(meta.bucket_count);
    }
    let bucket_count = config.min_buckets.min(config.max_buckets);
    if mode == OpenMode::ReadWrite {
        let meta = StoreMeta { version: STORE_VERSION, bucket_count };
        meta_tree.insert(META_KEY, bincode::serialize(&meta)?)?;
    }
    Ok(bucket_count)
}

type Opener<'a> = dyn Fn(&Path, &StoreConfig) -> sled::Result<sled::Db> + 'a;

fn try_open(
    path: &Path,
    mode: OpenMode,
    config: &StoreConfig,
    opener: &Opener<'_>,
) -> Result<(sled::Db, u32)> {
    let db = opener(path, config)?;
    let bucket_count = load_bucket_count(&db, mode, config)?;
    Ok((db, bucket_count))
}

/// Failures that deleting snapshots can fix. Lock contention and other I/O
/// errors leave the files alone.
fn needs_repair(err: &IndexError) -> bool {
    matches!(
        err,
        IndexError::Store(sled::Error::Corruption { .. } | sled::Error::Unsupported(_))
    )
}

/// Drop cached snapshots so the next open rebuilds state from the log.
fn repair(path: &Path) -> Result<usize> {
    if !path.is_dir() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_string_lossy().starts_with("snap.") {
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

impl IndexStore {
    /// Open (creating in read-write mode) the index at `path`.
    ///
    /// A failed open triggers one repair attempt; if the index still will
    /// not open the error is [`IndexError::Corrupt`].
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode, config: &StoreConfig) -> Result<Opened> {
        Self::open_with(path.as_ref(), mode, config, &open_db)
    }

    fn open_with(
        path: &Path,
        mode: OpenMode,
        config: &StoreConfig,
        opener: &Opener<'_>,
    ) -> Result<Opened> {
        let path = path.to_path_buf();
        if mode == OpenMode::ReadOnly && !path.exists() {
            return Err(IndexError::Missing(path));
        }

        let (opened, repaired) = match try_open(&path, mode, config, opener) {
            Ok(opened) => (opened, false),
            Err(err) if !needs_repair(&err) => return Err(err),
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "index failed to open, attempting repair"
                );
                let removed = repair(&path).map_err(|e| IndexError::Corrupt {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
                match try_open(&path, mode, config, opener) {
                    Ok(opened) => {
                        tracing::info!(
                            path = %path.display(),
                            snapshots_removed = removed,
                            "index repaired"
                        );
                        (opened, true)
                    }
                    Err(err) => {
                        tracing::error!(
                            path = %path.display(),
                            error = %err,
                            "index repair failed"
                        );
                        return Err(IndexError::Corrupt { path, reason: err.to_string() });
                    }
                }
            }
        };

        let (db, bucket_count) = opened;
        tracing::debug!(path = %path.display(), ?mode, bucket_count, "index opened");
        let store = IndexStore {
            path,
            mode,
            config: config.clone(),
            bucket_count,
            inner: Mutex::new(Inner { db: Some(db), needs_reload: false, closed: false }),
        };
        Ok(if repaired { Opened::Repaired(store) } else { Opened::Clean(store) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn bucket_count(&self) -> u32 {
        self.bucket_count
    }

    pub fn is_open(&self) -> bool {
        !self.inner.lock().closed
    }

    /// Ask for the database to be reopened before the next access.
    pub fn mark_needs_reload(&self) {
        self.inner.lock().needs_reload = true;
    }

    pub fn needs_reload(&self) -> bool {
        self.inner.lock().needs_reload
    }

    fn reload(&self, inner: &mut Inner) -> Result<()> {
        // sled holds a file lock, so the old handle must go before reopening.
        drop(inner.db.take());
        let db = open_db(&self.path, &self.config)?;
        tracing::debug!(path = %self.path.display(), "index reloaded");
        inner.db = Some(db);
        inner.needs_reload = false;
        Ok(())
    }

    fn with_db<T>(&self, f: impl FnOnce(&sled::Db) -> Result<T>) -> Result<T> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(IndexError::Closed(self.path.clone()));
        }
        if inner.needs_reload {
            self.reload(&mut inner)?;
        }
        let db = inner.db.as_ref().ok_or_else(|| IndexError::Closed(self.path.clone()))?;
        f(db)
    }

    fn write<T>(&self, f: impl FnOnce(&sled::Db) -> Result<T>) -> Result<T> {
        if self.mode == OpenMode::ReadOnly {
            return Err(IndexError::ReadOnly(self.path.clone()));
        }
        self.with_db(f)
    }

    /// Append raw posting bytes to the term's list, creating it if absent.
    pub fn append_bytes(&self, term: &str, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.write(|db| {
            let mut blob = db.get(term)?.map(|v| v.to_vec()).unwrap_or_default();
            blob.extend_from_slice(bytes);
            db.insert(term, blob)?;
            Ok(())
        })
    }

    pub fn append(&self, term: &str, records: &[WordDetails]) -> Result<()> {
        self.append_bytes(term, &encode_records(records))
    }

    /// Overwrite the term's posting list; an empty list removes the term.
    pub fn replace(&self, term: &str, records: &[WordDetails]) -> Result<()> {
        self.write(|db| {
            if records.is_empty() {
                db.remove(term)?;
            } else {
                db.insert(term, encode_records(records))?;
            }
            Ok(())
        })
    }

    /// Fold score changes into the term's list.
    ///
    /// A record for a document already in the list adds its score to the
    /// stored one and is dropped when the sum falls below 1. Records for new
    /// documents are appended only with a positive score.
    pub fn update(&self, term: &str, records: &[WordDetails]) -> Result<()> {
        self.write(|db| {
            let mut existing = db.get(term)?.map(|v| decode_records(&v)).unwrap_or_default();
            for record in records {
                match existing.iter().position(|e| e.id == record.id) {
                    Some(i) => {
                        let score = existing[i].score() + record.score();
                        if score < 1 {
                            existing.remove(i);
                        } else {
                            existing[i] = WordDetails::new(record.id, record.service_type(), score);
                        }
                    }
                    None if record.score() > 0 => existing.push(*record),
                    None => {}
                }
            }
            if existing.is_empty() {
                db.remove(term)?;
            } else {
                db.insert(term, encode_records(&existing))?;
            }
            Ok(())
        })
    }

    /// [`IndexStore::update`] for a raw blob from the cache.
    pub fn update_bytes(&self, term: &str, bytes: &[u8]) -> Result<()> {
        self.update(term, &decode_records(bytes))
    }

    fn read_raw(&self, term: &str) -> Option<Vec<u8>> {
        match self.with_db(|db| Ok(db.get(term)?)) {
            Ok(found) => found.map(|v| v.to_vec()),
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    term,
                    error = %err,
                    "index read failed"
                );
                None
            }
        }
    }

    /// The term's posting list, capped at `max_hit_buffer` bytes. Read
    /// failures come back as an empty list.
    pub fn get(&self, term: &str) -> Vec<WordDetails> {
        let Some(raw) = self.read_raw(term) else {
            return Vec::new();
        };
        let cap = self.config.max_hit_buffer - self.config.max_hit_buffer % RECORD_SIZE;
        decode_records(&raw[..raw.len().min(cap)])
    }

    /// Number of records stored for the term, uncapped.
    pub fn hit_count(&self, term: &str) -> usize {
        self.read_raw(term).map(|raw| raw.len() / RECORD_SIZE).unwrap_or(0)
    }

    /// Drop records for documents that no longer exist. Returns how many went.
    pub fn remove_dud_hits(&self, term: &str, stale: &[DocId]) -> Result<usize> {
        if stale.is_empty() {
            return Ok(0);
        }
        let stale: HashSet<DocId> = stale.iter().copied().collect();
        let removed = self.write(|db| {
            let Some(raw) = db.get(term)? else {
                return Ok(0);
            };
            let mut records = decode_records(&raw);
            let before = records.len();
            records.retain(|r| !stale.contains(&r.id));
            let removed = before - records.len();
            if removed > 0 {
                if records.is_empty() {
                    db.remove(term)?;
                } else {
                    db.insert(term, encode_records(&records))?;
                }
            }
            Ok(removed)
        })?;
        if removed > 0 {
            tracing::debug!(term, removed, "removed dud hits");
        }
        Ok(removed)
    }

    /// Bytes used on disk.
    pub fn size(&self) -> Result<u64> {
        self.with_db(|db| Ok(db.size_on_disk()?))
    }

    pub fn term_count(&self) -> usize {
        self.with_db(|db| Ok(db.len())).unwrap_or(0)
    }

    /// Single pass over all terms. Holding the iterator keeps the database
    /// open, so a pending reload waits until it is dropped.
    pub fn terms(&self) -> Result<Terms> {
        self.with_db(|db| Ok(Terms { iter: db.iter() }))
    }

    pub fn flush(&self) -> Result<()> {
        self.with_db(|db| {
            db.flush()?;
            Ok(())
        })
    }

    /// Flush and release the database. Later calls fail with [`IndexError::Closed`].
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.closed = true;
        if let Some(db) = inner.db.take() {
            db.flush()?;
            tracing::debug!(path = %self.path.display(), "index closed");
        }
        Ok(())
    }

    fn merge_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn base_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Existing `<name>.tmp.<N>` siblings, sorted by `N`.
    pub fn merge_index_paths(&self) -> Result<Vec<(u32, PathBuf)>> {
        let dir = self.merge_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let base = self.base_name();
        let mut found = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(caps) = MERGE_SUFFIX.captures(&name) {
                if caps[1] == *base {
                    if let Ok(n) = caps[2].parse::<u32>() {
                        found.push((n, entry.path()));
                    }
                }
            }
        }
        found.sort_by_key(|(n, _)| *n);
        Ok(found)
    }

    pub fn has_merge_indexes(&self) -> bool {
        self.merge_index_paths().map(|p| !p.is_empty()).unwrap_or(false)
    }

    /// Create the first unused `<name>.tmp.<N>` next to this index.
    pub fn create_merge_index(&self) -> Result<IndexStore> {
        let dir = self.merge_dir();
        let base = self.base_name();
        for n in 1..=MAX_MERGE_INDEXES {
            let candidate = dir.join(format!("{base}.tmp.{n}"));
            if candidate.exists() {
                continue;
            }
            tracing::info!(path = %candidate.display(), "creating merge index");
            return Ok(IndexStore::open(candidate, OpenMode::ReadWrite, &self.config)?.into_store());
        }
        Err(IndexError::MergeSlotsExhausted(self.path.clone()))
    }
}

impl Drop for IndexStore {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(path = %self.path.display(), error = %err, "flush on drop failed");
        }
    }
}

/// Terms of an index, from [`IndexStore::terms`].
pub struct Terms {
    iter: sled::Iter,
}

impl Iterator for Terms {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            match self.iter.next()? {
                Ok((key, _)) => match String::from_utf8(key.to_vec()) {
                    Ok(term) => return Some(term),
                    Err(_) => continue,
                },
                Err(err) => {
                    tracing::warn!(error = %err, "term iteration stopped");
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tempfile::tempdir;

    fn open_rw(path: &Path) -> IndexStore {
        IndexStore::open(path, OpenMode::ReadWrite, &StoreConfig::default()).unwrap().into_store()
    }

    #[test]
    fn append_preserves_order() {
        let dir = tempdir().unwrap();
        let store = open_rw(&dir.path().join("words"));
        let r = [WordDetails::new(1, 2, 10), WordDetails::new(5, 2, 3), WordDetails::new(1, 2, 7)];
        store.append("fox", &r[..2]).unwrap();
        store.append("fox", &r[2..]).unwrap();
        assert_eq!(store.get("fox"), r.to_vec());
        assert!(store.get("missing").is_empty());
    }

    #[test]
    fn get_is_capped() {
        let dir = tempdir().unwrap();
        let config = StoreConfig { max_hit_buffer: 20, ..StoreConfig::default() };
        let store = IndexStore::open(dir.path().join("words"), OpenMode::ReadWrite, &config)
            .unwrap()
            .into_store();
        let records: Vec<_> = (0..5).map(|i| WordDetails::new(i, 1, 1)).collect();
        store.append("big", &records).unwrap();
        assert_eq!(store.get("big").len(), 2);
        assert_eq!(store.hit_count("big"), 5);
    }

    #[test]
    fn update_merges_scores() {
        let dir = tempdir().unwrap();
        let store = open_rw(&dir.path().join("words"));
        store.append("cat", &[WordDetails::new(1, 1, 5), WordDetails::new(2, 1, 2)]).unwrap();
        let changes = [
            WordDetails::new(1, 1, 3),
            WordDetails::new(2, 1, -2),
            WordDetails::new(3, 1, 4),
            WordDetails::new(4, 1, -1),
        ];
        store.update("cat", &changes).unwrap();
        let got = store.get("cat");
        assert_eq!(got, vec![WordDetails::new(1, 1, 8), WordDetails::new(3, 1, 4)]);
    }

    #[test]
    fn replace_with_nothing_removes_term() {
        let dir = tempdir().unwrap();
        let store = open_rw(&dir.path().join("words"));
        store.append("cat", &[WordDetails::new(1, 1, 5)]).unwrap();
        store.replace("cat", &[]).unwrap();
        assert_eq!(store.term_count(), 0);
    }

    #[test]
    fn read_only_rejects_writes_and_missing_paths() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("words");
        let missing = IndexStore::open(&path, OpenMode::ReadOnly, &StoreConfig::default());
        assert!(matches!(missing, Err(IndexError::Missing(_))));

        drop(open_rw(&path));
        let ro = IndexStore::open(&path, OpenMode::ReadOnly, &StoreConfig::default())
            .unwrap()
            .into_store();
        let written = ro.append("x", &[WordDetails::new(1, 1, 1)]);
        assert!(matches!(written, Err(IndexError::ReadOnly(_))));
    }

    fn unsupported() -> sled::Error {
        sled::Error::Unsupported("incompatible on-disk format".into())
    }

    #[test]
    fn corrupt_store_is_repaired_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("words");
        {
            let store = open_rw(&path);
            store.append("cat", &[WordDetails::new(1, 1, 5)]).unwrap();
        }
        let snapshot = path.join("snap.00000000000000AA");
        fs::write(&snapshot, b"stale snapshot").unwrap();

        let attempts = Cell::new(0);
        let flaky = |p: &Path, c: &StoreConfig| -> sled::Result<sled::Db> {
            attempts.set(attempts.get() + 1);
            if attempts.get() == 1 {
                Err(unsupported())
            } else {
                open_db(p, c)
            }
        };
        let opened =
            IndexStore::open_with(&path, OpenMode::ReadWrite, &StoreConfig::default(), &flaky)
                .unwrap();
        assert!(opened.was_repaired());
        assert_eq!(attempts.get(), 2);
        assert!(!snapshot.exists());
        let store = opened.into_store();
        assert_eq!(store.get("cat"), vec![WordDetails::new(1, 1, 5)]);
    }

    #[test]
    fn failed_repair_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("words");
        let broken = |_: &Path, _: &StoreConfig| -> sled::Result<sled::Db> { Err(unsupported()) };
        match IndexStore::open_with(&path, OpenMode::ReadWrite, &StoreConfig::default(), &broken) {
            Err(err) => {
                assert!(matches!(err, IndexError::Corrupt { .. }));
                assert!(err.is_fatal());
            }
            Ok(_) => panic!("opened a store that cannot be read"),
        }
    }

    #[test]
    fn io_failures_skip_repair() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("words");
        fs::write(&path, b"not a database").unwrap();
        match IndexStore::open(&path, OpenMode::ReadWrite, &StoreConfig::default()) {
            Err(err) => assert!(matches!(err, IndexError::Store(sled::Error::Io(_)))),
            Ok(_) => panic!("opened a plain file as an index"),
        }
    }

    #[test]
    fn locked_store_keeps_its_snapshots() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("words");
        let live = open_rw(&path);
        live.append("cat", &[WordDetails::new(1, 1, 5)]).unwrap();
        let snapshot = path.join("snap.00000000000000AA");
        fs::write(&snapshot, b"snapshot").unwrap();

        let second = IndexStore::open(&path, OpenMode::ReadWrite, &StoreConfig::default());
        assert!(matches!(second, Err(IndexError::Store(_))));
        assert!(snapshot.exists());
        assert_eq!(live.get("cat"), vec![WordDetails::new(1, 1, 5)]);
    }

    #[test]
    fn closed_store_reads_empty() {
        let dir = tempdir().unwrap();
        let store = open_rw(&dir.path().join("words"));
        store.append("cat", &[WordDetails::new(1, 1, 5)]).unwrap();
        store.close().unwrap();
        assert!(!store.is_open());
        assert!(store.get("cat").is_empty());
        assert!(matches!(store.append("cat", &[]), Ok(())));
        assert!(matches!(store.size(), Err(IndexError::Closed(_))));
    }

    #[test]
    fn reload_reopens_transparently() {
        let dir = tempdir().unwrap();
        let store = open_rw(&dir.path().join("words"));
        store.append("cat", &[WordDetails::new(1, 1, 5)]).unwrap();
        store.mark_needs_reload();
        assert!(store.needs_reload());
        assert_eq!(store.get("cat"), vec![WordDetails::new(1, 1, 5)]);
        assert!(!store.needs_reload());
    }

    #[test]
    fn failed_reload_reads_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("words");
        let store = open_rw(&path);
        store.append("cat", &[WordDetails::new(1, 1, 5)]).unwrap();
        store.flush().unwrap();

        store.mark_needs_reload();
        fs::remove_dir_all(&path).unwrap();
        fs::write(&path, b"replaced by a file").unwrap();

        assert!(store.get("cat").is_empty());
        assert_eq!(store.hit_count("cat"), 0);
        assert!(store.needs_reload());
        assert!(store.size().is_err());
    }

    #[test]
    fn merge_indexes_take_first_free_number() {
        let dir = tempdir().unwrap();
        let store = open_rw(&dir.path().join("file-index.db"));
        assert!(!store.has_merge_indexes());
        let first = store.create_merge_index().unwrap();
        assert!(first.path().ends_with("file-index.db.tmp.1"));
        let second = store.create_merge_index().unwrap();
        assert!(second.path().ends_with("file-index.db.tmp.2"));
        let found: Vec<u32> =
            store.merge_index_paths().unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(found, vec![1, 2]);
    }

    #[test]
    fn bucket_count_is_fixed_at_creation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("words");
        let small = StoreConfig { min_buckets: 1024, ..StoreConfig::default() };
        let store = IndexStore::open(&path, OpenMode::ReadWrite, &small).unwrap().into_store();
        assert_eq!(store.bucket_count(), 1024);
        drop(store);
        let store = open_rw(&path);
        assert_eq!(store.bucket_count(), 1024);
    }
}
