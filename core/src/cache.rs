//! In-memory posting buffers and the flush into on-disk indexes.

use crate::accumulator::WordTable;
use crate::codec::{append_record, WordDetails, RECORD_SIZE};
use crate::config::{CacheConfig, StoreConfig};
use crate::store::{IndexStore, OpenMode};
use crate::{DocId, Result, ServiceType};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Rough per-term overhead of a buffered hash table entry.
const WORD_ENTRY_COST: usize = 75;

type Blobs = HashMap<String, Vec<u8>>;

/// The live indexes a cache flushes into.
pub struct Indexes {
    pub files: Arc<IndexStore>,
    pub emails: Arc<IndexStore>,
    pub file_updates: Arc<IndexStore>,
}

impl Indexes {
    pub const FILE_INDEX: &'static str = "file-index.db";
    pub const EMAIL_INDEX: &'static str = "email-index.db";
    pub const FILE_UPDATE_INDEX: &'static str = "file-update-index.db";

    pub fn open<P: AsRef<Path>>(dir: P, mode: OpenMode, config: &StoreConfig) -> Result<Self> {
        let dir = dir.as_ref();
        if mode == OpenMode::ReadWrite {
            fs::create_dir_all(dir)?;
        }
        let open = |name: &str| -> Result<Arc<IndexStore>> {
            let opened = IndexStore::open(dir.join(name), mode, config)?;
            if opened.was_repaired() {
                tracing::warn!(index = name, "index was repaired on open");
            }
            Ok(Arc::new(opened.into_store()))
        };
        Ok(Self {
            files: open(Self::FILE_INDEX)?,
            emails: open(Self::EMAIL_INDEX)?,
            file_updates: open(Self::FILE_UPDATE_INDEX)?,
        })
    }

    /// Combined on-disk size of the live indexes.
    pub fn total_size(&self) -> Result<u64> {
        Ok(self.files.size()? + self.emails.size()? + self.file_updates.size()?)
    }

    pub fn close(&self) -> Result<()> {
        self.files.close()?;
        self.emails.close()?;
        self.file_updates.close()
    }
}

#[derive(Default)]
struct UpdateTable {
    words: Blobs,
    detail_count: usize,
}

/// Posting changes for documents already in the index.
///
/// Shared between the indexing thread and anything else editing document
/// metadata, so every access takes the lock.
#[derive(Default)]
pub struct UpdateCache {
    table: Mutex<UpdateTable>,
}

impl UpdateCache {
    pub fn add(&self, term: &str, id: DocId, service_type: ServiceType, score: i32) {
        let record = WordDetails::new(id, service_type, score);
        let mut table = self.table.lock();
        match table.words.get_mut(term) {
            Some(blob) => append_record(blob, &record),
            None => {
                let mut blob = Vec::with_capacity(RECORD_SIZE);
                append_record(&mut blob, &record);
                table.words.insert(term.to_string(), blob);
            }
        }
        table.detail_count += 1;
    }

    pub fn word_count(&self) -> usize {
        self.table.lock().words.len()
    }

    fn detail_count(&self) -> usize {
        self.table.lock().detail_count
    }

    fn take(&self) -> UpdateTable {
        std::mem::take(&mut *self.table.lock())
    }

    /// Put back postings a failed flush did not write, ahead of any queued since.
    fn restore(&self, leftover: Blobs) {
        let mut table = self.table.lock();
        for (term, mut blob) in leftover {
            table.detail_count += blob.len() / RECORD_SIZE;
            if let Some(newer) = table.words.remove(&term) {
                blob.extend_from_slice(&newer);
            }
            table.words.insert(term, blob);
        }
    }
}

/// Where one table's postings went during a flush.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Destination {
    #[default]
    Untouched,
    Live,
    Merge(PathBuf),
}

#[derive(Debug, Default)]
pub struct FlushReport {
    pub terms: usize,
    pub records: usize,
    pub files: Destination,
    pub emails: Destination,
    pub updates: Destination,
}

/// Buffers postings per term until they are flushed to disk.
///
/// New-document postings are owned by the indexing thread and need no
/// lock; updates go through the shared [`UpdateCache`].
pub struct IndexCache {
    config: CacheConfig,
    file_words: Blobs,
    email_words: Blobs,
    word_count: usize,
    detail_count: usize,
    updates: Arc<UpdateCache>,
}

impl IndexCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            file_words: HashMap::new(),
            email_words: HashMap::new(),
            word_count: 0,
            detail_count: 0,
            updates: Arc::new(UpdateCache::default()),
        }
    }

    /// Handle for other threads to queue update postings.
    pub fn update_handle(&self) -> Arc<UpdateCache> {
        Arc::clone(&self.updates)
    }

    pub fn add(
        &mut self,
        term: &str,
        id: DocId,
        service_type: ServiceType,
        score: i32,
        is_new: bool,
    ) {
        if !is_new {
            self.updates.add(term, id, service_type, score);
            return;
        }
        let record = WordDetails::new(id, service_type, score);
        let table = if self.config.email_services().contains(&service_type) {
            &mut self.email_words
        } else {
            &mut self.file_words
        };
        match table.get_mut(term) {
            Some(blob) => append_record(blob, &record),
            None => {
                let mut blob = Vec::with_capacity(RECORD_SIZE);
                append_record(&mut blob, &record);
                table.insert(term.to_string(), blob);
                self.word_count += 1;
            }
        }
        self.detail_count += 1;
    }

    /// Queue every term of an accumulated table with its weight as score.
    pub fn add_word_table(
        &mut self,
        id: DocId,
        service_type: ServiceType,
        table: &WordTable,
        is_new: bool,
    ) {
        for (term, weight) in table.iter() {
            self.add(term, id, service_type, weight, is_new);
        }
    }

    /// Distinct terms buffered for new documents.
    pub fn word_count(&self) -> usize {
        self.word_count
    }

    pub fn update_word_count(&self) -> usize {
        self.updates.word_count()
    }

    pub fn detail_count(&self) -> usize {
        self.detail_count + self.updates.detail_count()
    }

    pub fn is_empty(&self) -> bool {
        self.word_count == 0 && self.update_word_count() == 0
    }

    /// Estimated bytes held by the buffers.
    pub fn estimated_memory(&self) -> usize {
        self.detail_count() * RECORD_SIZE
            + self.word_count * WORD_ENTRY_COST
            + self.update_word_count() * WORD_ENTRY_COST
    }

    pub fn needs_flush(&self) -> bool {
        self.estimated_memory() > self.config.memory_budget
    }

    /// Write every buffered posting to disk and empty the buffers.
    ///
    /// Small batches go straight to the live indexes. Larger ones go to a
    /// fresh merge index when the live one is already past the size
    /// threshold. Updates land in a merge index when one already exists or
    /// the update table is large.
    ///
    /// Every table is attempted even when an earlier one fails. Postings that
    /// were not written stay buffered and the first error is returned.
    pub fn flush_all(&mut self, indexes: &Indexes) -> Result<FlushReport> {
        let mut updates = self.updates.take();
        let mut report = FlushReport::default();
        if self.word_count == 0 && updates.words.is_empty() {
            return Ok(report);
        }
        tracing::info!(
            words = self.word_count,
            hits = self.detail_count + updates.detail_count,
            update_words = updates.words.len(),
            "flushing index cache"
        );
        report.terms = self.word_count + updates.words.len();
        report.records = self.detail_count + updates.detail_count;

        let direct = self.word_count < self.config.direct_flush_word_limit;
        let threshold = self.config.merge_index_size_threshold;

        let mut first_err = None;
        let mut settle = |result: Result<Destination>| match result {
            Ok(dest) => dest,
            Err(err) => {
                tracing::error!(error = %err, "index flush failed, postings kept in cache");
                if first_err.is_none() {
                    first_err = Some(err);
                }
                Destination::Untouched
            }
        };
        let files = flush_new_words(&indexes.files, &mut self.file_words, direct, threshold);
        report.files = settle(files);
        let emails = flush_new_words(&indexes.emails, &mut self.email_words, direct, threshold);
        report.emails = settle(emails);
        if !updates.words.is_empty() {
            let to_merge = indexes.file_updates.has_merge_indexes()
                || updates.words.len() > self.config.update_merge_word_limit;
            report.updates = settle(flush_into(
                &indexes.file_updates,
                to_merge,
                &mut updates.words,
                |store, term, blob| store.update_bytes(term, blob),
            ));
        }

        self.recount();
        if !updates.words.is_empty() {
            self.updates.restore(updates.words);
        }
        if let Some(err) = first_err {
            return Err(err);
        }
        tracing::info!(terms = report.terms, records = report.records, "index cache flushed");
        Ok(report)
    }

    /// Recompute the counters from what is still buffered.
    fn recount(&mut self) {
        self.word_count = self.file_words.len() + self.email_words.len();
        self.detail_count = self
            .file_words
            .values()
            .chain(self.email_words.values())
            .map(|blob| blob.len() / RECORD_SIZE)
            .sum();
    }
}

fn flush_new_words(
    live: &IndexStore,
    words: &mut Blobs,
    direct: bool,
    threshold: u64,
) -> Result<Destination> {
    if words.is_empty() {
        return Ok(Destination::Untouched);
    }
    let to_merge = !direct && live.size()? > threshold;
    flush_into(live, to_merge, words, |store, term, blob| store.append_bytes(term, blob))
}

/// Write `words` into `live` or a fresh merge index next to it. Each term
/// leaves `words` once written, so on error only unwritten terms remain.
fn flush_into(
    live: &IndexStore,
    to_merge: bool,
    words: &mut Blobs,
    write: impl Fn(&IndexStore, &str, &[u8]) -> Result<()>,
) -> Result<Destination> {
    let merge = if to_merge { Some(live.create_merge_index()?) } else { None };
    let target = merge.as_ref().unwrap_or(live);
    let terms: Vec<String> = words.keys().cloned().collect();
    for term in terms {
        if let Some(blob) = words.get(&term) {
            write(target, &term, blob)?;
        }
        words.remove(&term);
    }
    target.flush()?;
    match merge {
        Some(merge) => {
            merge.close()?;
            tracing::info!(path = %merge.path().display(), "flushed into merge index");
            Ok(Destination::Merge(merge.path().to_path_buf()))
        }
        None => Ok(Destination::Live),
    }
}
