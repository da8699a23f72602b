use std::thread;
use tempfile::tempdir;
use tracker_core::accumulator::WordTable;
use tracker_core::cache::{Destination, IndexCache, Indexes};
use tracker_core::codec::WordDetails;
use tracker_core::config::{CacheConfig, StoreConfig, TokenizerOptions};
use tracker_core::store::OpenMode;
use tracker_core::tokenizer::Tokenizer;

fn indexes(dir: &std::path::Path) -> Indexes {
    Indexes::open(dir, OpenMode::ReadWrite, &StoreConfig::default()).unwrap()
}

#[test]
fn small_flush_goes_to_live_indexes() {
    let dir = tempdir().unwrap();
    let idx = indexes(dir.path());
    let mut cache = IndexCache::new(CacheConfig::default());
    cache.add("fox", 1, 1, 10, true);
    cache.add("fox", 2, 1, 4, true);
    cache.add("mailbox", 3, 22, 7, true);

    let report = cache.flush_all(&idx).unwrap();
    assert_eq!(report.files, Destination::Live);
    assert_eq!(report.emails, Destination::Live);
    assert_eq!(report.updates, Destination::Untouched);
    assert_eq!(report.records, 3);
    assert!(cache.is_empty());
    assert_eq!(cache.estimated_memory(), 0);

    assert_eq!(idx.files.get("fox"), vec![WordDetails::new(1, 1, 10), WordDetails::new(2, 1, 4)]);
    assert_eq!(idx.emails.get("mailbox"), vec![WordDetails::new(3, 22, 7)]);
    assert!(idx.files.get("mailbox").is_empty());
}

#[test]
fn large_flush_rotates_to_merge_index() {
    let dir = tempdir().unwrap();
    let idx = indexes(dir.path());
    idx.files.append("seed", &[WordDetails::new(1, 1, 1)]).unwrap();
    idx.files.flush().unwrap();

    let config = CacheConfig {
        direct_flush_word_limit: 1,
        merge_index_size_threshold: 0,
        ..CacheConfig::default()
    };
    let mut cache = IndexCache::new(config);
    cache.add("alpha", 5, 1, 3, true);
    cache.add("bravo", 5, 1, 3, true);

    let report = cache.flush_all(&idx).unwrap();
    let merge_path = match report.files {
        Destination::Merge(path) => path,
        other => panic!("expected merge index, got {other:?}"),
    };
    assert!(merge_path.ends_with("file-index.db.tmp.1"));
    assert!(idx.files.get("alpha").is_empty());
    assert!(idx.files.has_merge_indexes());
}

#[test]
fn updates_merge_into_existing_postings() {
    let dir = tempdir().unwrap();
    let idx = indexes(dir.path());
    idx.file_updates
        .append("fox", &[WordDetails::new(1, 1, 5), WordDetails::new(2, 1, 5)])
        .unwrap();

    let mut cache = IndexCache::new(CacheConfig::default());
    let updates = cache.update_handle();
    updates.add("fox", 1, 1, -5);
    cache.add("fox", 2, 1, 3, false);

    let report = cache.flush_all(&idx).unwrap();
    assert_eq!(report.updates, Destination::Live);
    assert_eq!(idx.file_updates.get("fox"), vec![WordDetails::new(2, 1, 8)]);
}

#[test]
fn big_update_tables_use_a_merge_index() {
    let dir = tempdir().unwrap();
    let idx = indexes(dir.path());
    let mut cache =
        IndexCache::new(CacheConfig { update_merge_word_limit: 0, ..CacheConfig::default() });
    cache.add("fox", 1, 1, 2, false);
    let report = cache.flush_all(&idx).unwrap();
    assert!(matches!(report.updates, Destination::Merge(_)));
    assert!(idx.file_updates.get("fox").is_empty());
}

#[test]
fn concurrent_update_producers() {
    let dir = tempdir().unwrap();
    let idx = indexes(dir.path());
    let mut cache = IndexCache::new(CacheConfig::default());

    let handles: Vec<_> = (0..4u32)
        .map(|worker| {
            let updates = cache.update_handle();
            thread::spawn(move || {
                for i in 0..50u32 {
                    updates.add("shared", worker * 100 + i, 1, 1);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(cache.update_word_count(), 1);
    assert_eq!(cache.detail_count(), 200);

    cache.flush_all(&idx).unwrap();
    assert_eq!(idx.file_updates.get("shared").len(), 200);
}

#[test]
fn accumulated_text_flows_into_the_index() {
    let dir = tempdir().unwrap();
    let idx = indexes(dir.path());
    let tokenizer =
        Tokenizer::new(TokenizerOptions { stem_language: None, ..TokenizerOptions::default() });
    let mut table = WordTable::new();
    table.accumulate(&tokenizer, Some("Quarterly Report"), 10, 10_000);
    table.accumulate(&tokenizer, Some("the report covers revenue"), 1, 10_000);

    let mut cache = IndexCache::new(CacheConfig::default());
    cache.add_word_table(42, 1, &table, true);
    cache.flush_all(&idx).unwrap();

    assert_eq!(idx.files.get("report"), vec![WordDetails::new(42, 1, 11)]);
    assert_eq!(idx.files.get("quarterly"), vec![WordDetails::new(42, 1, 10)]);
    assert!(idx.files.get("the").is_empty());
}

#[test]
fn differential_reindex_adjusts_scores() {
    let dir = tempdir().unwrap();
    let idx = indexes(dir.path());

    let mut old = WordTable::new();
    old.accumulate_fast(Some("draft draft notes"), 1, 100);
    let mut new = WordTable::new();
    new.accumulate_fast(Some("draft final"), 1, 100);

    let mut cache = IndexCache::new(CacheConfig::default());
    cache.add_word_table(9, 1, &old, true);
    cache.flush_all(&idx).unwrap();
    // seed the update index with the first version
    for term in ["draft", "notes"] {
        let records = idx.files.get(term);
        idx.file_updates.append(term, &records).unwrap();
    }

    cache.add_word_table(9, 1, &WordTable::differential(&old, &new), false);
    cache.flush_all(&idx).unwrap();

    assert_eq!(idx.file_updates.get("draft"), vec![WordDetails::new(9, 1, 1)]);
    assert!(idx.file_updates.get("notes").is_empty());
    assert_eq!(idx.file_updates.get("final"), vec![WordDetails::new(9, 1, 1)]);
}

#[test]
fn failed_flush_keeps_unwritten_postings() {
    let dir = tempdir().unwrap();
    let idx = indexes(dir.path());
    let mut cache = IndexCache::new(CacheConfig::default());
    cache.add("fox", 1, 1, 10, true);
    cache.add("mailbox", 2, 22, 7, true);
    cache.add("upd", 3, 1, 4, false);

    idx.files.close().unwrap();
    assert!(cache.flush_all(&idx).is_err());

    assert_eq!(cache.word_count(), 1);
    assert_eq!(cache.detail_count(), 1);
    assert_eq!(cache.update_word_count(), 0);
    assert_eq!(idx.emails.get("mailbox"), vec![WordDetails::new(2, 22, 7)]);
    assert_eq!(idx.file_updates.get("upd"), vec![WordDetails::new(3, 1, 4)]);

    drop(idx);
    let idx = indexes(dir.path());
    let report = cache.flush_all(&idx).unwrap();
    assert_eq!(report.files, Destination::Live);
    assert_eq!(report.emails, Destination::Untouched);
    assert!(cache.is_empty());
    assert_eq!(idx.files.get("fox"), vec![WordDetails::new(1, 1, 10)]);
}

#[test]
fn failed_update_flush_requeues_before_newer_updates() {
    let dir = tempdir().unwrap();
    let idx = indexes(dir.path());
    let mut cache = IndexCache::new(CacheConfig::default());
    let updates = cache.update_handle();
    updates.add("upd", 1, 1, 4);

    idx.file_updates.close().unwrap();
    assert!(cache.flush_all(&idx).is_err());
    assert_eq!(cache.update_word_count(), 1);

    updates.add("upd", 2, 1, 6);
    assert_eq!(cache.detail_count(), 2);

    drop(idx);
    let idx = indexes(dir.path());
    let report = cache.flush_all(&idx).unwrap();
    assert_eq!(report.updates, Destination::Live);
    assert_eq!(report.records, 2);
    assert_eq!(
        idx.file_updates.get("upd"),
        vec![WordDetails::new(1, 1, 4), WordDetails::new(2, 1, 6)]
    );
}
