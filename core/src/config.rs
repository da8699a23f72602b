use crate::{Result, ServiceType};
use rust_stemmers::Algorithm;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::ops::RangeInclusive;
use std::path::Path;

/// Languages with a snowball stemmer available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StemLanguage {
    Danish,
    Dutch,
    English,
    Finnish,
    French,
    German,
    Hungarian,
    Italian,
    Norwegian,
    Portuguese,
    Romanian,
    Russian,
    Spanish,
    Swedish,
    Turkish,
}

impl StemLanguage {
    pub fn algorithm(self) -> Algorithm {
        match self {
            StemLanguage::Danish => Algorithm::Danish,
            StemLanguage::Dutch => Algorithm::Dutch,
            StemLanguage::English => Algorithm::English,
            StemLanguage::Finnish => Algorithm::Finnish,
            StemLanguage::French => Algorithm::French,
            StemLanguage::German => Algorithm::German,
            StemLanguage::Hungarian => Algorithm::Hungarian,
            StemLanguage::Italian => Algorithm::Italian,
            StemLanguage::Norwegian => Algorithm::Norwegian,
            StemLanguage::Portuguese => Algorithm::Portuguese,
            StemLanguage::Romanian => Algorithm::Romanian,
            StemLanguage::Russian => Algorithm::Russian,
            StemLanguage::Spanish => Algorithm::Spanish,
            StemLanguage::Swedish => Algorithm::Swedish,
            StemLanguage::Turkish => Algorithm::Turkish,
        }
    }
}

/// Word splitting and normalization options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerOptions {
    /// Longer words are truncated to this many codepoints.
    pub max_word_length: usize,
    pub min_word_length: usize,
    /// Reject every word starting with a digit or hyphen, pure numbers included.
    pub filter_numbers: bool,
    /// Drop non-numeric words shorter than `min_word_length`.
    pub filter_short_words: bool,
    /// Treat `-` and `_` as word breaks.
    pub delimit_hyphen_underscore: bool,
    pub strip_accents: bool,
    pub stem_language: Option<StemLanguage>,
    /// Applied by the word accumulator, never by the tokenizer itself.
    pub filter_stop_words: bool,
}

impl Default for TokenizerOptions {
    fn default() -> Self {
        Self {
            max_word_length: 30,
            min_word_length: 3,
            filter_numbers: true,
            filter_short_words: true,
            delimit_hyphen_underscore: true,
            strip_accents: false,
            stem_language: Some(StemLanguage::English),
            filter_stop_words: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Bucket count used when a store is created.
    pub min_buckets: u32,
    /// Upper bound; stores created with more buckets keep theirs until recreated.
    pub max_buckets: u32,
    /// Cap on the posting-list bytes one lookup returns.
    pub max_hit_buffer: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            min_buckets: 65_536,
            max_buckets: 524_288,
            max_hit_buffer: 480_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Estimated cache cost (bytes) above which a flush is requested.
    pub memory_budget: usize,
    /// Below this many buffered terms, flush straight into the live index.
    pub direct_flush_word_limit: usize,
    /// Live indexes larger than this get a fresh merge index instead.
    pub merge_index_size_threshold: u64,
    /// Update tables larger than this always go to a merge index.
    pub update_merge_word_limit: usize,
    /// Inclusive service-type interval routed to the email index.
    pub email_service_range: [ServiceType; 2],
}

impl CacheConfig {
    pub fn email_services(&self) -> RangeInclusive<ServiceType> {
        self.email_service_range[0]..=self.email_service_range[1]
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_budget: 16 * 1024 * 1024,
            direct_flush_word_limit: 1500,
            merge_index_size_threshold: 4_000_000,
            update_merge_word_limit: 5000,
            email_service_range: [20, 29],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Sleep between documents; 0 disables throttling.
    pub throttle_ms: u64,
    /// Pause when free space on the index volume drops below this percentage.
    pub min_free_disk_percent: f64,
    /// Pause when the live indexes together grow beyond this size.
    pub max_index_bytes: u64,
    /// How often a forced (resource) pause re-checks its conditions.
    pub pause_poll_ms: u64,
    pub start_paused: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            throttle_ms: 0,
            min_free_disk_percent: 1.0,
            max_index_bytes: 2_000_000_000,
            pause_poll_ms: 5_000,
            start_paused: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub tokenizer: TokenizerOptions,
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
    pub limits: Limits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Distinct terms accepted into one word table.
    pub max_words_to_index: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self { max_words_to_index: 10_000 }
    }
}

impl IndexerConfig {
    /// Read a JSON config file; absent fields take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = File::open(path)?;
        let config = serde_json::from_reader(BufReader::new(f))?;
        Ok(config)
    }
}
