use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};
use tracker_core::accumulator::WordTable;
use tracker_core::cache::{IndexCache, Indexes};
use tracker_core::config::IndexerConfig;
use tracker_core::query::Searcher;
use tracker_core::scheduler::{DiskSpaceMonitor, IndexControl, LoopAction};
use tracker_core::store::{IndexStore, OpenMode};
use tracker_core::tokenizer::Tokenizer;
use tracker_core::{DocId, ServiceType};
use walkdir::WalkDir;

const FILE_NAME_WEIGHT: i32 = 10;
const BODY_WEIGHT: i32 = 1;
const DOCUMENTS_FILE: &str = "documents.json";

#[derive(Parser)]
#[command(name = "tracker-indexer")]
#[command(
    about = "Feed text files through the indexing pipeline and query the result",
    long_about = None
)]
struct Cli {
    /// JSON config file; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index every UTF-8 file under a directory
    Index {
        #[arg(long)]
        input: PathBuf,
        /// Directory holding the index files
        #[arg(long)]
        data: PathBuf,
        /// Service type recorded for the documents
        #[arg(long, default_value_t = 1)]
        service: ServiceType,
    },
    /// Ranked hits for all words of a query
    Search {
        #[arg(long)]
        data: PathBuf,
        #[arg(long)]
        query: String,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Restrict to these service types
        #[arg(long)]
        service: Vec<ServiceType>,
    },
    /// Closest indexed spelling of a word
    Suggest {
        #[arg(long)]
        data: PathBuf,
        #[arg(long)]
        word: String,
        #[arg(long, default_value_t = 3)]
        max_distance: usize,
    },
}

/// Document id <-> path mapping kept next to the indexes.
#[derive(Debug, Default, Serialize, Deserialize)]
struct DocumentMap {
    next_id: DocId,
    paths: BTreeMap<DocId, String>,
    updated_at: String,
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => IndexerConfig::load(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => IndexerConfig::default(),
    };

    match cli.command {
        Commands::Index { input, data, service } => index_files(&input, &data, service, &config),
        Commands::Search { data, query, offset, limit, service } => {
            search(&data, &query, offset, limit, &service, &config)
        }
        Commands::Suggest { data, word, max_distance } => {
            suggest(&data, &word, max_distance, &config)
        }
    }
}

fn load_documents(data: &Path) -> Result<DocumentMap> {
    let path = data.join(DOCUMENTS_FILE);
    if !path.exists() {
        return Ok(DocumentMap::default());
    }
    let f = File::open(&path)?;
    Ok(serde_json::from_reader(BufReader::new(f))?)
}

fn save_documents(data: &Path, docs: &mut DocumentMap) -> Result<()> {
    docs.updated_at = time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "".into());
    let f = File::create(data.join(DOCUMENTS_FILE))?;
    serde_json::to_writer_pretty(BufWriter::new(f), docs)?;
    Ok(())
}

fn index_files(
    input: &Path,
    data: &Path,
    service: ServiceType,
    config: &IndexerConfig,
) -> Result<()> {
    let indexes = Indexes::open(data, OpenMode::ReadWrite, &config.store)
        .with_context(|| format!("opening indexes in {}", data.display()))?;
    let tokenizer = Tokenizer::new(config.tokenizer.clone());
    let mut cache = IndexCache::new(config.cache.clone());
    let control = IndexControl::new(config.scheduler.clone());
    let monitor = DiskSpaceMonitor::new(data, config.scheduler.min_free_disk_percent);
    let max_words = config.limits.max_words_to_index;

    let mut docs = load_documents(data)?;
    let known: HashSet<String> = docs.paths.values().cloned().collect();
    let mut indexed = 0usize;

    for entry in WalkDir::new(input).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path().to_string_lossy().into_owned();
        if known.contains(&path) {
            tracing::debug!(path, "already indexed");
            continue;
        }
        let bytes = match fs::read(entry.path()) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(path, error = %err, "cannot read file");
                continue;
            }
        };
        let Ok(body) = std::str::from_utf8(&bytes) else {
            tracing::debug!(path, "skipping non-UTF-8 file");
            continue;
        };

        let id = docs.next_id;
        docs.next_id += 1;
        let mut table = WordTable::new();
        let name = entry.file_name().to_string_lossy();
        table.accumulate(&tokenizer, Some(&name), FILE_NAME_WEIGHT, max_words);
        table.accumulate(&tokenizer, Some(body), BODY_WEIGHT, max_words);
        cache.add_word_table(id, service, &table, true);
        docs.paths.insert(id, path);
        indexed += 1;

        if control.check(&mut cache, &indexes, &monitor)? == LoopAction::Exit {
            break;
        }
    }

    control.request_shutdown();
    control.check(&mut cache, &indexes, &monitor)?;
    indexes.close()?;
    save_documents(data, &mut docs)?;
    tracing::info!(documents = indexed, total = docs.paths.len(), "index build complete");
    Ok(())
}

fn open_file_index(data: &Path, config: &IndexerConfig) -> Result<Arc<IndexStore>> {
    let path = data.join(Indexes::FILE_INDEX);
    let opened = IndexStore::open(&path, OpenMode::ReadWrite, &config.store)
        .with_context(|| format!("opening {}", path.display()))?;
    Ok(Arc::new(opened.into_store()))
}

#[derive(Serialize)]
struct SearchOutput {
    query: String,
    terms: Vec<String>,
    total_hits: usize,
    results: Vec<ResultRow>,
}

#[derive(Serialize)]
struct ResultRow {
    doc_id: DocId,
    service_type: ServiceType,
    score: i32,
    path: String,
}

fn search(
    data: &Path,
    query: &str,
    offset: usize,
    limit: usize,
    services: &[ServiceType],
    config: &IndexerConfig,
) -> Result<()> {
    let searcher = Searcher::new(open_file_index(data, config)?);
    let docs = load_documents(data)?;
    let tokenizer = Tokenizer::new(config.tokenizer.clone());
    let terms = tokenizer.terms(query);
    let term_refs: Vec<&str> = terms.iter().map(String::as_str).collect();

    let total_hits = searcher.hit_count(&term_refs, services);
    let mut results = Vec::new();
    let mut stale = Vec::new();
    for hit in searcher.hits(&term_refs, services, offset, limit) {
        match docs.paths.get(&hit.id) {
            Some(path) if Path::new(path).exists() => results.push(ResultRow {
                doc_id: hit.id,
                service_type: hit.service_type,
                score: hit.score,
                path: path.clone(),
            }),
            _ => stale.push(hit.id),
        }
    }
    if !stale.is_empty() {
        for term in &term_refs {
            searcher.remove_dud_hits(term, &stale)?;
        }
        tracing::info!(removed = stale.len(), "dropped hits for missing documents");
    }

    let out = SearchOutput { query: query.to_string(), terms, total_hits, results };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn suggest(data: &Path, word: &str, max_distance: usize, config: &IndexerConfig) -> Result<()> {
    let searcher = Searcher::new(open_file_index(data, config)?);
    let tokenizer = Tokenizer::new(config.tokenizer.clone());
    let term = tokenizer.terms(word).into_iter().next().unwrap_or_else(|| word.to_lowercase());
    match searcher.suggest(&term, max_distance) {
        Some(suggestion) => {
            println!("{}", serde_json::json!({ "word": word, "suggestion": suggestion }))
        }
        None => anyhow::bail!("index {} cannot be read", data.display()),
    }
    Ok(())
}
