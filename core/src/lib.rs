//! Text-to-index pipeline: tokenizer, word accumulation, posting-list
//! encoding, the on-disk inverted index, the flush cache and the query layer.

pub mod accumulator;
pub mod cache;
pub mod codec;
pub mod config;
pub mod distance;
pub mod error;
pub mod query;
pub mod scheduler;
pub mod store;
pub mod tokenizer;

pub use error::{IndexError, Result};

pub type DocId = u32;
/// Service (category) tag from the external ontology; only the low byte is stored.
pub type ServiceType = u8;
