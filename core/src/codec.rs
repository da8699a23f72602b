//! Posting records and their on-disk layout.
//!
//! A record is 8 bytes: the document id followed by the amalgamated
//! service-type/score word, both little-endian. A posting list is records
//! concatenated in append order with no header.

use crate::{DocId, ServiceType};

pub const RECORD_SIZE: usize = 8;

/// Scores are clamped to this before packing.
pub const MAX_SCORE: i32 = 30_000;
pub const MIN_SCORE: i32 = i16::MIN as i32;

/// Pack a service type and score into one word: service type in the top
/// byte, the score as a signed 16-bit value in the next two, low byte zero.
pub fn amalgamate(service_type: ServiceType, score: i32) -> i32 {
    let score = score.clamp(MIN_SCORE, MAX_SCORE) as i16;
    let [hi, lo] = score.to_be_bytes();
    i32::from_be_bytes([service_type, hi, lo, 0])
}

pub fn unamalgamate(amalgamated: i32) -> (ServiceType, i32) {
    let [service_type, hi, lo, _] = amalgamated.to_be_bytes();
    (service_type, i16::from_be_bytes([hi, lo]) as i32)
}

/// One hit of a term in a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WordDetails {
    pub id: DocId,
    pub amalgamated: i32,
}

impl WordDetails {
    pub fn new(id: DocId, service_type: ServiceType, score: i32) -> Self {
        Self { id, amalgamated: amalgamate(service_type, score) }
    }

    pub fn service_type(&self) -> ServiceType {
        unamalgamate(self.amalgamated).0
    }

    pub fn score(&self) -> i32 {
        unamalgamate(self.amalgamated).1
    }

    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        out[..4].copy_from_slice(&self.id.to_le_bytes());
        out[4..].copy_from_slice(&self.amalgamated.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; RECORD_SIZE]) -> Self {
        let [a, b, c, d, e, f, g, h] = *bytes;
        Self {
            id: u32::from_le_bytes([a, b, c, d]),
            amalgamated: i32::from_le_bytes([e, f, g, h]),
        }
    }
}

pub fn append_record(buf: &mut Vec<u8>, record: &WordDetails) {
    buf.extend_from_slice(&record.to_bytes());
}

pub fn encode_records(records: &[WordDetails]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(records.len() * RECORD_SIZE);
    for record in records {
        append_record(&mut buf, record);
    }
    buf
}

/// Decode a posting list; a trailing partial record is ignored.
pub fn decode_records(bytes: &[u8]) -> Vec<WordDetails> {
    bytes
        .chunks_exact(RECORD_SIZE)
        .map(|chunk| {
            let mut raw = [0u8; RECORD_SIZE];
            raw.copy_from_slice(chunk);
            WordDetails::from_bytes(&raw)
        })
        .collect()
}
