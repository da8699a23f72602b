use crate::tokenizer::{is_stop_word, Tokenizer};
use std::collections::HashMap;

/// Term -> weighted occurrence count for one unit of text (a field, a document).
///
/// Weights are signed so a table can also carry differences between two
/// versions of a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WordTable {
    counts: HashMap<String, i32>,
    /// Terms seen by all calls, accepted or not.
    seen: usize,
}

impl WordTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn get(&self, term: &str) -> Option<i32> {
        self.counts.get(term).copied()
    }

    /// Total terms scanned into this table, including those dropped by the cap.
    pub fn words_seen(&self) -> usize {
        self.seen
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i32)> {
        self.counts.iter().map(|(term, weight)| (term.as_str(), *weight))
    }

    /// Tokenize `text` and add `weight` per term occurrence.
    ///
    /// At most `max_words` distinct terms live in the table; once reached,
    /// the rest of the text is still scanned but contributes nothing.
    pub fn accumulate(
        &mut self,
        tokenizer: &Tokenizer,
        text: Option<&str>,
        weight: i32,
        max_words: usize,
    ) {
        let Some(text) = text else { return };
        if weight == 0 {
            return;
        }
        let filter_stop_words = tokenizer.options().filter_stop_words;
        for (term, is_numeric) in tokenizer.tokenize(text) {
            if filter_stop_words && !is_numeric && is_stop_word(&term) {
                continue;
            }
            self.add(term, weight, max_words);
        }
    }

    /// Add already-normalized terms separated by whitespace.
    pub fn accumulate_fast(&mut self, text: Option<&str>, weight: i32, max_words: usize) {
        let Some(text) = text else { return };
        if weight == 0 {
            return;
        }
        for term in text.split_whitespace() {
            self.add(term.to_string(), weight, max_words);
        }
    }

    fn add(&mut self, term: String, weight: i32, max_words: usize) {
        self.seen += 1;
        if self.counts.len() >= max_words {
            return;
        }
        *self.counts.entry(term).or_insert(0) += weight;
    }

    /// Signed deltas turning `old` into `new`; unchanged terms are omitted.
    pub fn differential(old: &WordTable, new: &WordTable) -> WordTable {
        let mut diff = WordTable::new();
        for (term, weight) in new.iter() {
            let delta = weight - old.get(term).unwrap_or(0);
            if delta != 0 {
                diff.counts.insert(term.to_string(), delta);
            }
        }
        for (term, weight) in old.iter() {
            if !new.counts.contains_key(term) && weight != 0 {
                diff.counts.insert(term.to_string(), -weight);
            }
        }
        diff.seen = diff.counts.len();
        diff
    }
}

impl IntoIterator for WordTable {
    type Item = (String, i32);
    type IntoIter = std::collections::hash_map::IntoIter<String, i32>;

    fn into_iter(self) -> Self::IntoIter {
        self.counts.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenizerOptions;

    fn tokenizer() -> Tokenizer {
        Tokenizer::new(TokenizerOptions { stem_language: None, ..TokenizerOptions::default() })
    }

    #[test]
    fn weights_add_per_occurrence() {
        let t = tokenizer();
        let mut table = WordTable::new();
        table.accumulate(&t, Some("fox jumps over fox"), 5, 100);
        table.accumulate(&t, Some("Fox title"), 10, 100);
        assert_eq!(table.get("fox"), Some(20));
        assert_eq!(table.get("jumps"), Some(5));
        assert_eq!(table.get("title"), Some(10));
        // "over" is a stop word
        assert_eq!(table.get("over"), None);
    }

    #[test]
    fn stop_words_kept_when_filter_off() {
        let t = Tokenizer::new(TokenizerOptions {
            stem_language: None,
            filter_stop_words: false,
            ..TokenizerOptions::default()
        });
        let mut table = WordTable::new();
        table.accumulate(&t, Some("the fox"), 1, 100);
        assert_eq!(table.get("the"), Some(1));
    }

    #[test]
    fn zero_weight_and_missing_text_are_noops() {
        let t = tokenizer();
        let mut table = WordTable::new();
        table.accumulate(&t, Some("fox"), 0, 100);
        table.accumulate(&t, None, 3, 100);
        table.accumulate_fast(None, 3, 100);
        assert!(table.is_empty());
        assert_eq!(table.words_seen(), 0);
    }

    #[test]
    fn cap_stops_new_terms_across_calls() {
        let t = tokenizer();
        let mut table = WordTable::new();
        table.accumulate(&t, Some("alpha bravo"), 1, 3);
        table.accumulate(&t, Some("charlie delta echo alpha"), 1, 3);
        assert_eq!(table.len(), 3);
        assert!(table.get("delta").is_none());
        // once full, existing terms stop accumulating too
        assert_eq!(table.get("alpha"), Some(1));
        assert_eq!(table.words_seen(), 6);
    }

    #[test]
    fn fast_path_splits_on_whitespace_only() {
        let mut table = WordTable::new();
        table.accumulate_fast(Some("pre-split  Terms\tpre-split"), 2, 100);
        assert_eq!(table.get("pre-split"), Some(4));
        assert_eq!(table.get("Terms"), Some(2));
    }

    #[test]
    fn differential_of_two_versions() {
        let mut old = WordTable::new();
        old.accumulate_fast(Some("cat cat dog"), 1, 100);
        let mut new = WordTable::new();
        new.accumulate_fast(Some("cat bird bird"), 1, 100);
        let diff = WordTable::differential(&old, &new);
        assert_eq!(diff.get("cat"), Some(-1));
        assert_eq!(diff.get("dog"), Some(-1));
        assert_eq!(diff.get("bird"), Some(2));
        assert_eq!(diff.len(), 3);
    }
}
