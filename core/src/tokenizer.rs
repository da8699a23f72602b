use crate::config::TokenizerOptions;
use crate::Result;
use lazy_static::lazy_static;
use rust_stemmers::Stemmer;
use std::collections::HashSet;
use std::str::Chars;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;
use unicode_segmentation::UnicodeSegmentation;

/// Length floor for pure numbers under number filtering. The leading-digit
/// rule rejects them before this applies.
pub const NUMBER_MIN_LENGTH: usize = 6;

/// Non-whitespace codepoints inspected when deciding whether text needs segmentation.
const CJK_SCAN_LIMIT: usize = 1024;

lazy_static! {
    static ref STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "a","about","above","after","again","against","all","am","an","and","any","are","aren't","as","at",
            "be","because","been","before","being","below","between","both","but","by",
            "can","can't","cannot","could","couldn't",
            "did","didn't","do","does","doesn't","doing","don't","down","during",
            "each","few","for","from","further",
            "had","hadn't","has","hasn't","have","haven't","having","he","he'd","he'll","he's","her","here","here's","hers","herself","him","himself","his","how","how's",
            "i","i'd","i'll","i'm","i've","if","in","into","is","isn't","it","it's","its","itself",
            "let's","me","more","most","mustn't","my","myself",
            "no","nor","not","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
            "same","she","she'd","she'll","she's","should","shouldn't","so","some","such",
            "than","that","that's","the","their","theirs","them","themselves","then","there","there's","these","they","they'd","they'll","they're","they've","this","those","through","to","too",
            "under","until","up","very",
            "was","wasn't","we","we'd","we'll","we're","we've","were","weren't","what","what's","when","when's","where","where's","which","while","who","who's","whom","why","why's","with","won't","would","wouldn't",
            "you","you'd","you'll","you're","you've","your","yours","yourself","yourselves"
        ];
        words.iter().copied().collect()
    };
}

pub fn is_stop_word(term: &str) -> bool {
    STOPWORDS.contains(term)
}

/// Word-boundary analysis for scripts without spaces between words.
pub trait Segmenter: Send + Sync {
    /// Byte ranges `(start, end)` of the words in `text`.
    fn segment(&self, text: &str) -> Vec<(usize, usize)>;
}

/// UAX #29 word boundaries; keeps only segments holding a letter or digit.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnicodeWordSegmenter;

impl Segmenter for UnicodeWordSegmenter {
    fn segment(&self, text: &str) -> Vec<(usize, usize)> {
        text.split_word_bound_indices()
            .filter(|(_, w)| w.chars().any(char::is_alphanumeric))
            .map(|(start, w)| (start, start + w.len()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    AsciiLower,
    AsciiUpper,
    AsciiDigit,
    AsciiIgnore,
    Hyphen,
    Underscore,
    AlphaUpper,
    AlphaLower,
    Digit,
    Ignore,
}

fn classify(c: char) -> CharClass {
    if c.is_ascii() {
        match c {
            'a'..='z' => CharClass::AsciiLower,
            'A'..='Z' => CharClass::AsciiUpper,
            '0'..='9' => CharClass::AsciiDigit,
            '-' => CharClass::Hyphen,
            '_' => CharClass::Underscore,
            _ => CharClass::AsciiIgnore,
        }
    } else if c.is_alphabetic() {
        if c.is_uppercase() {
            CharClass::AlphaUpper
        } else {
            CharClass::AlphaLower
        }
    } else if c.is_numeric() {
        CharClass::Digit
    } else {
        CharClass::Ignore
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WordKind {
    Initial,
    Num,
    Alpha,
    AlphaNum,
}

impl WordKind {
    fn with_alpha(self) -> Self {
        match self {
            WordKind::Initial => WordKind::Alpha,
            WordKind::Num => WordKind::AlphaNum,
            kind => kind,
        }
    }

    fn with_digit(self) -> Self {
        match self {
            WordKind::Initial => WordKind::Num,
            WordKind::Alpha => WordKind::AlphaNum,
            kind => kind,
        }
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32, 0x3400..=0x4DB5 | 0x4E00..=0x9FA5 | 0x20000..=0x2A6D6)
}

fn needs_segmentation(text: &str) -> bool {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .take(CJK_SCAN_LIMIT)
        .any(is_cjk)
}

fn strip_accents(word: &str) -> String {
    word.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Turns raw text into normalized index terms.
///
/// Latin-script text runs through a codepoint state machine (case folding,
/// length limits, number filtering, optional accent stripping and
/// stemming). Text with CJK ideographs near its start is handed to the
/// [`Segmenter`] instead.
pub struct Tokenizer {
    options: TokenizerOptions,
    stemmer: Option<Stemmer>,
    segmenter: Box<dyn Segmenter>,
}

impl Tokenizer {
    pub fn new(options: TokenizerOptions) -> Self {
        let stemmer = options.stem_language.map(|lang| Stemmer::create(lang.algorithm()));
        Self {
            options,
            stemmer,
            segmenter: Box::new(UnicodeWordSegmenter),
        }
    }

    pub fn with_segmenter<S: Segmenter + 'static>(mut self, segmenter: S) -> Self {
        self.segmenter = Box::new(segmenter);
        self
    }

    pub fn options(&self) -> &TokenizerOptions {
        &self.options
    }

    /// Lazily yield `(term, is_numeric)` pairs for `text`.
    pub fn tokenize<'a>(&'a self, text: &'a str) -> Tokens<'a> {
        let mode = if needs_segmentation(text) {
            Mode::Segments {
                text,
                bounds: self.segmenter.segment(text).into_iter(),
            }
        } else {
            Mode::Words(text.chars())
        };
        Tokens { tokenizer: self, mode }
    }

    /// Like [`Tokenizer::tokenize`] for raw bytes; malformed UTF-8 is an error.
    pub fn tokenize_bytes<'a>(&'a self, bytes: &'a [u8]) -> Result<Tokens<'a>> {
        let text = std::str::from_utf8(bytes)?;
        Ok(self.tokenize(text))
    }

    /// Collect just the terms.
    pub fn terms(&self, text: &str) -> Vec<String> {
        self.tokenize(text).map(|(term, _)| term).collect()
    }

    /// Scan the next word. `None` at end of input, `Some(None)` for a word
    /// that was consumed but filtered out.
    fn scan_word(&self, chars: &mut Chars<'_>) -> Option<Option<(String, bool)>> {
        let opts = &self.options;
        let mut word = String::new();
        let mut length = 0usize;
        let mut kind = WordKind::Initial;
        let mut collecting = false;
        let mut valid = true;
        let mut non_ascii = false;

        loop {
            let c = match chars.next() {
                Some(c) => c,
                None if collecting => break,
                None => return None,
            };
            let class = classify(c);
            let is_break = matches!(class, CharClass::AsciiIgnore | CharClass::Ignore)
                || (opts.delimit_hyphen_underscore
                    && matches!(class, CharClass::Hyphen | CharClass::Underscore));
            if is_break {
                if collecting {
                    break;
                }
                continue;
            }

            if !collecting {
                collecting = true;
                if opts.filter_numbers
                    && matches!(class, CharClass::AsciiDigit | CharClass::Digit | CharClass::Hyphen)
                {
                    valid = false;
                }
            }
            // Keep scanning past the limit so the word still ends at its real break.
            if !valid || length >= opts.max_word_length {
                continue;
            }
            length += 1;

            match class {
                CharClass::AsciiUpper => {
                    word.push(c.to_ascii_lowercase());
                    kind = kind.with_alpha();
                }
                CharClass::AlphaUpper => {
                    // Lowercasing can expand (U+0130); `length` counts what is stored.
                    let mut lower = c.to_lowercase();
                    word.extend(lower.next());
                    for extra in lower {
                        if length >= opts.max_word_length {
                            break;
                        }
                        word.push(extra);
                        length += 1;
                    }
                    non_ascii = true;
                    kind = kind.with_alpha();
                }
                CharClass::AlphaLower => {
                    word.push(c);
                    non_ascii = true;
                    kind = kind.with_alpha();
                }
                CharClass::AsciiDigit | CharClass::Digit => {
                    word.push(c);
                    kind = kind.with_digit();
                }
                _ => {
                    word.push(c);
                    kind = kind.with_alpha();
                }
            }
        }

        if !valid {
            return Some(None);
        }
        Some(self.finish_word(word, length, kind, non_ascii))
    }

    fn finish_word(
        &self,
        word: String,
        length: usize,
        kind: WordKind,
        non_ascii: bool,
    ) -> Option<(String, bool)> {
        if word.is_empty() {
            return None;
        }
        if kind == WordKind::Num {
            if !self.options.filter_numbers || length >= NUMBER_MIN_LENGTH {
                return Some((word, true));
            }
            return None;
        }
        if self.options.filter_short_words && length < self.options.min_word_length {
            return None;
        }

        let term = if non_ascii {
            let stripped = if self.options.strip_accents { strip_accents(&word) } else { word };
            stripped.nfc().collect::<String>()
        } else {
            word
        };
        Some((self.stem(term), false))
    }

    fn stem(&self, term: String) -> String {
        match &self.stemmer {
            Some(stemmer) => {
                let stemmed = stemmer.stem(&term).into_owned();
                if stemmed.is_empty() {
                    term
                } else {
                    stemmed
                }
            }
            None => term,
        }
    }

    fn segment_term(&self, segment: &str) -> Option<(String, bool)> {
        let term: String = segment.to_lowercase().nfc().collect();
        if term.is_empty() {
            return None;
        }
        let is_numeric = term.chars().all(char::is_numeric);
        Some((term, is_numeric))
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new(TokenizerOptions::default())
    }
}

enum Mode<'a> {
    Words(Chars<'a>),
    Segments {
        text: &'a str,
        bounds: std::vec::IntoIter<(usize, usize)>,
    },
}

/// Iterator over `(term, is_numeric)` produced by [`Tokenizer::tokenize`].
pub struct Tokens<'a> {
    tokenizer: &'a Tokenizer,
    mode: Mode<'a>,
}

impl<'a> Iterator for Tokens<'a> {
    type Item = (String, bool);

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.mode {
            Mode::Words(chars) => loop {
                match self.tokenizer.scan_word(chars)? {
                    Some(token) => return Some(token),
                    None => continue,
                }
            },
            Mode::Segments { text, bounds } => {
                for (start, end) in bounds.by_ref() {
                    // Ranges from a custom segmenter may not land on char boundaries.
                    let Some(segment) = text.get(start..end) else {
                        tracing::warn!(start, end, "segmenter returned an invalid range");
                        continue;
                    };
                    if let Some(token) = self.tokenizer.segment_term(segment) {
                        return Some(token);
                    }
                }
                None
            }
        }
    }
}
