//! Token and sentence data structures
//!
//! A sentence is an ordered list of tokens, each carrying one or more
//! ambiguous readings (lemma + POS tag). Tokens keep their identity for the
//! lifetime of the sentence; only their reading sets and flags change during
//! disambiguation.

use crate::index::SentenceIndex;
use once_cell::sync::OnceCell;

/// POS tag carried by the pseudo token that opens every analyzed sentence
pub const SENT_START: &str = "SENT_START";

/// Lowercase a string char by char
///
/// Used everywhere case-insensitive comparison happens so that fast-reject
/// sets and the matcher agree on what "lowercase" means.
pub fn lowercase(s: &str) -> String {
    s.chars().flat_map(char::to_lowercase).collect()
}

/// Compare `s` against an already lowercased string, ignoring case
pub fn eq_lowercase(s: &str, lower: &str) -> bool {
    s.chars().flat_map(char::to_lowercase).eq(lower.chars())
}

/// One interpretation of a token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Reading {
    pub lemma: Option<String>,
    pub pos: Option<String>,
}

impl Reading {
    pub fn new(lemma: &str, pos: &str) -> Self {
        Self {
            lemma: Some(lemma.to_string()),
            pos: Some(pos.to_string()),
        }
    }

    /// A reading with neither lemma nor tag (unknown word)
    pub fn untagged() -> Self {
        Self::default()
    }

    pub fn lemma(&self) -> Option<&str> {
        self.lemma.as_deref()
    }

    pub fn pos(&self) -> Option<&str> {
        self.pos.as_deref()
    }
}

/// A token in a sentence
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub text: String,
    pub whitespace_before: bool,
    /// Index of the token in its sentence
    pub position: usize,
    /// Byte offset of the token in the analyzed text
    pub start: usize,
    /// Never empty
    readings: Vec<Reading>,
    pub misspelled: bool,
    pub immunized: bool,
    pub ignore_spelling: bool,
}

impl Token {
    /// Create a token; an empty reading list becomes one untagged reading
    pub fn new(text: &str, readings: Vec<Reading>) -> Self {
        let readings = if readings.is_empty() {
            vec![Reading::untagged()]
        } else {
            readings
        };
        Self {
            text: text.to_string(),
            whitespace_before: true,
            position: 0,
            start: 0,
            readings,
            misspelled: false,
            immunized: false,
            ignore_spelling: false,
        }
    }

    /// Create a token with a single reading
    pub fn tagged(text: &str, lemma: &str, pos: &str) -> Self {
        Self::new(text, vec![Reading::new(lemma, pos)])
    }

    /// The empty pseudo token placed at index 0 of analyzed sentences
    pub fn sentence_start() -> Self {
        let mut token = Self::new(
            "",
            vec![Reading {
                lemma: None,
                pos: Some(SENT_START.to_string()),
            }],
        );
        token.whitespace_before = false;
        token
    }

    pub fn with_whitespace_before(mut self, whitespace_before: bool) -> Self {
        self.whitespace_before = whitespace_before;
        self
    }

    pub fn with_start(mut self, start: usize) -> Self {
        self.start = start;
        self
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    /// Replace the reading set; an empty list is refused and returns false
    pub fn set_readings(&mut self, readings: Vec<Reading>) -> bool {
        if readings.is_empty() {
            return false;
        }
        self.readings = readings;
        true
    }

    /// Append a reading unless an identical one is already present
    pub fn add_reading(&mut self, reading: Reading) {
        if !self.readings.contains(&reading) {
            self.readings.push(reading);
        }
    }

    /// Drop readings for which `remove` holds, keeping at least one reading
    ///
    /// Returns the number of readings removed. If every reading would be
    /// removed the token is left untouched.
    pub fn remove_readings<F>(&mut self, remove: F) -> usize
    where
        F: Fn(&Reading) -> bool,
    {
        let kept: Vec<Reading> = self
            .readings
            .iter()
            .filter(|r| !remove(r))
            .cloned()
            .collect();
        if kept.is_empty() {
            return 0;
        }
        let removed = self.readings.len() - kept.len();
        self.readings = kept;
        removed
    }

    pub fn is_sentence_start(&self) -> bool {
        self.readings.iter().any(|r| r.pos() == Some(SENT_START))
    }

    pub fn has_pos(&self, pos: &str) -> bool {
        self.readings.iter().any(|r| r.pos() == Some(pos))
    }

    /// Byte offset just past the token text
    pub fn end(&self) -> usize {
        self.start + self.text.len()
    }
}

/// A sentence: tokens plus a lazily built lowercase index for fast-reject
#[derive(Debug, Clone, Default)]
pub struct Sentence {
    tokens: Vec<Token>,
    index: OnceCell<SentenceIndex>,
}

impl Sentence {
    /// Build a sentence, renumbering token positions
    pub fn new(mut tokens: Vec<Token>) -> Self {
        for (i, token) in tokens.iter_mut().enumerate() {
            token.position = i;
        }
        Self {
            tokens,
            index: OnceCell::new(),
        }
    }

    /// Build a sentence from `(text, lemma, pos)` triples, preceded by the
    /// sentence start token
    pub fn from_tagged(words: &[(&str, &str, &str)]) -> Self {
        let mut tokens = vec![Token::sentence_start()];
        tokens.extend(
            words
                .iter()
                .map(|(text, lemma, pos)| Token::tagged(text, lemma, pos)),
        );
        if let Some(first) = tokens.get_mut(1) {
            first.whitespace_before = false;
        }
        Self::new(tokens)
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn token(&self, i: usize) -> Option<&Token> {
        self.tokens.get(i)
    }

    /// Mutable access to a token; invalidates the cached index
    pub fn token_mut(&mut self, i: usize) -> Option<&mut Token> {
        self.index.take();
        self.tokens.get_mut(i)
    }

    /// Lowercase token and lemma sets, built on first use
    pub fn index(&self) -> &SentenceIndex {
        self.index.get_or_init(|| SentenceIndex::build(&self.tokens))
    }

    /// Last token that is not the sentence start marker
    pub fn last_word(&self) -> Option<&Token> {
        self.tokens.iter().rev().find(|t| !t.is_sentence_start())
    }

    /// Surface text reassembled from tokens
    pub fn text(&self) -> String {
        let mut out = String::new();
        for token in &self.tokens {
            if token.whitespace_before && !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&token.text);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_readings_become_untagged() {
        let token = Token::new("xyz", Vec::new());
        assert_eq!(token.readings(), &[Reading::untagged()]);
    }

    #[test]
    fn test_remove_keeps_last_reading() {
        let mut token = Token::new("run", vec![Reading::new("run", "VB"), Reading::new("run", "NN")]);
        assert_eq!(token.remove_readings(|r| r.pos() == Some("VB")), 1);
        assert_eq!(token.readings(), &[Reading::new("run", "NN")]);
        assert_eq!(token.remove_readings(|_| true), 0);
        assert_eq!(token.readings().len(), 1);
    }

    #[test]
    fn test_index_invalidated_on_mutation() {
        let mut sentence = Sentence::from_tagged(&[("Dogs", "dog", "NNS")]);
        assert!(sentence.index().contains_lemma("dog"));
        if let Some(token) = sentence.token_mut(1) {
            token.set_readings(vec![Reading::new("dogs", "NNP")]);
        }
        assert!(!sentence.index().contains_lemma("dog"));
        assert!(sentence.index().contains_lemma("dogs"));
    }

    #[test]
    fn test_from_tagged_positions() {
        let sentence = Sentence::from_tagged(&[("a", "a", "DT"), ("cat", "cat", "NN")]);
        assert_eq!(sentence.len(), 3);
        assert!(sentence.tokens()[0].is_sentence_start());
        assert_eq!(sentence.tokens()[2].position, 2);
        assert_eq!(sentence.text(), "a cat");
    }

    #[test]
    fn test_eq_lowercase() {
        assert!(eq_lowercase("ÀBC", "àbc"));
        assert!(!eq_lowercase("abcd", "abc"));
        assert_eq!(lowercase("Автор"), "автор");
    }
}
