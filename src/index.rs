//! Lowercase lookup sets for fast rule rejection
//!
//! A rule whose required literal tokens (or lemmas) are not all present in
//! a sentence cannot match it, so the matcher never runs.

use crate::token::{Token, lowercase};
use rustc_hash::FxHashSet;

/// Lowercase surface forms and lemmas of a sentence
#[derive(Debug, Clone, Default)]
pub struct SentenceIndex {
    token_set: FxHashSet<String>,
    lemma_set: FxHashSet<String>,
}

impl SentenceIndex {
    /// Create a new empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from the tokens of a sentence
    pub fn build(tokens: &[Token]) -> Self {
        let mut index = Self::new();
        for token in tokens {
            index.add_token(token);
        }
        index
    }

    fn add_token(&mut self, token: &Token) {
        self.token_set.insert(lowercase(&token.text));
        for lemma in token.readings().iter().filter_map(|r| r.lemma()) {
            self.lemma_set.insert(lowercase(lemma));
        }
    }

    pub fn contains_token(&self, lower: &str) -> bool {
        self.token_set.contains(lower)
    }

    pub fn contains_lemma(&self, lower: &str) -> bool {
        self.lemma_set.contains(lower)
    }

    /// True if every (lowercase) string of `tokens` occurs as a surface form
    pub fn has_all_tokens(&self, tokens: &FxHashSet<String>) -> bool {
        tokens.is_subset(&self.token_set)
    }

    /// True if every (lowercase) string of `lemmas` occurs as a lemma
    pub fn has_all_lemmas(&self, lemmas: &FxHashSet<String>) -> bool {
        lemmas.is_subset(&self.lemma_set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Sentence;

    #[test]
    fn test_index_building() {
        let sentence = Sentence::from_tagged(&[("The", "the", "DT"), ("Dogs", "Dog", "NNS")]);
        let index = SentenceIndex::build(sentence.tokens());

        assert!(index.contains_token("the"));
        assert!(index.contains_token("dogs"));
        assert!(!index.contains_token("Dogs"));
        assert!(index.contains_lemma("dog"));
    }

    #[test]
    fn test_subset_checks() {
        let sentence = Sentence::from_tagged(&[("a", "a", "DT"), ("cat", "cat", "NN")]);
        let index = sentence.index();
        let mut wanted = FxHashSet::default();
        wanted.insert("cat".to_string());
        assert!(index.has_all_tokens(&wanted));
        wanted.insert("dog".to_string());
        assert!(!index.has_all_tokens(&wanted));
        assert!(index.has_all_lemmas(&FxHashSet::default()));
    }
}
