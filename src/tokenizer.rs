//! Sentence splitting, tokenization and tagging
//!
//! The matcher only needs analyzed sentences; [`Analyzer`] is the seam where
//! a language-specific pipeline plugs in. [`SimpleAnalyzer`] is a small
//! language-neutral one: paragraphs break at blank lines, sentences after
//! `.`, `!`, `?` or `…` followed by whitespace, and tokens are word runs or
//! single punctuation characters.

use crate::tagger::ManualTagger;
use crate::token::{Sentence, Token};
use memchr::memmem;
use std::ops::Range;

/// Turns raw text into analyzed sentences
pub trait Analyzer {
    /// Analyze `text`; token offsets are byte offsets into `text` and every
    /// sentence starts with the sentence start token
    fn analyze(&self, text: &str) -> Vec<Sentence>;
}

#[derive(Debug, Default)]
pub struct SimpleAnalyzer {
    tagger: Option<ManualTagger>,
}

impl SimpleAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tagger(tagger: ManualTagger) -> Self {
        Self {
            tagger: Some(tagger),
        }
    }

    pub fn tagger(&self) -> Option<&ManualTagger> {
        self.tagger.as_ref()
    }

    fn analyze_sentence(&self, text: &str, range: Range<usize>) -> Sentence {
        let mut tokens = vec![Token::sentence_start().with_start(range.start)];
        for m in tokenize(&text[range.clone()]) {
            let start = range.start + m.start;
            let word = &text[start..range.start + m.end];
            let whitespace_before = text[..start]
                .chars()
                .next_back()
                .is_some_and(char::is_whitespace);
            let readings = self
                .tagger
                .as_ref()
                .map(|tagger| tagger.lookup_word(word))
                .unwrap_or_default();
            tokens.push(
                Token::new(word, readings)
                    .with_whitespace_before(whitespace_before)
                    .with_start(start),
            );
        }
        Sentence::new(tokens)
    }
}

impl Analyzer for SimpleAnalyzer {
    fn analyze(&self, text: &str) -> Vec<Sentence> {
        split_sentences(text)
            .into_iter()
            .map(|range| self.analyze_sentence(text, range))
            .collect()
    }
}

/// Byte ranges of paragraphs, separated by blank lines
pub fn paragraphs(text: &str) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    for pos in memmem::find_iter(text.as_bytes(), b"\n\n") {
        if pos >= start {
            ranges.push(start..pos);
            start = pos + 2;
        }
    }
    ranges.push(start..text.len());
    ranges
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '…')
}

fn is_closing(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | ']' | '»' | '”' | '’')
}

/// Byte ranges of sentences, trimmed of surrounding whitespace
pub fn split_sentences(text: &str) -> Vec<Range<usize>> {
    let mut sentences = Vec::new();
    for paragraph in paragraphs(text) {
        let slice = &text[paragraph.clone()];
        let mut start = 0;
        let mut chars = slice.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if !is_terminator(c) {
                continue;
            }
            let mut end = i + c.len_utf8();
            while let Some(&(j, next)) = chars.peek()
                && (is_terminator(next) || is_closing(next))
            {
                end = j + next.len_utf8();
                chars.next();
            }
            if chars.peek().is_some_and(|&(_, next)| !next.is_whitespace()) {
                continue;
            }
            push_trimmed(slice, paragraph.start, start..end, &mut sentences);
            start = end;
        }
        push_trimmed(slice, paragraph.start, start..slice.len(), &mut sentences);
    }
    sentences
}

fn push_trimmed(slice: &str, offset: usize, range: Range<usize>, out: &mut Vec<Range<usize>>) {
    let s = &slice[range.clone()];
    let trimmed = s.trim_start();
    let lead = s.len() - trimmed.len();
    let trimmed = trimmed.trim_end();
    if !trimmed.is_empty() {
        let start = offset + range.start + lead;
        out.push(start..start + trimmed.len());
    }
}

/// Byte ranges of word and punctuation tokens
pub fn tokenize(text: &str) -> Vec<Range<usize>> {
    crate::regex!(r"\w+|[^\w\s]")
        .find_iter(text)
        .map(|m| m.range())
        .collect()
}
