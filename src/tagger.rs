//! Dictionary-backed POS tagger
//!
//! Reads tab-separated `form<TAB>lemma<TAB>tag` lines (plain or gzip) and
//! assigns every known form all of its readings, in file order. Lemmas and
//! tags repeat heavily, so they are interned.

use crate::token::{Reading, Token};
use flate2::read::GzDecoder;
use lasso::{Rodeo, RodeoReader, Spur};
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use thiserror::Error;

/// Error type for dictionary loading
#[derive(Debug, Error)]
pub enum TaggerError {
    #[error("Dictionary I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed dictionary line {line}: {content:?}")]
    MalformedLine { line: usize, content: String },
}

/// Tagger with a fixed form → readings table
#[derive(Debug)]
pub struct ManualTagger {
    strings: RodeoReader<Spur>,
    /// Form → (lemma, tag) pairs in dictionary order
    entries: FxHashMap<String, Vec<(Spur, Spur)>>,
}

impl ManualTagger {
    /// Load a dictionary from any buffered reader
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, TaggerError> {
        let mut rodeo = Rodeo::default();
        let mut entries: FxHashMap<String, Vec<(Spur, Spur)>> = FxHashMap::default();

        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim_end_matches(['\r', '\n']);
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split('\t');
            let (Some(form), Some(lemma), Some(tag), None) =
                (fields.next(), fields.next(), fields.next(), fields.next())
            else {
                return Err(TaggerError::MalformedLine {
                    line: i + 1,
                    content: line.to_string(),
                });
            };
            let reading = (rodeo.get_or_intern(lemma), rodeo.get_or_intern(tag));
            let readings = entries.entry(form.to_string()).or_default();
            if !readings.contains(&reading) {
                readings.push(reading);
            }
        }

        Ok(Self {
            strings: rodeo.into_reader(),
            entries,
        })
    }

    /// Load a dictionary held in memory
    pub fn from_data(data: &str) -> Result<Self, TaggerError> {
        Self::from_reader(data.as_bytes())
    }

    /// Load a dictionary file; `.gz` files are decompressed
    pub fn from_path(path: &Path) -> Result<Self, TaggerError> {
        let file = File::open(path)?;
        let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Self::from_reader(BufReader::new(reader))
    }

    /// Number of distinct forms
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Readings of `form`, empty if unknown
    pub fn lookup(&self, form: &str) -> Vec<Reading> {
        self.entries
            .get(form)
            .map(|readings| {
                readings
                    .iter()
                    .map(|(lemma, tag)| Reading {
                        lemma: Some(self.strings.resolve(lemma).to_string()),
                        pos: Some(self.strings.resolve(tag).to_string()),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Readings of `word`, falling back to its lowercase form
    pub fn lookup_word(&self, word: &str) -> Vec<Reading> {
        let readings = self.lookup(word);
        if !readings.is_empty() {
            return readings;
        }
        let lower = crate::token::lowercase(word);
        if lower != word {
            self.lookup(&lower)
        } else {
            readings
        }
    }

    /// Tag a list of words; unknown words get one untagged reading
    pub fn tag(&self, words: &[&str]) -> Vec<Token> {
        words
            .iter()
            .map(|word| Token::new(word, self.lookup_word(word)))
            .collect()
    }
}
