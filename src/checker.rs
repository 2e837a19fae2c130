//! Checking text against a rule set
//!
//! The [`Checker`] runs the full pipeline over text: analysis, ordered
//! disambiguation, then every grammar rule on every sentence, followed by
//! text-level rules that need to see more than one sentence.

use crate::compiler::CompiledRule;
use crate::disambig::Disambiguator;
use crate::loader::RuleSet;
use crate::matcher::{MatchEngine, MatchOptions, MatchResult, can_be_ignored};
use crate::token::Sentence;
use crate::tokenizer::Analyzer;
use std::ops::Range;
use tracing::{debug, warn};

/// A rule match reported to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub rule_id: String,
    pub sub_id: String,
    pub message: String,
    pub short_message: Option<String>,
    pub suggestions: Vec<String>,
    /// Token indices in the sentence
    pub tokens: Range<usize>,
    /// Byte offsets in the analyzed text
    pub from: usize,
    pub to: usize,
}

impl RuleMatch {
    pub fn new(rule: &CompiledRule, m: &MatchResult, sentence: &Sentence) -> Self {
        let (from, to) = byte_span(sentence, m.range.clone());
        Self {
            rule_id: rule.id.clone(),
            sub_id: rule.sub_id.clone(),
            message: m.message.clone(),
            short_message: m.short_message.clone(),
            suggestions: m.suggestions.clone(),
            tokens: m.range.clone(),
            from,
            to,
        }
    }
}

fn byte_span(sentence: &Sentence, tokens: Range<usize>) -> (usize, usize) {
    let first = sentence.token(tokens.start);
    let from = first.map_or(0, |t| t.start);
    let to = tokens
        .end
        .checked_sub(1)
        .filter(|_| !tokens.is_empty())
        .and_then(|i| sentence.token(i))
        .map_or(from, |t| t.end());
    (from, to)
}

/// A rule that looks at a whole text rather than one sentence
pub trait TextLevelRule: Send + Sync {
    fn id(&self) -> &str;

    fn match_text(&self, sentences: &[Sentence]) -> Vec<RuleMatch>;
}

/// Checker settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckerOptions {
    pub match_options: MatchOptions,
    /// Drop matches that cover a token immunized by disambiguation
    pub skip_immunized: bool,
}

impl Default for CheckerOptions {
    fn default() -> Self {
        Self {
            match_options: MatchOptions::default(),
            skip_immunized: true,
        }
    }
}

/// Applies a rule set to text
pub struct Checker {
    rules: Vec<CompiledRule>,
    disambiguator: Disambiguator,
    text_rules: Vec<Box<dyn TextLevelRule>>,
    options: CheckerOptions,
}

impl Checker {
    pub fn new(rule_set: RuleSet, options: CheckerOptions) -> Self {
        Self {
            rules: rule_set.grammar,
            disambiguator: Disambiguator::new(rule_set.disambiguation, options.match_options),
            text_rules: Vec::new(),
            options,
        }
    }

    pub fn with_text_rule(mut self, rule: impl TextLevelRule + 'static) -> Self {
        self.text_rules.push(Box::new(rule));
        self
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn disambiguator(&self) -> &Disambiguator {
        &self.disambiguator
    }

    /// Run every grammar rule on an already disambiguated sentence
    pub fn check_sentence(&self, sentence: &Sentence) -> Vec<RuleMatch> {
        let mut matches: Vec<RuleMatch> = Vec::new();
        for rule in &self.rules {
            if can_be_ignored(rule, sentence) {
                debug!(rule = %rule.full_id(), "skipped by fast-reject");
                continue;
            }
            let found = match MatchEngine::new(rule, self.options.match_options).find_matches(sentence) {
                Ok(found) => found,
                Err(e) => {
                    warn!(rule = %rule.full_id(), error = %e, "rule failed");
                    continue;
                }
            };
            for m in found {
                if self.options.skip_immunized
                    && sentence.tokens()[m.range.clone()].iter().any(|t| t.immunized)
                {
                    continue;
                }
                let rule_match = RuleMatch::new(rule, &m, sentence);
                // disjunctive siblings may find the same span
                if !matches.iter().any(|other| {
                    other.rule_id == rule_match.rule_id
                        && other.sub_id == rule_match.sub_id
                        && other.tokens == rule_match.tokens
                }) {
                    matches.push(rule_match);
                }
            }
        }
        matches
    }

    /// Analyze, disambiguate and check a text
    pub fn check_text(&self, analyzer: &dyn Analyzer, text: &str) -> Vec<RuleMatch> {
        let mut sentences = analyzer.analyze(text);
        let mut matches = Vec::new();
        for sentence in &mut sentences {
            self.disambiguator.disambiguate(sentence);
            matches.extend(self.check_sentence(sentence));
        }
        for rule in &self.text_rules {
            matches.extend(rule.match_text(&sentences));
        }
        matches.sort_by_key(|m| (m.from, m.to));
        matches
    }
}
