//! Disambiguation
//!
//! Disambiguation rules match like grammar rules but, instead of reporting,
//! rewrite the readings or flags of the tokens under their marker. Rules run
//! in order and each sees the sentence as left by the rules before it.

use crate::compiler::CompiledRule;
use crate::element::StringMatcher;
use crate::matcher::{MatchEngine, MatchError, MatchOptions, MatchResult, can_be_ignored};
use crate::pattern::DisambiguationExampleDef;
use crate::reference::Reference;
use crate::token::{Reading, Sentence};
use tracing::{debug, warn};

/// Readings removed by a REMOVE action
#[derive(Debug, Clone, PartialEq)]
pub enum RemoveTarget {
    /// One reading per marked token; missing lemma or tag match anything
    PerToken(Vec<Reading>),
    /// Every reading matching the lemma and tag, on every marked token
    Matching {
        lemma: Option<String>,
        pos: Option<StringMatcher>,
    },
}

impl RemoveTarget {
    fn removes(&self, filter: Option<&Reading>, reading: &Reading) -> bool {
        match (self, filter) {
            (RemoveTarget::PerToken(_), Some(filter)) => {
                filter.lemma.as_ref().is_none_or(|l| reading.lemma.as_ref() == Some(l))
                    && filter.pos.as_ref().is_none_or(|p| reading.pos.as_ref() == Some(p))
            }
            (RemoveTarget::PerToken(_), None) => false,
            (RemoveTarget::Matching { lemma, pos }, _) => {
                lemma.as_deref().is_none_or(|l| reading.lemma() == Some(l))
                    && pos
                        .as_ref()
                        .is_none_or(|p| reading.pos().is_some_and(|tag| p.is_match(tag, true)))
            }
        }
    }
}

/// What a disambiguation rule does to the marked tokens
#[derive(Debug, Clone, PartialEq)]
pub enum DisambiguationAction {
    /// Replace the readings with one new reading per token; with no
    /// readings, keep the first lemma under the given tag
    Replace {
        readings: Vec<Reading>,
        pos: Option<String>,
    },
    /// Add one reading per token
    Add(Vec<Reading>),
    Remove(RemoveTarget),
    /// Keep only readings passing the reference's POS filter
    Filter(Reference),
    /// Check that every marked token took part in unification; readings
    /// are left as they are
    Unify,
    Immunize,
    IgnoreSpelling,
}

impl DisambiguationAction {
    pub fn name(&self) -> &'static str {
        match self {
            DisambiguationAction::Replace { .. } => "replace",
            DisambiguationAction::Add(_) => "add",
            DisambiguationAction::Remove(_) => "remove",
            DisambiguationAction::Filter(_) => "filter",
            DisambiguationAction::Unify => "unify",
            DisambiguationAction::Immunize => "immunize",
            DisambiguationAction::IgnoreSpelling => "ignore_spelling",
        }
    }
}

/// A compiled pattern plus the action applied to its marker
#[derive(Debug, Clone)]
pub struct DisambiguationRule {
    pub rule: CompiledRule,
    pub action: DisambiguationAction,
    pub examples: Vec<DisambiguationExampleDef>,
}

impl DisambiguationRule {
    /// Find all matches, then apply the action to each
    ///
    /// Returns the number of matches applied.
    pub fn disambiguate(&self, sentence: &mut Sentence, options: MatchOptions) -> Result<usize, MatchError> {
        let matches = MatchEngine::new(&self.rule, options).find_matches(sentence)?;
        for m in &matches {
            self.apply(sentence, m)?;
        }
        Ok(matches.len())
    }

    /// Apply the action to the marker span of one match
    pub fn apply(&self, sentence: &mut Sentence, m: &MatchResult) -> Result<(), MatchError> {
        let span = m.range.clone();
        let expect = |expected: usize| {
            if span.len() == expected {
                Ok(())
            } else {
                Err(MatchError::SpanMismatch {
                    action: self.action.name(),
                    expected,
                    found: span.len(),
                })
            }
        };

        match &self.action {
            DisambiguationAction::Replace { readings, pos } if readings.is_empty() => {
                expect(1)?;
                if let Some(token) = sentence.token_mut(span.start) {
                    let reading = match pos {
                        Some(pos) => Reading {
                            lemma: token.readings().first().and_then(|r| r.lemma.clone()),
                            pos: Some(pos.clone()),
                        },
                        None => Reading::untagged(),
                    };
                    token.set_readings(vec![reading]);
                }
            }
            DisambiguationAction::Replace { readings, .. } => {
                expect(readings.len())?;
                for (i, reading) in span.zip(readings) {
                    if let Some(token) = sentence.token_mut(i) {
                        token.set_readings(vec![reading.clone()]);
                    }
                }
            }
            DisambiguationAction::Add(readings) => {
                expect(readings.len())?;
                for (i, reading) in span.zip(readings) {
                    if let Some(token) = sentence.token_mut(i) {
                        token.add_reading(reading.clone());
                    }
                }
            }
            DisambiguationAction::Remove(target @ RemoveTarget::PerToken(readings)) => {
                expect(readings.len())?;
                for (i, filter) in span.zip(readings) {
                    if let Some(token) = sentence.token_mut(i) {
                        token.remove_readings(|r| target.removes(Some(filter), r));
                    }
                }
            }
            DisambiguationAction::Remove(target) => {
                for i in span {
                    if let Some(token) = sentence.token_mut(i) {
                        token.remove_readings(|r| target.removes(None, r));
                    }
                }
            }
            DisambiguationAction::Filter(reference) => {
                expect(1)?;
                if let Some(token) = sentence.token_mut(span.start) {
                    let kept = reference.filter_readings(token);
                    token.set_readings(kept);
                }
            }
            DisambiguationAction::Unify => {
                if m.marker_unified_tokens != span.len() {
                    return Err(MatchError::SpanMismatch {
                        action: "unify",
                        expected: span.len(),
                        found: m.marker_unified_tokens,
                    });
                }
            }
            DisambiguationAction::Immunize => {
                for i in span {
                    if let Some(token) = sentence.token_mut(i) {
                        token.immunized = true;
                    }
                }
            }
            DisambiguationAction::IgnoreSpelling => {
                for i in span {
                    if let Some(token) = sentence.token_mut(i) {
                        token.ignore_spelling = true;
                        token.misspelled = false;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Runs an ordered list of disambiguation rules over sentences
#[derive(Debug, Clone, Default)]
pub struct Disambiguator {
    rules: Vec<DisambiguationRule>,
    options: MatchOptions,
}

impl Disambiguator {
    pub fn new(rules: Vec<DisambiguationRule>, options: MatchOptions) -> Self {
        Self { rules, options }
    }

    pub fn rules(&self) -> &[DisambiguationRule] {
        &self.rules
    }

    /// Apply every rule in order
    ///
    /// A rule that fails at runtime is logged and skipped; the sentence keeps
    /// whatever earlier matches of that rule already changed.
    pub fn disambiguate(&self, sentence: &mut Sentence) {
        for rule in &self.rules {
            if can_be_ignored(&rule.rule, sentence) {
                continue;
            }
            match rule.disambiguate(sentence, self.options) {
                Ok(0) => {}
                Ok(applied) => {
                    debug!(rule = %rule.rule.full_id(), applied, "disambiguation applied");
                }
                Err(e) => {
                    warn!(rule = %rule.rule.full_id(), error = %e, "disambiguation rule failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::RuleCompiler;
    use crate::parser::parse_rules;
    use crate::token::Token;

    fn rules(source: &str) -> Vec<DisambiguationRule> {
        let file = parse_rules(source).unwrap();
        let compiler = RuleCompiler::new(&file).unwrap();
        file.disambiguations
            .iter()
            .flat_map(|d| compiler.compile_disambiguation(d).unwrap())
            .collect()
    }

    fn ambiguous_walk() -> Sentence {
        Sentence::new(vec![
            Token::sentence_start(),
            Token::tagged("a", "a", "DT"),
            Token::new("walk", vec![Reading::new("walk", "NN"), Reading::new("walk", "VB")]),
        ])
    }

    fn tags(sentence: &Sentence, i: usize) -> Vec<&str> {
        sentence.tokens()[i]
            .readings()
            .iter()
            .filter_map(|r| r.pos())
            .collect()
    }

    #[test]
    fn test_replace() {
        let rules = rules(
            r#"disambig D { pattern { [pos="DT"] marker { ["walk"] } } action replace; wd lemma="walk" pos="NN"; }"#,
        );
        let mut sentence = ambiguous_walk();
        assert_eq!(rules[0].disambiguate(&mut sentence, MatchOptions::default()), Ok(1));
        assert_eq!(tags(&sentence, 2), vec!["NN"]);
    }

    #[test]
    fn test_replace_without_readings_keeps_lemma() {
        let rules = rules(r#"disambig D { pattern { [pos="DT"] marker { ["walk"] } } action replace pos="NN"; }"#);
        let mut sentence = ambiguous_walk();
        rules[0].disambiguate(&mut sentence, MatchOptions::default()).unwrap();
        assert_eq!(sentence.tokens()[2].readings(), &[Reading::new("walk", "NN")]);
    }

    #[test]
    fn test_add_and_remove() {
        let add = rules(r#"disambig D { pattern { ["a"] } action add; wd lemma="a" pos="LS"; }"#);
        let mut sentence = ambiguous_walk();
        add[0].disambiguate(&mut sentence, MatchOptions::default()).unwrap();
        assert_eq!(tags(&sentence, 1), vec!["DT", "LS"]);

        let remove = rules(r#"disambig D { pattern { [pos="DT"] marker { ["walk"] } } action remove pos="VB"; }"#);
        remove[0].disambiguate(&mut sentence, MatchOptions::default()).unwrap();
        assert_eq!(tags(&sentence, 2), vec!["NN"]);

        // the last reading is never removed
        let remove_all = rules(r#"disambig D { pattern { ["walk"] } action remove pos~".*"; }"#);
        remove_all[0].disambiguate(&mut sentence, MatchOptions::default()).unwrap();
        assert_eq!(tags(&sentence, 2), vec!["NN"]);
    }

    #[test]
    fn test_remove_per_token() {
        let rules = rules(r#"disambig D { pattern { ["walk"] } action remove; wd pos="VB"; }"#);
        let mut sentence = ambiguous_walk();
        rules[0].disambiguate(&mut sentence, MatchOptions::default()).unwrap();
        assert_eq!(tags(&sentence, 2), vec!["NN"]);
    }

    #[test]
    fn test_filter() {
        let rules = rules(r#"disambig D { pattern { [pos="DT"] marker { ["walk"] } } action filter pos~"N.*"; }"#);
        let mut sentence = ambiguous_walk();
        rules[0].disambiguate(&mut sentence, MatchOptions::default()).unwrap();
        assert_eq!(tags(&sentence, 2), vec!["NN"]);

        // no surviving reading leaves the token unchanged
        let none = super::tests::rules(r#"disambig D { pattern { ["walk"] } action filter pos="JJ"; }"#);
        let mut sentence = ambiguous_walk();
        none[0].disambiguate(&mut sentence, MatchOptions::default()).unwrap();
        assert_eq!(tags(&sentence, 2), vec!["NN", "VB"]);
    }

    #[test]
    fn test_flags() {
        let rules = rules(
            r#"
            disambig I { pattern { ["a"] } action immunize; }
            disambig S { pattern { ["walk"] } action ignore_spelling; }
            "#,
        );
        let mut sentence = ambiguous_walk();
        sentence.token_mut(2).unwrap().misspelled = true;
        Disambiguator::new(rules, MatchOptions::default()).disambiguate(&mut sentence);
        assert!(sentence.tokens()[1].immunized);
        assert!(sentence.tokens()[2].ignore_spelling);
        assert!(!sentence.tokens()[2].misspelled);
    }

    #[test]
    fn test_runtime_count_mismatch_is_skipped() {
        let rules = rules(r#"disambig D { pattern { marker { [pos~"DT|NN|VB", max=2] } } action replace; wd pos="X"; }"#);
        let mut sentence = ambiguous_walk();
        assert_eq!(
            rules[0].disambiguate(&mut sentence, MatchOptions::default()),
            Err(MatchError::SpanMismatch {
                action: "replace",
                expected: 1,
                found: 2
            })
        );

        let mut sentence = ambiguous_walk();
        Disambiguator::new(rules, MatchOptions::default()).disambiguate(&mut sentence);
        assert_eq!(tags(&sentence, 2), vec!["NN", "VB"]);
    }

    #[test]
    fn test_unify_leaves_readings() {
        let rules = rules(
            r#"
            unification number { sg = pos~".*:sg"; pl = pos~".*:pl"; }
            disambig U { pattern { marker { unify(number) { [pos~"DT.*"] [pos~"NN.*"] } } } action unify; }
            "#,
        );
        let mut sentence = Sentence::new(vec![
            Token::sentence_start(),
            Token::tagged("these", "this", "DT:pl"),
            Token::new("sheep", vec![Reading::new("sheep", "NN:sg"), Reading::new("sheep", "NN:pl")]),
        ]);
        assert_eq!(rules[0].disambiguate(&mut sentence, MatchOptions::default()), Ok(1));
        assert_eq!(tags(&sentence, 2), vec!["NN:sg", "NN:pl"]);
    }

    #[test]
    fn test_unify_counts_only_marker_tokens() {
        let rules = rules(
            r#"
            unification number { sg = pos~".*:sg"; pl = pos~".*:pl"; }
            disambig U {
                pattern { unify(number) { [pos~"DT.*"] } marker { unify(number) { [pos~"NN.*"] } } }
                action unify;
            }
            "#,
        );
        let mut sentence = Sentence::new(vec![
            Token::sentence_start(),
            Token::tagged("these", "this", "DT:pl"),
            Token::new("sheep", vec![Reading::new("sheep", "NN:sg"), Reading::new("sheep", "NN:pl")]),
        ]);
        let matches = MatchEngine::new(&rules[0].rule, MatchOptions::default())
            .find_matches(&sentence)
            .unwrap();
        assert_eq!(matches[0].unified_tokens, 2);
        assert_eq!(matches[0].marker_unified_tokens, 1);
        assert_eq!(rules[0].disambiguate(&mut sentence, MatchOptions::default()), Ok(1));
    }

    #[test]
    fn test_rules_run_in_order() {
        let rules = rules(
            r#"
            disambig FIRST { pattern { [pos="DT"] marker { ["walk"] } } action filter pos="NN"; }
            disambig SECOND { pattern { [pos="VB"] } action immunize; }
            "#,
        );
        let mut sentence = ambiguous_walk();
        Disambiguator::new(rules, MatchOptions::default()).disambiguate(&mut sentence);
        assert_eq!(tags(&sentence, 2), vec!["NN"]);
        assert!(!sentence.tokens()[2].immunized);
    }
}
