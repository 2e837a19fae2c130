//! Rule self-tests
//!
//! Rules carry their own examples. An incorrect example marks the span the
//! rule must report with `<marker>...</marker>` and may list the expected
//! corrections; a correct example must not match at all. Disambiguation
//! rules are checked the same way: untouched examples keep every reading,
//! ambiguous examples state the readings of the marked token before and
//! after the rule runs.

use crate::checker::RuleMatch;
use crate::compiler::CompiledRule;
use crate::disambig::{DisambiguationRule, Disambiguator};
use crate::matcher::{MatchEngine, MatchOptions};
use crate::pattern::{DisambiguationExampleDef, ExampleDef, ReadingDef};
use crate::token::{Reading, Sentence};
use crate::tokenizer::Analyzer;
use rustc_hash::FxHashSet;
use std::fmt;
use std::ops::Range;

const MARKER_START: &str = "<marker>";
const MARKER_END: &str = "</marker>";

/// A rule example that did not behave as declared
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExampleFailure {
    pub rule_id: String,
    pub sub_id: String,
    pub example: String,
    pub reason: String,
}

impl fmt::Display for ExampleFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}]: {} in {:?}",
            self.rule_id, self.sub_id, self.reason, self.example
        )
    }
}

/// Remove the marker tags, returning the plain text and the marked byte range
pub fn strip_marker(text: &str) -> (String, Option<Range<usize>>) {
    let Some(open) = text.find(MARKER_START) else {
        return (text.to_string(), None);
    };
    let rest = &text[open + MARKER_START.len()..];
    let Some(close) = rest.find(MARKER_END) else {
        return (text.replacen(MARKER_START, "", 1), None);
    };

    let mut plain = String::with_capacity(text.len());
    plain.push_str(&text[..open]);
    plain.push_str(&rest[..close]);
    plain.push_str(&rest[close + MARKER_END.len()..]);
    (plain, Some(open..open + close))
}

fn to_readings(defs: &[ReadingDef]) -> Vec<Reading> {
    defs.iter()
        .map(|r| Reading {
            lemma: r.lemma.clone(),
            pos: r.pos.clone(),
        })
        .collect()
}

/// Check the examples of grammar rules; disjunctive siblings share theirs
pub fn validate_grammar_examples(
    rules: &[CompiledRule],
    disambiguator: &Disambiguator,
    analyzer: &dyn Analyzer,
    options: MatchOptions,
) -> Vec<ExampleFailure> {
    let mut failures = Vec::new();
    for siblings in rules.chunk_by(|a, b| a.id == b.id && a.sub_id == b.sub_id) {
        let Some(first) = siblings.first() else {
            continue;
        };
        let fail = |example: &str, reason: String| ExampleFailure {
            rule_id: first.id.clone(),
            sub_id: first.sub_id.clone(),
            example: example.to_string(),
            reason,
        };

        for example in &first.examples {
            match example {
                ExampleDef::Incorrect { text, correction } => {
                    let (plain, marker) = strip_marker(text);
                    let Some(marker) = marker else {
                        failures.push(fail(text, "incorrect example has no marker".to_string()));
                        continue;
                    };
                    let matches = match find_all(siblings, disambiguator, analyzer, &plain, options) {
                        Ok(matches) => matches,
                        Err(reason) => {
                            failures.push(fail(text, reason));
                            continue;
                        }
                    };
                    let Some(found) = matches.iter().find(|m| (m.from..m.to) == marker) else {
                        let spans: Vec<_> = matches.iter().map(|m| m.from..m.to).collect();
                        failures.push(fail(
                            text,
                            format!("expected a match at {marker:?}, found {spans:?}"),
                        ));
                        continue;
                    };
                    if let Some(correction) = correction {
                        let missing: Vec<_> = correction
                            .split('|')
                            .filter(|c| !found.suggestions.iter().any(|s| s == c))
                            .collect();
                        if !missing.is_empty() {
                            failures.push(fail(
                                text,
                                format!(
                                    "missing corrections {missing:?}, suggested {:?}",
                                    found.suggestions
                                ),
                            ));
                        }
                    }
                }
                ExampleDef::Correct(text) => {
                    match find_all(siblings, disambiguator, analyzer, text, options) {
                        Ok(matches) if matches.is_empty() => {}
                        Ok(matches) => {
                            let spans: Vec<_> = matches.iter().map(|m| m.from..m.to).collect();
                            failures.push(fail(
                                text,
                                format!("correct example matched at {spans:?}"),
                            ));
                        }
                        Err(reason) => failures.push(fail(text, reason)),
                    }
                }
            }
        }
    }
    failures
}

fn find_all(
    siblings: &[CompiledRule],
    disambiguator: &Disambiguator,
    analyzer: &dyn Analyzer,
    text: &str,
    options: MatchOptions,
) -> Result<Vec<RuleMatch>, String> {
    let mut matches = Vec::new();
    for mut sentence in analyzer.analyze(text) {
        disambiguator.disambiguate(&mut sentence);
        for rule in siblings {
            let found = MatchEngine::new(rule, options)
                .find_matches(&sentence)
                .map_err(|e| e.to_string())?;
            matches.extend(found.iter().map(|m| RuleMatch::new(rule, m, &sentence)));
        }
    }
    Ok(matches)
}

/// Check the examples of disambiguation rules
///
/// Disjunctive siblings share their examples and run in order on the same
/// sentence, so an alternative that does not match is not a failure.
pub fn validate_disambiguation_examples(
    rules: &[DisambiguationRule],
    analyzer: &dyn Analyzer,
    options: MatchOptions,
) -> Vec<ExampleFailure> {
    let mut failures = Vec::new();
    for siblings in rules.chunk_by(|a, b| a.rule.id == b.rule.id && a.rule.sub_id == b.rule.sub_id) {
        let Some(first) = siblings.first() else {
            continue;
        };
        let fail = |example: &str, reason: String| ExampleFailure {
            rule_id: first.rule.id.clone(),
            sub_id: first.rule.sub_id.clone(),
            example: example.to_string(),
            reason,
        };

        for example in &first.examples {
            let result = match example {
                DisambiguationExampleDef::Untouched(text) => check_untouched(siblings, analyzer, text, options)
                    .map_err(|reason| fail(text, reason)),
                DisambiguationExampleDef::Ambiguous {
                    text,
                    input,
                    output,
                } => check_ambiguous(siblings, analyzer, text, input, output, options)
                    .map_err(|reason| fail(text, reason)),
            };
            if let Err(failure) = result {
                failures.push(failure);
            }
        }
    }
    failures
}

fn run_siblings(
    siblings: &[DisambiguationRule],
    sentence: &mut Sentence,
    options: MatchOptions,
) -> Result<(), String> {
    for rule in siblings {
        rule.disambiguate(sentence, options)
            .map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn check_untouched(
    siblings: &[DisambiguationRule],
    analyzer: &dyn Analyzer,
    text: &str,
    options: MatchOptions,
) -> Result<(), String> {
    for mut sentence in analyzer.analyze(text) {
        let before = sentence.clone();
        run_siblings(siblings, &mut sentence, options)?;
        for (old, new) in before.tokens().iter().zip(sentence.tokens()) {
            if old.readings() != new.readings() {
                return Err(format!(
                    "readings of {:?} changed from {:?} to {:?}",
                    old.text,
                    old.readings(),
                    new.readings()
                ));
            }
        }
    }
    Ok(())
}

fn check_ambiguous(
    siblings: &[DisambiguationRule],
    analyzer: &dyn Analyzer,
    text: &str,
    input: &[ReadingDef],
    output: &[ReadingDef],
    options: MatchOptions,
) -> Result<(), String> {
    let (plain, marker) = strip_marker(text);
    let marker = marker.ok_or_else(|| "ambiguous example has no marker".to_string())?;

    let mut sentences = analyzer.analyze(&plain);
    let (sentence, idx) = find_token(&mut sentences, marker.start)
        .ok_or_else(|| format!("no token starts at byte {}", marker.start))?;

    if let Some(token) = sentence.token_mut(idx) {
        token.set_readings(to_readings(input));
    }
    run_siblings(siblings, sentence, options)?;

    let expected: FxHashSet<Reading> = to_readings(output).into_iter().collect();
    let actual: FxHashSet<Reading> = sentence
        .token(idx)
        .map(|t| t.readings().iter().cloned().collect())
        .unwrap_or_default();
    if actual != expected {
        return Err(format!("expected readings {expected:?}, got {actual:?}"));
    }
    Ok(())
}

fn find_token(sentences: &mut [Sentence], start: usize) -> Option<(&mut Sentence, usize)> {
    sentences.iter_mut().find_map(|sentence| {
        let idx = sentence
            .tokens()
            .iter()
            .position(|t| !t.is_sentence_start() && t.start == start)?;
        Some((sentence, idx))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_rules;
    use crate::tagger::ManualTagger;
    use crate::tokenizer::SimpleAnalyzer;

    const DICT: &str = "a\ta\tDT\nwalk\twalk\tNN\nwalk\twalk\tVB\nthey\tthey\tPRP\n";

    fn analyzer() -> SimpleAnalyzer {
        SimpleAnalyzer::with_tagger(ManualTagger::from_data(DICT).unwrap())
    }

    #[test]
    fn test_strip_marker() {
        assert_eq!(
            strip_marker("I could <marker>of</marker> gone."),
            ("I could of gone.".to_string(), Some(8..10))
        );
        assert_eq!(strip_marker("no marker"), ("no marker".to_string(), None));
        assert_eq!(
            strip_marker("<marker></marker>x"),
            ("x".to_string(), Some(0..0))
        );
    }

    #[test]
    fn test_grammar_examples_pass() {
        let rules = load_rules(
            r#"
            rule COULD_OF "could of" {
                pattern { ["could"] marker { ["of"] } }
                message "Did you mean <suggestion>have</suggestion>?";
                example incorrect "I could <marker>of</marker> gone." correction="have";
                example correct "I could have gone.";
            }
            "#,
        )
        .unwrap();
        let failures = validate_grammar_examples(
            &rules.grammar,
            &Disambiguator::default(),
            &SimpleAnalyzer::new(),
            MatchOptions::default(),
        );
        assert!(failures.is_empty(), "{failures:?}");
    }

    #[test]
    fn test_grammar_examples_fail() {
        let rules = load_rules(
            r#"
            rule COULD_OF {
                pattern { ["could"] marker { ["of"] } }
                message "Did you mean <suggestion>have</suggestion>?";
                example incorrect "I <marker>could</marker> of gone.";
                example incorrect "I could <marker>of</marker> gone." correction="have|had";
                example correct "It could of course.";
            }
            "#,
        )
        .unwrap();
        let failures = validate_grammar_examples(
            &rules.grammar,
            &Disambiguator::default(),
            &SimpleAnalyzer::new(),
            MatchOptions::default(),
        );
        assert_eq!(failures.len(), 3);
        assert!(failures[0].reason.starts_with("expected a match at 2..7"));
        assert!(failures[1].reason.contains("\"had\""));
        assert!(failures[2].reason.starts_with("correct example matched"));
        assert_eq!(failures[0].rule_id, "COULD_OF");
    }

    #[test]
    fn test_disambiguation_siblings_share_examples() {
        let rules = load_rules(
            r#"
            phrase ART { ["a"] | ["the"] }
            disambig WALK {
                pattern { @ART marker { ["walk"] } }
                action filter pos="NN";
                example ambiguous "a <marker>walk</marker>" in="walk/NN|walk/VB" out="walk/NN";
                example ambiguous "the <marker>walk</marker>" in="walk/NN|walk/VB" out="walk/NN";
                example untouched "they walk";
            }
            "#,
        )
        .unwrap();
        assert_eq!(rules.disambiguation.len(), 2);
        let failures =
            validate_disambiguation_examples(&rules.disambiguation, &analyzer(), MatchOptions::default());
        assert!(failures.is_empty(), "{failures:?}");
    }

    #[test]
    fn test_disambiguation_examples() {
        let rules = load_rules(
            r#"
            disambig WALK_NOUN "noun after article" {
                pattern { [pos="DT"] marker { ["walk"] } }
                action filter pos="NN";
                example untouched "they walk";
                example ambiguous "a <marker>walk</marker>" in="walk/NN|walk/VB" out="walk/NN";
            }
            disambig BROKEN {
                pattern { [pos="DT"] marker { ["walk"] } }
                action filter pos="NN";
                example untouched "a walk";
                example ambiguous "a <marker>walk</marker>" in="walk/NN|walk/VB" out="walk/VB";
            }
            "#,
        )
        .unwrap();
        let failures =
            validate_disambiguation_examples(&rules.disambiguation, &analyzer(), MatchOptions::default());
        assert_eq!(failures.len(), 2, "{failures:?}");
        assert!(failures.iter().all(|f| f.rule_id == "BROKEN"));
        assert!(failures[0].reason.starts_with("readings of \"walk\" changed"));
    }
}
