//! Uppercase sentence start check
//!
//! A sentence should start with an uppercase letter, except when the
//! previous sentence ended in `:`, `;` or `,`; such "sentences" are list
//! items split off by blank lines.

use crate::checker::{RuleMatch, TextLevelRule};
use crate::compiler::CompiledRule;
use crate::loader::{LoadError, load_rules};
use crate::matcher::{MatchEngine, MatchError, MatchOptions};
use crate::parser::ParseError;
use crate::pattern::SourceLocation;
use crate::token::Sentence;
use tracing::warn;

pub const RULE_ID: &str = "UPPERCASE_SENTENCE_START";

const RULE_SOURCE: &str = r#"
rule UPPERCASE_SENTENCE_START "Checks that a sentence starts with an uppercase letter" {
    pattern case { [pos="SENT_START"] marker { [text~"\p{Ll}.*"] } }
    message "This sentence does not start with an uppercase letter.";
    suggestion "<match no='2' case='start_upper'/>";
}
"#;

fn continues_previous(previous: &Sentence) -> bool {
    previous
        .last_word()
        .is_some_and(|t| matches!(t.text.as_str(), ":" | ";" | ","))
}

#[derive(Debug, Clone)]
pub struct UppercaseSentenceStartRule {
    rule: CompiledRule,
    options: MatchOptions,
}

impl UppercaseSentenceStartRule {
    pub fn new() -> Result<Self, LoadError> {
        Self::with_options(MatchOptions::default())
    }

    pub fn with_options(options: MatchOptions) -> Result<Self, LoadError> {
        let Some(rule) = load_rules(RULE_SOURCE)?.grammar.pop() else {
            return Err(LoadError::Parse(ParseError::Invalid {
                location: SourceLocation::new(1, 1),
                message: format!("{RULE_ID} is missing"),
            }));
        };
        Ok(Self { rule, options })
    }

    pub fn rule(&self) -> &CompiledRule {
        &self.rule
    }

    /// Check one sentence given the one before it
    pub fn match_sentence(
        &self,
        sentence: &Sentence,
        previous: Option<&Sentence>,
    ) -> Result<Vec<RuleMatch>, MatchError> {
        if previous.is_some_and(continues_previous) {
            return Ok(Vec::new());
        }
        let matches = MatchEngine::new(&self.rule, self.options).find_matches(sentence)?;
        Ok(matches
            .iter()
            .map(|m| RuleMatch::new(&self.rule, m, sentence))
            .collect())
    }
}

impl TextLevelRule for UppercaseSentenceStartRule {
    fn id(&self) -> &str {
        RULE_ID
    }

    fn match_text(&self, sentences: &[Sentence]) -> Vec<RuleMatch> {
        let mut matches = Vec::new();
        let mut previous = None;
        for sentence in sentences {
            match self.match_sentence(sentence, previous) {
                Ok(found) => matches.extend(found),
                Err(e) => warn!(rule = RULE_ID, error = %e, "sentence start check failed"),
            }
            previous = Some(sentence);
        }
        matches
    }
}
