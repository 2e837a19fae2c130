//! Compiled pattern elements
//!
//! A [`PatternElement`] is one executable matching condition for a pattern
//! position: a primary token condition, AND-ed sibling conditions,
//! exceptions, occurrence bounds and the skip gap that follows it.

use crate::pattern::{Bound, ExceptionScope};
use crate::reference::{Bindings, Reference};
use crate::token::{Reading, Sentence, Token, eq_lowercase, lowercase};
use crate::unify::UnifySpec;
use regex::Regex;
use std::fmt::Debug;

/// Value in a condition: either a literal string or a regex pattern
///
/// Literals are stored lowercase when the condition is case-insensitive.
/// Regexes are anchored at both ends.
#[derive(Clone)]
pub enum StringMatcher {
    Literal(String),
    Regex(String, Regex), // Pattern string + compiled regex
}

impl StringMatcher {
    /// Build a literal matcher
    pub fn literal(value: &str, case_sensitive: bool) -> Self {
        if case_sensitive {
            StringMatcher::Literal(value.to_string())
        } else {
            StringMatcher::Literal(lowercase(value))
        }
    }

    /// Build an anchored regex matcher
    pub fn regex(pattern: &str, case_sensitive: bool) -> Result<Self, regex::Error> {
        let anchored = if case_sensitive {
            format!("^(?:{pattern})$")
        } else {
            format!("(?i)^(?:{pattern})$")
        };
        Ok(StringMatcher::Regex(pattern.to_string(), Regex::new(&anchored)?))
    }

    pub fn is_match(&self, s: &str, case_sensitive: bool) -> bool {
        match self {
            StringMatcher::Literal(lit) if case_sensitive => s == lit,
            StringMatcher::Literal(lit) => eq_lowercase(s, lit),
            StringMatcher::Regex(_, re) => re.is_match(s),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            StringMatcher::Literal(s) | StringMatcher::Regex(s, _) => s,
        }
    }

    pub fn is_regex(&self) -> bool {
        matches!(self, StringMatcher::Regex(_, _))
    }
}

// Manual Debug implementation
impl Debug for StringMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StringMatcher::Literal(s) => f.debug_tuple("Literal").field(s).finish(),
            StringMatcher::Regex(pattern, _) => f.debug_tuple("Regex").field(pattern).finish(),
        }
    }
}

// Manual PartialEq implementation (compare pattern strings, not compiled regex)
impl PartialEq for StringMatcher {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (StringMatcher::Literal(a), StringMatcher::Literal(b)) => a == b,
            (StringMatcher::Regex(a, _), StringMatcher::Regex(b, _)) => a == b,
            _ => false,
        }
    }
}

/// Conditions evaluated against a single token
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TokenCondition {
    /// Surface text, or lemma when `inflected`
    pub text: Option<StringMatcher>,
    pub inflected: bool,
    pub pos: Option<StringMatcher>,
    pub negate_pos: bool,
    pub negate: bool,
    pub case_sensitive: bool,
    pub space_before: Option<bool>,
    /// Surface text must equal the resolved text of an earlier position
    pub reference: Option<Reference>,
}

impl TokenCondition {
    /// Does the condition hold for `token`?
    ///
    /// Lemma and POS conditions must be satisfied by the same reading. A
    /// negated POS condition holds only if no reading carries the tag.
    pub fn is_match(&self, token: &Token, bindings: Option<&Bindings>) -> bool {
        self.evaluate(token, bindings) != self.negate
    }

    fn evaluate(&self, token: &Token, bindings: Option<&Bindings>) -> bool {
        if let Some(space) = self.space_before
            && token.whitespace_before != space
        {
            return false;
        }

        if let Some(reference) = &self.reference {
            let resolved = bindings.and_then(|b| reference.resolve(b));
            let Some(resolved) = resolved else {
                return false;
            };
            let same = if self.case_sensitive {
                token.text == resolved
            } else {
                eq_lowercase(&token.text, &lowercase(&resolved))
            };
            if !same {
                return false;
            }
        }

        if !self.inflected
            && let Some(text) = &self.text
            && !text.is_match(&token.text, self.case_sensitive)
        {
            return false;
        }

        let lemma_ok = |r: &Reading| match (&self.text, self.inflected) {
            (Some(text), true) => r
                .lemma()
                .is_some_and(|lemma| text.is_match(lemma, self.case_sensitive)),
            _ => true,
        };
        let pos_match = |r: &Reading| match &self.pos {
            Some(pos) => r.pos().is_some_and(|tag| pos.is_match(tag, true)),
            None => true,
        };

        let readings = token.readings();
        if self.pos.is_some() && self.negate_pos {
            readings.iter().any(lemma_ok) && !readings.iter().any(pos_match)
        } else {
            readings.iter().any(|r| lemma_ok(r) && pos_match(r))
        }
    }

    /// The lowercase literal this condition requires to be present in a
    /// sentence, if any; `(value, inflected)`
    pub fn required_literal(&self) -> Option<(String, bool)> {
        if self.negate || self.reference.is_some() {
            return None;
        }
        match &self.text {
            Some(StringMatcher::Literal(lit)) => Some((lowercase(lit), self.inflected)),
            _ => None,
        }
    }
}

/// An exception: a condition that, when it holds, vetoes the element
#[derive(Debug, Clone, PartialEq)]
pub struct Exception {
    pub condition: TokenCondition,
    pub scope: ExceptionScope,
}

/// One compiled pattern element
#[derive(Debug, Clone, PartialEq)]
pub struct PatternElement {
    pub condition: TokenCondition,
    pub and_group: Vec<TokenCondition>,
    pub exceptions: Vec<Exception>,
    pub min: usize,
    pub max: Bound,
    /// Tokens that may be passed over before the next element
    pub skip_next: Bound,
    pub unify: Option<UnifySpec>,
    /// 0-based declared pattern position this element belongs to
    pub position: usize,
}

impl PatternElement {
    pub fn new(condition: TokenCondition) -> Self {
        Self {
            condition,
            and_group: Vec::new(),
            exceptions: Vec::new(),
            min: 1,
            max: Bound::Limited(1),
            skip_next: Bound::Limited(0),
            unify: None,
            position: 0,
        }
    }

    /// Does the token at `idx` satisfy this element?
    ///
    /// Checks the primary condition, the AND group, and current/previous
    /// scope exceptions. Exceptions win over negation.
    pub fn matches_at(&self, sentence: &Sentence, idx: usize, bindings: Option<&Bindings>) -> bool {
        let Some(token) = sentence.token(idx) else {
            return false;
        };

        if !self.condition.is_match(token, bindings)
            || !self.and_group.iter().all(|c| c.is_match(token, bindings))
        {
            return false;
        }

        for exception in &self.exceptions {
            let vetoed = match exception.scope {
                ExceptionScope::Current => exception.condition.is_match(token, bindings),
                ExceptionScope::Previous => idx
                    .checked_sub(1)
                    .and_then(|i| sentence.token(i))
                    .is_some_and(|prev| exception.condition.is_match(prev, bindings)),
                ExceptionScope::Next => false,
            };
            if vetoed {
                return false;
            }
        }

        true
    }

    /// Is the token at `idx` vetoed by one of this element's next-scope
    /// exceptions?
    pub fn next_exception_at(&self, sentence: &Sentence, idx: usize, bindings: Option<&Bindings>) -> bool {
        let Some(token) = sentence.token(idx) else {
            return false;
        };
        self.exceptions
            .iter()
            .filter(|e| e.scope == ExceptionScope::Next)
            .any(|e| e.condition.is_match(token, bindings))
    }

    pub fn has_next_exceptions(&self) -> bool {
        self.exceptions.iter().any(|e| e.scope == ExceptionScope::Next)
    }

    /// Does any condition of this element resolve a backreference?
    pub fn has_references(&self) -> bool {
        self.condition.reference.is_some()
            || self.and_group.iter().any(|c| c.reference.is_some())
            || self.exceptions.iter().any(|e| e.condition.reference.is_some())
    }

    /// Literal this element contributes to the fast-reject sets
    ///
    /// Only unconditionally required literals qualify: not negated, not a
    /// regex, not a backreference, and `min > 0`.
    pub fn fast_reject_literal(&self) -> Option<(String, bool)> {
        if self.min == 0 {
            return None;
        }
        self.condition.required_literal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Reading;

    fn text_condition(text: &str) -> TokenCondition {
        TokenCondition {
            text: Some(StringMatcher::literal(text, false)),
            ..TokenCondition::default()
        }
    }

    #[test]
    fn test_literal_case_handling() {
        let token = Token::tagged("The", "the", "DT");
        assert!(text_condition("the").is_match(&token, None));

        let strict = TokenCondition {
            text: Some(StringMatcher::literal("the", true)),
            case_sensitive: true,
            ..TokenCondition::default()
        };
        assert!(!strict.is_match(&token, None));
    }

    #[test]
    fn test_regex_is_anchored() {
        let condition = TokenCondition {
            text: Some(StringMatcher::regex("cat|dog", false).unwrap()),
            ..TokenCondition::default()
        };
        assert!(condition.is_match(&Token::tagged("Dog", "dog", "NN"), None));
        assert!(!condition.is_match(&Token::tagged("dogs", "dog", "NNS"), None));
    }

    #[test]
    fn test_lemma_and_pos_on_same_reading() {
        let token = Token::new(
            "saw",
            vec![Reading::new("see", "VBD"), Reading::new("saw", "NN")],
        );
        let condition = TokenCondition {
            text: Some(StringMatcher::literal("see", false)),
            inflected: true,
            pos: Some(StringMatcher::literal("NN", true)),
            ..TokenCondition::default()
        };
        assert!(!condition.is_match(&token, None));

        let condition = TokenCondition {
            pos: Some(StringMatcher::literal("VBD", true)),
            ..condition
        };
        assert!(condition.is_match(&token, None));
    }

    #[test]
    fn test_negations() {
        let token = Token::new("run", vec![Reading::new("run", "VB"), Reading::new("run", "NN")]);
        let not_nn = TokenCondition {
            pos: Some(StringMatcher::literal("NN", true)),
            negate_pos: true,
            ..TokenCondition::default()
        };
        assert!(!not_nn.is_match(&token, None));

        let not_run = TokenCondition {
            negate: true,
            ..text_condition("run")
        };
        assert!(!not_run.is_match(&token, None));
        assert!(not_run.is_match(&Token::tagged("walk", "walk", "VB"), None));
    }

    #[test]
    fn test_untagged_reading_fails_pos() {
        let token = Token::new("xyzzy", Vec::new());
        let condition = TokenCondition {
            pos: Some(StringMatcher::regex(".*", true).unwrap()),
            ..TokenCondition::default()
        };
        assert!(!condition.is_match(&token, None));
    }

    #[test]
    fn test_exception_scopes() {
        let sentence = Sentence::from_tagged(&[("a", "a", "DT"), ("big", "big", "JJ"), ("dog", "dog", "NN")]);
        let mut element = PatternElement::new(TokenCondition::default());
        element.exceptions.push(Exception {
            condition: text_condition("big"),
            scope: ExceptionScope::Current,
        });
        assert!(element.matches_at(&sentence, 1, None));
        assert!(!element.matches_at(&sentence, 2, None));

        element.exceptions[0].scope = ExceptionScope::Previous;
        assert!(!element.matches_at(&sentence, 3, None));
        assert!(element.matches_at(&sentence, 2, None));

        element.exceptions[0].scope = ExceptionScope::Next;
        assert!(element.matches_at(&sentence, 2, None));
        assert!(element.next_exception_at(&sentence, 2, None));
    }

    #[test]
    fn test_exception_beats_negation() {
        let sentence = Sentence::from_tagged(&[("cat", "cat", "NN")]);
        let mut element = PatternElement::new(TokenCondition {
            negate: true,
            ..text_condition("dog")
        });
        assert!(element.matches_at(&sentence, 1, None));
        element.exceptions.push(Exception {
            condition: text_condition("cat"),
            scope: ExceptionScope::Current,
        });
        assert!(!element.matches_at(&sentence, 1, None));
    }

    #[test]
    fn test_fast_reject_literal() {
        let mut element = PatternElement::new(text_condition("The"));
        assert_eq!(element.fast_reject_literal(), Some(("the".to_string(), false)));
        element.min = 0;
        assert_eq!(element.fast_reject_literal(), None);

        let regex = PatternElement::new(TokenCondition {
            text: Some(StringMatcher::regex("the", false).unwrap()),
            ..TokenCondition::default()
        });
        assert_eq!(regex.fast_reject_literal(), None);
    }
}
