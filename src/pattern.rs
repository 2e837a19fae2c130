//! Rule definition tree
//!
//! This module defines the immutable, declarative structures produced by
//! the rule-file parser and consumed by the compiler. Nothing here is
//! executable: regexes are still strings, phrase references are still names,
//! and backreferences are unchecked positions.

use std::fmt;

/// Line/column of a definition in its rule file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Upper bound of a quantifier or a skip gap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Limited(usize),
    Unbounded,
}

impl Bound {
    /// Does `n` fit under this bound?
    pub fn admits(self, n: usize) -> bool {
        match self {
            Bound::Limited(max) => n <= max,
            Bound::Unbounded => true,
        }
    }

    /// Clamp an upper limit to this bound
    pub fn min_with(self, limit: usize) -> usize {
        match self {
            Bound::Limited(max) => max.min(limit),
            Bound::Unbounded => limit,
        }
    }

    pub fn saturating_add(self, other: Bound) -> Bound {
        match (self, other) {
            (Bound::Limited(a), Bound::Limited(b)) => Bound::Limited(a.saturating_add(b)),
            _ => Bound::Unbounded,
        }
    }
}

/// A literal or regex string condition, not yet compiled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueDef {
    Literal(String),
    Regex(String),
}

impl ValueDef {
    pub fn as_str(&self) -> &str {
        match self {
            ValueDef::Literal(s) | ValueDef::Regex(s) => s,
        }
    }

    pub fn is_regex(&self) -> bool {
        matches!(self, ValueDef::Regex(_))
    }
}

/// Case conversion applied to resolved reference text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaseConversion {
    #[default]
    None,
    StartLower,
    StartUpper,
    AllLower,
    AllUpper,
}

/// Which skipped tokens a reference folds into its text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IncludeRange {
    /// Only the referenced token
    #[default]
    None,
    /// Tokens after the referenced token up to the next position
    Following,
    /// The referenced token plus the following tokens
    All,
}

/// A backreference as written in a rule file
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReferenceDef {
    /// 1-based declared pattern position
    pub position: usize,
    pub pos_filter: Option<ValueDef>,
    pub pos_replace: Option<String>,
    pub text_regex: Option<String>,
    pub text_replace: Option<String>,
    pub case_conversion: CaseConversion,
    pub set_pos: bool,
    pub suppress_misspelled: bool,
    pub include_range: IncludeRange,
}

impl ReferenceDef {
    pub fn to_position(position: usize) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }
}

/// The conditions evaluated on a single token
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConditionDef {
    /// Surface text condition, or lemma condition when `inflected`
    pub text: Option<ValueDef>,
    pub inflected: bool,
    pub pos: Option<ValueDef>,
    pub negate_pos: bool,
    pub negate: bool,
    pub case_sensitive: bool,
    pub space_before: Option<bool>,
    pub reference: Option<ReferenceDef>,
}

impl ConditionDef {
    /// True if the condition places no constraint at all
    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.pos.is_none()
            && self.space_before.is_none()
            && self.reference.is_none()
    }
}

/// Where an exception is evaluated relative to the token it guards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExceptionScope {
    #[default]
    Current,
    Next,
    Previous,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionDef {
    pub condition: ConditionDef,
    pub scope: ExceptionScope,
}

/// One bracketed token in a pattern, with its occurrence attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenDef {
    pub condition: ConditionDef,
    pub exceptions: Vec<ExceptionDef>,
    pub min: usize,
    pub max: Bound,
    pub skip: Bound,
    pub location: SourceLocation,
}

impl TokenDef {
    pub fn new(condition: ConditionDef) -> Self {
        Self {
            condition,
            exceptions: Vec::new(),
            min: 1,
            max: Bound::Limited(1),
            skip: Bound::Limited(0),
            location: SourceLocation::default(),
        }
    }

    /// True if occurrence and skip attributes are all at their defaults
    pub fn has_default_quantifiers(&self) -> bool {
        self.min == 1 && self.max == Bound::Limited(1) && self.skip == Bound::Limited(0)
    }
}

/// A pattern position: the first token carries quantifiers, the rest are
/// AND-ed onto the same token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGroupDef {
    pub first: TokenDef,
    pub and_group: Vec<TokenDef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnifyGroupDef {
    pub features: Vec<String>,
    pub negate: bool,
    pub items: Vec<PatternItem>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternItem {
    Token(TokenGroupDef),
    Phrase(String, SourceLocation),
    Marker(Vec<PatternItem>, SourceLocation),
    Unify(UnifyGroupDef),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PatternDef {
    pub case_sensitive: bool,
    pub items: Vec<PatternItem>,
}

/// A named, reusable token sequence with one or more alternatives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhraseDef {
    pub name: String,
    pub alternatives: Vec<Vec<PatternItem>>,
    pub location: SourceLocation,
}

/// A unification feature ("number", "gender") and its types
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureDef {
    pub name: String,
    pub types: Vec<(String, ConditionDef)>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExampleDef {
    /// Must match exactly at the `<marker>` span
    Incorrect {
        text: String,
        correction: Option<String>,
    },
    /// Must not match
    Correct(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleDef {
    pub id: String,
    pub sub_id: String,
    pub description: String,
    pub pattern: PatternDef,
    pub message: String,
    pub short_message: Option<String>,
    pub suggestions: Vec<String>,
    pub allow_overlap: bool,
    pub examples: Vec<ExampleDef>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Replace,
    Add,
    Remove,
    Filter,
    Unify,
    Immunize,
    IgnoreSpelling,
}

/// A reading as written in a `wd` line; missing fields act as wildcards
/// when used as a removal filter
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReadingDef {
    pub lemma: Option<String>,
    pub pos: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDef {
    pub kind: ActionKind,
    pub pos: Option<ValueDef>,
    pub lemma: Option<String>,
    pub pos_replace: Option<String>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisambiguationExampleDef {
    /// Readings must be unchanged
    Untouched(String),
    /// Readings of the marked token go from `input` to `output`
    Ambiguous {
        text: String,
        input: Vec<ReadingDef>,
        output: Vec<ReadingDef>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisambiguationDef {
    pub id: String,
    pub description: String,
    pub pattern: PatternDef,
    pub action: ActionDef,
    pub readings: Vec<ReadingDef>,
    pub examples: Vec<DisambiguationExampleDef>,
    pub location: SourceLocation,
}

/// Everything declared in one rule file, in declaration order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuleFile {
    pub features: Vec<FeatureDef>,
    pub phrases: Vec<PhraseDef>,
    pub rules: Vec<RuleDef>,
    pub disambiguations: Vec<DisambiguationDef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_arithmetic() {
        assert!(Bound::Limited(2).admits(2));
        assert!(!Bound::Limited(2).admits(3));
        assert!(Bound::Unbounded.admits(usize::MAX));
        assert_eq!(Bound::Limited(3).min_with(10), 3);
        assert_eq!(Bound::Unbounded.min_with(10), 10);
        assert_eq!(
            Bound::Limited(1).saturating_add(Bound::Limited(2)),
            Bound::Limited(3)
        );
        assert_eq!(
            Bound::Limited(1).saturating_add(Bound::Unbounded),
            Bound::Unbounded
        );
    }

    #[test]
    fn test_token_defaults() {
        let token = TokenDef::new(ConditionDef::default());
        assert!(token.has_default_quantifiers());
        assert!(token.condition.is_empty());
    }
}
