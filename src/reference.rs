//! Backreference resolution and output templates
//!
//! A [`Reference`] turns a token bound to an earlier pattern position into
//! text. The same resolver serves three callers: backreference conditions
//! during matching, the FILTER disambiguation action, and message and
//! suggestion rendering.

use crate::element::StringMatcher;
use crate::pattern::{CaseConversion, IncludeRange, ReferenceDef, ValueDef};
use crate::token::{Reading, Sentence, Token};
use regex::Regex;
use std::fmt::Debug;
use std::ops::Range;
use thiserror::Error;

/// Token ranges bound to declared pattern positions
#[derive(Debug, Clone, Copy)]
pub struct Bindings<'a> {
    sentence: &'a Sentence,
    positions: &'a [Range<usize>],
}

impl<'a> Bindings<'a> {
    pub fn new(sentence: &'a Sentence, positions: &'a [Range<usize>]) -> Self {
        Self {
            sentence,
            positions,
        }
    }

    pub fn sentence(&self) -> &'a Sentence {
        self.sentence
    }

    /// Token range bound to the 0-based declared position `i`
    pub fn position(&self, i: usize) -> Option<Range<usize>> {
        self.positions.get(i).cloned()
    }

    /// Where the material following position `i` ends: the start of the
    /// next non-empty position, or the end of `i` itself
    fn following_end(&self, i: usize) -> usize {
        let own_end = self.positions.get(i).map_or(0, |r| r.end);
        self.positions
            .iter()
            .skip(i + 1)
            .find(|r| !r.is_empty())
            .map_or(own_end, |r| r.start.max(own_end))
    }
}

/// A regex search/replace pair
#[derive(Clone)]
pub struct RegexReplace {
    pub pattern: String,
    pub regex: Regex,
    pub replacement: String,
}

impl RegexReplace {
    pub fn new(pattern: &str, replacement: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: pattern.to_string(),
            regex: Regex::new(pattern)?,
            replacement: replacement.to_string(),
        })
    }

    pub fn apply(&self, s: &str) -> String {
        self.regex
            .replace_all(s, self.replacement.as_str())
            .into_owned()
    }
}

impl Debug for RegexReplace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RegexReplace")
            .field(&self.pattern)
            .field(&self.replacement)
            .finish()
    }
}

impl PartialEq for RegexReplace {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern && self.replacement == other.replacement
    }
}

impl CaseConversion {
    pub fn apply(self, text: &str) -> String {
        match self {
            CaseConversion::None => text.to_string(),
            CaseConversion::AllLower => text.to_lowercase(),
            CaseConversion::AllUpper => text.to_uppercase(),
            CaseConversion::StartUpper => {
                let mut chars = text.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            }
            CaseConversion::StartLower => {
                let mut chars = text.chars();
                match chars.next() {
                    Some(first) => first.to_lowercase().chain(chars).collect(),
                    None => String::new(),
                }
            }
        }
    }
}

/// Resolver for a reference to an earlier pattern position
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    /// 1-based declared pattern position
    pub position: usize,
    /// Selects the first reading whose tag matches
    pub pos_filter: Option<StringMatcher>,
    /// Rewrites the selected tag (uses the filter regex when there is one)
    pub pos_replace: Option<String>,
    pub text_replace: Option<RegexReplace>,
    pub case_conversion: CaseConversion,
    /// Output the selected POS tag instead of the surface text
    pub set_pos: bool,
    pub suppress_misspelled: bool,
    pub include_range: IncludeRange,
}

impl Reference {
    /// A plain reference to a 1-based position
    pub fn to_position(position: usize) -> Self {
        Self {
            position,
            pos_filter: None,
            pos_replace: None,
            text_replace: None,
            case_conversion: CaseConversion::None,
            set_pos: false,
            suppress_misspelled: false,
            include_range: IncludeRange::None,
        }
    }

    /// Compile a reference definition
    pub fn from_def(def: &ReferenceDef) -> Result<Self, regex::Error> {
        let pos_filter = match &def.pos_filter {
            Some(ValueDef::Literal(s)) => Some(StringMatcher::literal(s, true)),
            Some(ValueDef::Regex(s)) => Some(StringMatcher::regex(s, true)?),
            None => None,
        };
        let text_replace = match &def.text_regex {
            Some(pattern) => Some(RegexReplace::new(
                pattern,
                def.text_replace.as_deref().unwrap_or(""),
            )?),
            None => None,
        };
        Ok(Self {
            position: def.position,
            pos_filter,
            pos_replace: def.pos_replace.clone(),
            text_replace,
            case_conversion: def.case_conversion,
            set_pos: def.set_pos,
            suppress_misspelled: def.suppress_misspelled,
            include_range: def.include_range,
        })
    }

    /// Resolve the referenced token into text
    ///
    /// Returns `None` when the position is unbound or the token is
    /// misspelled and misspellings are suppressed. A position that matched
    /// no tokens resolves to the empty string.
    pub fn resolve(&self, bindings: &Bindings) -> Option<String> {
        let index = self.position.checked_sub(1)?;
        let range = bindings.position(index)?;
        if range.is_empty() {
            return Some(String::new());
        }
        let sentence = bindings.sentence();
        let token = sentence.token(range.start)?;
        if self.suppress_misspelled && token.misspelled {
            return None;
        }

        let text = if self.set_pos {
            match self.select_reading(token).and_then(|r| r.pos()) {
                Some(tag) => self.rewrite_pos(tag),
                None => token.text.clone(),
            }
        } else {
            let end = bindings.following_end(index);
            let surface = match self.include_range {
                IncludeRange::None => token.text.clone(),
                IncludeRange::Following => join_tokens(sentence, range.start + 1..end),
                IncludeRange::All => join_tokens(sentence, range.start..end),
            };
            match &self.text_replace {
                Some(replace) => replace.apply(&surface),
                None => surface,
            }
        };

        Some(self.case_conversion.apply(&text))
    }

    /// First reading satisfying the POS filter; without a filter, the
    /// first reading
    pub fn select_reading<'t>(&self, token: &'t Token) -> Option<&'t Reading> {
        match &self.pos_filter {
            Some(filter) => token
                .readings()
                .iter()
                .find(|r| r.pos().is_some_and(|tag| filter.is_match(tag, true))),
            None => token.readings().first(),
        }
    }

    /// Readings of `token` that pass the POS filter, with rewritten tags
    pub fn filter_readings(&self, token: &Token) -> Vec<Reading> {
        token
            .readings()
            .iter()
            .filter(|r| match &self.pos_filter {
                Some(filter) => r.pos().is_some_and(|tag| filter.is_match(tag, true)),
                None => true,
            })
            .map(|r| Reading {
                lemma: r.lemma.clone(),
                pos: r.pos().map(|tag| self.rewrite_pos(tag)),
            })
            .collect()
    }

    fn rewrite_pos(&self, tag: &str) -> String {
        match (&self.pos_replace, &self.pos_filter) {
            (Some(replacement), Some(StringMatcher::Regex(_, re))) => {
                re.replace(tag, replacement.as_str()).into_owned()
            }
            (Some(replacement), _) => replacement.clone(),
            (None, _) => tag.to_string(),
        }
    }
}

/// Surface text of a token range, spaced as in the input
fn join_tokens(sentence: &Sentence, range: Range<usize>) -> String {
    let mut out = String::new();
    for token in range.filter_map(|i| sentence.token(i)) {
        if !out.is_empty() && token.whitespace_before {
            out.push(' ');
        }
        out.push_str(&token.text);
    }
    out
}

/// Error in a message or suggestion template
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Unclosed <suggestion>")]
    UnclosedSuggestion,

    #[error("Unexpected </suggestion>")]
    StraySuggestionEnd,

    #[error("Nested <suggestion>")]
    NestedSuggestion,

    #[error("Bad <match> tag: {0}")]
    BadMatchTag(String),

    #[error("Invalid regex in <match> tag: {0}")]
    Regex(#[from] regex::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Reference(Reference),
    Suggestion(Vec<Segment>),
}

/// Rendered template output
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Rendered {
    pub text: String,
    pub suggestions: Vec<String>,
}

/// A parsed message or suggestion template
///
/// Recognises `\N`, `<match no="N" .../>` and `<suggestion>...</suggestion>`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let scanner = crate::regex!(r"\\(\d+)|<suggestion>|</suggestion>|<match\b([^>]*?)/>");
        let mut stack: Vec<Segment> = Vec::new();
        let mut open: Option<Vec<Segment>> = None;
        let mut last = 0;

        for caps in scanner.captures_iter(source) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let target = open.as_mut().unwrap_or(&mut stack);
            if whole.start() > last {
                target.push(Segment::Text(source[last..whole.start()].to_string()));
            }
            last = whole.end();

            if let Some(number) = caps.get(1) {
                let position = number
                    .as_str()
                    .parse()
                    .map_err(|_| TemplateError::BadMatchTag(whole.as_str().to_string()))?;
                target.push(Segment::Reference(Reference::to_position(position)));
            } else if let Some(attrs) = caps.get(2) {
                target.push(Segment::Reference(parse_match_tag(attrs.as_str())?));
            } else if whole.as_str() == "<suggestion>" {
                if open.is_some() {
                    return Err(TemplateError::NestedSuggestion);
                }
                open = Some(Vec::new());
            } else {
                let Some(inner) = open.take() else {
                    return Err(TemplateError::StraySuggestionEnd);
                };
                stack.push(Segment::Suggestion(inner));
            }
        }

        if open.is_some() {
            return Err(TemplateError::UnclosedSuggestion);
        }
        if last < source.len() {
            stack.push(Segment::Text(source[last..].to_string()));
        }
        Ok(Self { segments: stack })
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Every reference in the template, including those in suggestions
    pub fn references(&self) -> Vec<&Reference> {
        fn walk<'a>(segments: &'a [Segment], out: &mut Vec<&'a Reference>) {
            for segment in segments {
                match segment {
                    Segment::Reference(r) => out.push(r),
                    Segment::Suggestion(inner) => walk(inner, out),
                    Segment::Text(_) => {}
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.segments, &mut out);
        out
    }

    /// Substitute references; suggestions with an unresolvable reference
    /// are dropped
    pub fn render(&self, bindings: &Bindings) -> Rendered {
        let mut rendered = Rendered::default();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => rendered.text.push_str(text),
                Segment::Reference(reference) => {
                    if let Some(text) = reference.resolve(bindings) {
                        rendered.text.push_str(&text);
                    }
                }
                Segment::Suggestion(inner) => {
                    if let Some(suggestion) = render_strict(inner, bindings) {
                        rendered.text.push_str("<suggestion>");
                        rendered.text.push_str(&suggestion);
                        rendered.text.push_str("</suggestion>");
                        if !rendered.suggestions.contains(&suggestion) {
                            rendered.suggestions.push(suggestion);
                        }
                    }
                }
            }
        }
        rendered
    }

    /// Render as plain text; `None` if any reference is unresolvable
    pub fn render_text(&self, bindings: &Bindings) -> Option<String> {
        render_strict(&self.segments, bindings)
    }
}

fn render_strict(segments: &[Segment], bindings: &Bindings) -> Option<String> {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Reference(reference) => out.push_str(&reference.resolve(bindings)?),
            Segment::Suggestion(inner) => out.push_str(&render_strict(inner, bindings)?),
        }
    }
    Some(out)
}

/// Parse the attributes of a `<match .../>` tag
fn parse_match_tag(attrs: &str) -> Result<Reference, TemplateError> {
    let attr_re = crate::regex!(r#"(\w+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#);
    let bad = || TemplateError::BadMatchTag(attrs.trim().to_string());
    let mut def = ReferenceDef::default();

    for caps in attr_re.captures_iter(attrs) {
        let (Some(key), Some(value)) = (caps.get(1), caps.get(2).or_else(|| caps.get(3))) else {
            continue;
        };
        let value = value.as_str();
        match key.as_str() {
            "no" => def.position = value.parse().map_err(|_| bad())?,
            "postag" | "postag_regexp" => def.pos_filter = Some(ValueDef::Regex(value.to_string())),
            "postag_replace" => def.pos_replace = Some(value.to_string()),
            "regex" | "regexp_match" => def.text_regex = Some(value.to_string()),
            "replace" | "regexp_replace" => def.text_replace = Some(value.to_string()),
            "case" | "case_conversion" => {
                def.case_conversion = match value.replace('_', "").as_str() {
                    "startupper" => CaseConversion::StartUpper,
                    "startlower" => CaseConversion::StartLower,
                    "allupper" => CaseConversion::AllUpper,
                    "alllower" => CaseConversion::AllLower,
                    "none" | "preserve" => CaseConversion::None,
                    _ => return Err(bad()),
                }
            }
            "setpos" => def.set_pos = value == "yes",
            "suppress_misspelled" => def.suppress_misspelled = value == "yes",
            "include_skipped" => {
                def.include_range = match value {
                    "following" => IncludeRange::Following,
                    "all" => IncludeRange::All,
                    "none" => IncludeRange::None,
                    _ => return Err(bad()),
                }
            }
            _ => return Err(bad()),
        }
    }

    if def.position == 0 {
        return Err(bad());
    }
    Ok(Reference::from_def(&def)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentence() -> Sentence {
        Sentence::from_tagged(&[
            ("the", "the", "DT"),
            ("quick", "quick", "JJ"),
            ("brown", "brown", "JJ"),
            ("foxes", "fox", "NNS"),
        ])
    }

    #[test]
    fn test_resolve_with_case_and_regex() {
        let sentence = sentence();
        let positions = vec![1..2, 2..3, 4..5];
        let bindings = Bindings::new(&sentence, &positions);

        let mut reference = Reference::to_position(1);
        reference.case_conversion = CaseConversion::StartUpper;
        assert_eq!(reference.resolve(&bindings).as_deref(), Some("The"));

        let mut reference = Reference::to_position(3);
        reference.text_replace = Some(RegexReplace::new("es$", "").unwrap());
        reference.case_conversion = CaseConversion::AllUpper;
        assert_eq!(reference.resolve(&bindings).as_deref(), Some("FOX"));

        assert_eq!(Reference::to_position(4).resolve(&bindings), None);
        assert_eq!(Reference::to_position(0).resolve(&bindings), None);
    }

    #[test]
    fn test_include_skipped() {
        let sentence = sentence();
        // position 2 matched "quick", "brown" was skipped before position 3
        let positions = vec![1..2, 2..3, 4..5];
        let bindings = Bindings::new(&sentence, &positions);

        let mut reference = Reference::to_position(2);
        reference.include_range = IncludeRange::All;
        assert_eq!(reference.resolve(&bindings).as_deref(), Some("quick brown"));
        reference.include_range = IncludeRange::Following;
        assert_eq!(reference.resolve(&bindings).as_deref(), Some("brown"));
    }

    #[test]
    fn test_pos_selection_and_filter() {
        let sentence = Sentence::new(vec![Token::new(
            "walks",
            vec![Reading::new("walk", "VBZ"), Reading::new("walk", "NNS")],
        )]);
        let positions = vec![0..1];
        let bindings = Bindings::new(&sentence, &positions);

        let mut reference = Reference::to_position(1);
        reference.pos_filter = Some(StringMatcher::regex("NN(S?)", true).unwrap());
        reference.set_pos = true;
        assert_eq!(reference.resolve(&bindings).as_deref(), Some("NNS"));

        reference.pos_replace = Some("NNP$1".to_string());
        assert_eq!(reference.resolve(&bindings).as_deref(), Some("NNPS"));
        assert_eq!(
            reference.filter_readings(&sentence.tokens()[0]),
            vec![Reading::new("walk", "NNPS")]
        );

        reference.pos_filter = Some(StringMatcher::literal("JJ", true));
        assert_eq!(reference.resolve(&bindings).as_deref(), Some("walks"));
        assert!(reference.filter_readings(&sentence.tokens()[0]).is_empty());
    }

    #[test]
    fn test_suppress_misspelled() {
        let mut token = Token::tagged("teh", "teh", "NN");
        token.misspelled = true;
        let sentence = Sentence::new(vec![token]);
        let positions = vec![0..1];
        let bindings = Bindings::new(&sentence, &positions);

        let mut reference = Reference::to_position(1);
        assert_eq!(reference.resolve(&bindings).as_deref(), Some("teh"));
        reference.suppress_misspelled = true;
        assert_eq!(reference.resolve(&bindings), None);
    }

    #[test]
    fn test_template_render() {
        let sentence = sentence();
        let positions = vec![1..2, 2..3, 4..5];
        let bindings = Bindings::new(&sentence, &positions);

        let template = Template::parse(
            r#"Use <suggestion>\1 <match no="3" regexp_match="es$" regexp_replace=""/></suggestion> or <suggestion>\3</suggestion>."#,
        )
        .unwrap();
        assert_eq!(template.references().len(), 3);

        let rendered = template.render(&bindings);
        assert_eq!(rendered.suggestions, vec!["the fox".to_string(), "foxes".to_string()]);
        assert_eq!(
            rendered.text,
            "Use <suggestion>the fox</suggestion> or <suggestion>foxes</suggestion>."
        );
    }

    #[test]
    fn test_template_errors() {
        assert!(matches!(
            Template::parse("<suggestion>x"),
            Err(TemplateError::UnclosedSuggestion)
        ));
        assert!(matches!(
            Template::parse("x</suggestion>"),
            Err(TemplateError::StraySuggestionEnd)
        ));
        assert!(matches!(
            Template::parse("<match case='loud' no='1'/>"),
            Err(TemplateError::BadMatchTag(_))
        ));
        assert!(Template::parse("plain text").unwrap().references().is_empty());
    }
}
