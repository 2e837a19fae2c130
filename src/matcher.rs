//! Pattern matching engine
//!
//! [`MatchEngine`] finds every match of a compiled rule in a sentence. Each
//! start position is explored depth-first over an explicit backtracking
//! stack: every choice point records which element to match next, where the
//! gap before it starts and how wide it is, the token spans bound so far and
//! the running unification state. Longer runs of a repeatable element are
//! tried before shorter ones, earlier start tokens before later ones, and an
//! optional element's absence last.

use crate::compiler::CompiledRule;
use crate::element::PatternElement;
use crate::pattern::Bound;
use crate::reference::Bindings;
use crate::token::Sentence;
use crate::unify::UnificationContext;
use std::ops::Range;
use thiserror::Error;

/// Limits applied while matching
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchOptions {
    /// Abort a sentence after this many search steps
    pub max_steps: Option<usize>,
}

/// Error raised while running a rule against a sentence
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MatchError {
    #[error("Search exceeded {limit} steps")]
    StepLimit { limit: usize },

    #[error("{action} expects {expected} tokens but the match covers {found}")]
    SpanMismatch {
        action: &'static str,
        expected: usize,
        found: usize,
    },
}

/// One match of a rule in a sentence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    /// Tokens covered by the whole pattern
    pub pattern_range: Range<usize>,
    /// Tokens covered by the marker
    pub range: Range<usize>,
    /// Token range bound to each declared position
    pub positions: Vec<Range<usize>>,
    /// Tokens that took part in closed unification groups
    pub unified_tokens: usize,
    /// Unified tokens inside the marker
    pub marker_unified_tokens: usize,
    pub message: String,
    pub short_message: Option<String>,
    pub suggestions: Vec<String>,
}

/// Can `rule` be skipped for `sentence` without running the matcher?
///
/// True when a literal every match requires is absent from the sentence.
pub fn can_be_ignored(rule: &CompiledRule, sentence: &Sentence) -> bool {
    let simple = rule.simple_tokens();
    let inflected = rule.inflected_tokens();
    if simple.is_empty() && inflected.is_empty() {
        return false;
    }
    let index = sentence.index();
    !index.has_all_tokens(simple) || !index.has_all_lemmas(inflected)
}

/// A backtrack point
#[derive(Debug, Clone)]
struct ChoicePoint {
    /// Next element to match
    elem: usize,
    /// First token the next element may start at
    pos: usize,
    /// Tokens that may be skipped before the next element
    gap: Bound,
    /// Element whose next-scope exceptions veto tokens in the gap
    guard: Option<usize>,
    /// Span matched by each element so far
    spans: Vec<Range<usize>>,
    unify: UnificationContext,
    unified: usize,
}

impl ChoicePoint {
    fn start(pos: usize) -> Self {
        Self {
            elem: 0,
            pos,
            gap: Bound::Limited(0),
            guard: None,
            spans: Vec::new(),
            unify: UnificationContext::new(),
            unified: 0,
        }
    }

    fn advance(&self, span: Range<usize>, gap: Bound, guard: Option<usize>) -> Self {
        let mut spans = self.spans.clone();
        let pos = span.end;
        spans.push(span);
        Self {
            elem: self.elem + 1,
            pos,
            gap,
            guard,
            spans,
            unify: self.unify.clone(),
            unified: self.unified,
        }
    }
}

/// Runs one compiled rule over sentences
#[derive(Debug, Clone, Copy)]
pub struct MatchEngine<'r> {
    rule: &'r CompiledRule,
    options: MatchOptions,
}

impl<'r> MatchEngine<'r> {
    pub fn new(rule: &'r CompiledRule, options: MatchOptions) -> Self {
        Self { rule, options }
    }

    pub fn rule(&self) -> &'r CompiledRule {
        self.rule
    }

    pub fn can_be_ignored(&self, sentence: &Sentence) -> bool {
        can_be_ignored(self.rule, sentence)
    }

    /// All matches of the rule, left to right
    ///
    /// After a match, scanning resumes past the end of the pattern unless the
    /// rule allows overlapping matches.
    pub fn find_matches(&self, sentence: &Sentence) -> Result<Vec<MatchResult>, MatchError> {
        let mut results: Vec<MatchResult> = Vec::new();
        if self.rule.elements.is_empty() {
            return Ok(results);
        }

        let mut steps = 0;
        let mut start = 0;
        while start < sentence.len() {
            let Some(found) = self.match_at(sentence, start, &mut steps)? else {
                start += 1;
                continue;
            };
            let result = self.build_result(sentence, &found);
            start = if self.rule.allow_overlap {
                start + 1
            } else {
                result.pattern_range.end.max(start + 1)
            };
            if results
                .last()
                .is_none_or(|last| last.pattern_range != result.pattern_range)
            {
                results.push(result);
            }
        }
        Ok(results)
    }

    /// First match anchored at `start`, in preference order
    fn match_at(
        &self,
        sentence: &Sentence,
        start: usize,
        steps: &mut usize,
    ) -> Result<Option<ChoicePoint>, MatchError> {
        let mut backtrack_stack = vec![ChoicePoint::start(start)];

        while let Some(point) = backtrack_stack.pop() {
            *steps += 1;
            if let Some(limit) = self.options.max_steps
                && *steps > limit
            {
                return Err(MatchError::StepLimit { limit });
            }

            if point.elem == self.rule.elements.len() {
                // empty matches are never reported
                if point.spans.iter().any(|s| !s.is_empty()) {
                    return Ok(Some(point));
                }
                continue;
            }

            self.expand(sentence, &point, &mut backtrack_stack);
        }

        Ok(None)
    }

    /// Push the successors of `point` so the preferred one pops first
    fn expand(&self, sentence: &Sentence, point: &ChoicePoint, backtrack_stack: &mut Vec<ChoicePoint>) {
        let elements = &self.rule.elements;
        let element = &elements[point.elem];
        let len = sentence.len();

        let positions = if element.has_references() {
            bind_positions(&elements[..point.elem], &point.spans, element.position)
        } else {
            Vec::new()
        };
        let bindings = Bindings::new(sentence, &positions);
        let bindings = element.has_references().then_some(&bindings);

        let guard = if element.has_next_exceptions() {
            Some(point.elem)
        } else {
            None
        };
        let first_count = element.min.max(1);
        let mut successors = Vec::new();

        let gap_end = match point.gap {
            Bound::Limited(gap) => point.pos.saturating_add(gap).saturating_add(1).min(len),
            Bound::Unbounded => len,
        };
        for t in point.pos..gap_end {
            if let Some(g) = point.guard
                && elements[g].next_exception_at(sentence, t, None)
            {
                break;
            }

            let limit = element.max.min_with(len - t);
            let mut run = 0;
            while run < limit && element.matches_at(sentence, t + run, bindings) {
                run += 1;
            }
            if run < first_count {
                continue;
            }

            match &element.unify {
                None => {
                    for count in (first_count..=run).rev() {
                        successors.push(point.advance(t..t + count, element.skip_next, guard));
                    }
                }
                Some(spec) => {
                    // agreement only shrinks, so a plain group stops at the
                    // first disagreeing token
                    let mut contexts = Vec::with_capacity(run);
                    let mut ctx = point.unify.clone();
                    for token in &sentence.tokens()[t..t + run] {
                        let agrees = ctx.unify_token(&self.rule.unifier, &spec.features, token);
                        if !agrees && !spec.negate {
                            break;
                        }
                        contexts.push(ctx.clone());
                    }
                    for count in (first_count..=contexts.len()).rev() {
                        let mut next = point.advance(t..t + count, element.skip_next, guard);
                        if !close_group(&mut next, element, contexts[count - 1].clone()) {
                            continue;
                        }
                        successors.push(next);
                    }
                }
            }
        }

        if element.min == 0 {
            // an absent element is transparent: its gap joins the current one
            let mut next = point.advance(
                point.pos..point.pos,
                point.gap.saturating_add(element.skip_next),
                guard.or(point.guard),
            );
            if close_group(&mut next, element, point.unify.clone()) {
                successors.push(next);
            }
        }

        backtrack_stack.extend(successors.into_iter().rev());
    }

    fn build_result(&self, sentence: &Sentence, found: &ChoicePoint) -> MatchResult {
        let rule = self.rule;
        let positions = bind_positions(&rule.elements, &found.spans, rule.position_count());

        let pattern_range = covering(&found.spans).unwrap_or(0..0);
        let marker_spans = found.spans.get(rule.marker.clone()).unwrap_or(&[]);
        let range = covering(marker_spans).unwrap_or_else(|| {
            let at = marker_spans.first().map_or(pattern_range.start, |s| s.start);
            at..at
        });

        let marker_unified_tokens: usize = rule
            .elements
            .iter()
            .zip(&found.spans)
            .filter(|(element, _)| element.unify.is_some())
            .map(|(_, span)| span.clone().filter(|i| range.contains(i)).count())
            .sum();

        let bindings = Bindings::new(sentence, &positions);
        let rendered = rule.message.render(&bindings);
        let mut suggestions = rendered.suggestions;
        for template in &rule.suggestions_out_msg {
            if let Some(suggestion) = template.render_text(&bindings)
                && !suggestions.contains(&suggestion)
            {
                suggestions.push(suggestion);
            }
        }
        let short_message = rule
            .short_message
            .as_ref()
            .and_then(|t| t.render_text(&bindings));

        MatchResult {
            pattern_range,
            range,
            positions,
            unified_tokens: found.unified,
            marker_unified_tokens,
            message: rendered.text,
            short_message,
            suggestions,
        }
    }
}

/// Fold the unification state for `element` into `next`
///
/// Returns false when the element closes a group that fails its verdict.
fn close_group(next: &mut ChoicePoint, element: &PatternElement, ctx: UnificationContext) -> bool {
    let Some(spec) = &element.unify else {
        return true;
    };
    if !spec.last {
        next.unify = ctx;
        return true;
    }
    if !ctx.is_satisfied(spec.negate) {
        return false;
    }
    next.unified += ctx.token_count();
    next.unify = UnificationContext::new();
    true
}

/// Token range per declared position, for the first `positions` positions
fn bind_positions(
    elements: &[PatternElement],
    spans: &[Range<usize>],
    positions: usize,
) -> Vec<Range<usize>> {
    let mut bound: Vec<Option<Range<usize>>> = vec![None; positions];
    for (element, span) in elements.iter().zip(spans) {
        let Some(slot) = bound.get_mut(element.position) else {
            continue;
        };
        *slot = Some(match slot.take() {
            Some(r) if span.is_empty() => r,
            Some(r) if !r.is_empty() => r.start..span.end,
            _ => span.clone(),
        });
    }
    bound.into_iter().map(|r| r.unwrap_or(0..0)).collect()
}

/// Smallest range covering every non-empty span
fn covering(spans: &[Range<usize>]) -> Option<Range<usize>> {
    spans
        .iter()
        .filter(|s| !s.is_empty())
        .fold(None, |acc, s| match acc {
            None => Some(s.clone()),
            Some(r) => Some(r.start.min(s.start)..r.end.max(s.end)),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::RuleCompiler;
    use crate::parser::parse_rules;

    fn rule(source: &str) -> CompiledRule {
        let file = parse_rules(source).unwrap();
        let compiler = RuleCompiler::new(&file).unwrap();
        compiler.compile_rule(&file.rules[0]).unwrap().remove(0)
    }

    fn words(items: &[&str]) -> Sentence {
        let tagged: Vec<(&str, &str, &str)> = items.iter().map(|w| (*w, *w, "X")).collect();
        Sentence::from_tagged(&tagged)
    }

    fn ranges(rule: &CompiledRule, sentence: &Sentence) -> Vec<Range<usize>> {
        MatchEngine::new(rule, MatchOptions::default())
            .find_matches(sentence)
            .unwrap()
            .into_iter()
            .map(|m| m.range)
            .collect()
    }

    #[test]
    fn test_simple_match_and_message() {
        let rule = rule(
            r#"rule DOUBLE { pattern { ["the"] ["the"] } message "Did you mean <suggestion>\1</suggestion>?"; }"#,
        );
        let sentence = words(&["I", "saw", "the", "the", "dog"]);
        let matches = MatchEngine::new(&rule, MatchOptions::default())
            .find_matches(&sentence)
            .unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].range, 3..5);
        assert_eq!(matches[0].positions, vec![3..4, 4..5]);
        assert_eq!(matches[0].message, "Did you mean <suggestion>the</suggestion>?");
        assert_eq!(matches[0].suggestions, vec!["the".to_string()]);
    }

    #[test]
    fn test_marker_range() {
        let rule = rule(r#"rule R { pattern { ["a"] marker { ["big"] } ["dog"] } }"#);
        let sentence = words(&["a", "big", "dog"]);
        let matches = MatchEngine::new(&rule, MatchOptions::default())
            .find_matches(&sentence)
            .unwrap();
        assert_eq!(matches[0].range, 2..3);
        assert_eq!(matches[0].pattern_range, 1..4);
    }

    #[test]
    fn test_greedy_with_backtracking() {
        let rule = rule(r#"rule R { pattern { [pos="JJ", min=1, max=2] [pos="NN"] } }"#);
        let sentence = Sentence::from_tagged(&[
            ("a", "a", "DT"),
            ("big", "big", "JJ"),
            ("old", "old", "JJ"),
            ("red", "red", "JJ"),
            ("dog", "dog", "NN"),
        ]);
        assert_eq!(ranges(&rule, &sentence), vec![3..6]);

        let rule = super::tests::rule(r#"rule R { pattern { [pos="JJ", max=*] [pos="NN"] } }"#);
        assert_eq!(ranges(&rule, &sentence), vec![2..6]);
    }

    #[test]
    fn test_skip_gap() {
        let rule = rule(r#"rule R { pattern { ["give", skip=2] ["up"] } }"#);
        assert_eq!(ranges(&rule, &words(&["give", "it", "up"])), vec![1..4]);
        assert_eq!(ranges(&rule, &words(&["give", "up"])), vec![1..3]);
        assert!(ranges(&rule, &words(&["give", "it", "all", "back", "up"])).is_empty());

        let rule = super::tests::rule(r#"rule R { pattern { ["give", skip=*] ["up"] } }"#);
        assert_eq!(ranges(&rule, &words(&["give", "it", "all", "back", "up"])), vec![1..6]);
    }

    #[test]
    fn test_next_exception_guards_gap() {
        let rule = rule(r#"rule R { pattern { ["give", skip=*, except_next(text="and")] ["up"] } }"#);
        assert_eq!(ranges(&rule, &words(&["give", "it", "up"])), vec![1..4]);
        assert!(ranges(&rule, &words(&["give", "it", "and", "up"])).is_empty());
    }

    #[test]
    fn test_optional_element() {
        let rule = rule(r#"rule R { pattern { ["a"] [pos="JJ", min=0] ["dog"] } }"#);
        let with = Sentence::from_tagged(&[("a", "a", "DT"), ("big", "big", "JJ"), ("dog", "dog", "NN")]);
        let without = Sentence::from_tagged(&[("a", "a", "DT"), ("dog", "dog", "NN")]);
        assert_eq!(ranges(&rule, &with), vec![1..4]);
        assert_eq!(ranges(&rule, &without), vec![1..3]);

        let matches = MatchEngine::new(&rule, MatchOptions::default())
            .find_matches(&without)
            .unwrap();
        assert_eq!(matches[0].positions, vec![1..2, 2..2, 2..3]);
    }

    #[test]
    fn test_optional_element_takes_at_most_one() {
        let rule = rule(r#"rule R { pattern { ["a"] ["b", min=0, max=1] ["c"] } }"#);
        assert_eq!(ranges(&rule, &words(&["a", "c"])), vec![1..3]);
        assert_eq!(ranges(&rule, &words(&["a", "b", "c"])), vec![1..4]);
        assert!(ranges(&rule, &words(&["a", "b", "b", "c"])).is_empty());
    }

    #[test]
    fn test_text_inequality_negates_whole_token() {
        let rule = rule(r#"rule R { pattern { [text!="a", pos="DT"] } }"#);
        let sentence = Sentence::from_tagged(&[("a", "a", "DT"), ("the", "the", "DT"), ("a", "a", "NN")]);
        // the sentence start token is not "a" either
        assert_eq!(ranges(&rule, &sentence), vec![0..1, 2..3, 3..4]);
    }

    #[test]
    fn test_unification() {
        let source = r#"
            unification number { sg = pos~".*:sg"; pl = pos~".*:pl"; }
            rule R { pattern { unify(number) { [pos~"DT.*"] [pos~"NN.*"] } } }
        "#;
        let rule = rule(source);
        let agree = Sentence::from_tagged(&[("these", "this", "DT:pl"), ("dogs", "dog", "NN:pl")]);
        let disagree = Sentence::from_tagged(&[("this", "this", "DT:sg"), ("dogs", "dog", "NN:pl")]);
        let matches = MatchEngine::new(&rule, MatchOptions::default())
            .find_matches(&agree)
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].unified_tokens, 2);
        assert_eq!(matches[0].marker_unified_tokens, 2);
        assert!(ranges(&rule, &disagree).is_empty());

        let negated = super::tests::rule(&source.replace("unify(", "unify!("));
        assert!(ranges(&negated, &agree).is_empty());
        assert_eq!(ranges(&negated, &disagree), vec![1..3]);
    }

    #[test]
    fn test_backreference() {
        let rule = rule(r#"rule R { pattern { [pos="DT"] [ref=1] } }"#);
        let sentence = Sentence::from_tagged(&[("the", "the", "DT"), ("The", "the", "DT"), ("a", "a", "DT")]);
        assert_eq!(ranges(&rule, &sentence), vec![1..3]);
    }

    #[test]
    fn test_overlap() {
        let plain = rule(r#"rule R { pattern { ["a"] ["a"] } }"#);
        let overlapping = rule(r#"rule R { pattern { ["a"] ["a"] } overlap; }"#);
        let sentence = words(&["a", "a", "a"]);
        assert_eq!(ranges(&plain, &sentence), vec![1..3]);
        assert_eq!(ranges(&overlapping, &sentence), vec![1..3, 2..4]);
    }

    #[test]
    fn test_step_limit() {
        let rule = rule(r#"rule R { pattern { ["a"] ["b"] ["c"] } }"#);
        let engine = MatchEngine::new(&rule, MatchOptions { max_steps: Some(2) });
        assert_eq!(
            engine.find_matches(&words(&["a", "b", "c"])),
            Err(MatchError::StepLimit { limit: 2 })
        );
    }

    #[test]
    fn test_can_be_ignored() {
        let rule = rule(r#"rule R { pattern { ["Need"] [lemma="be"] } }"#);
        let engine = MatchEngine::new(&rule, MatchOptions::default());
        assert!(engine.can_be_ignored(&words(&["nothing", "here"])));
        let sentence = Sentence::from_tagged(&[("need", "need", "VB"), ("is", "be", "VBZ")]);
        assert!(!engine.can_be_ignored(&sentence));

        let regex_only = super::tests::rule(r#"rule R { pattern { [text~"x.*"] } }"#);
        assert!(!can_be_ignored(&regex_only, &words(&["nothing"])));
    }

    #[test]
    fn test_can_be_ignored_never_hides_a_match() {
        let rules = [
            rule(r#"rule R { pattern { ["a"] ["b", min=0] ["c"] } }"#),
            rule(r#"rule R { pattern { ["a"] [not, "b"] } }"#),
            rule(r#"rule R { pattern { ["A", case] [text~"b|c"] } }"#),
            rule(r#"rule R { pattern { ["a", skip=2] ["c"] } }"#),
        ];
        let vocabulary = ["a", "A", "b", "c", "d"];
        for rule in &rules {
            let engine = MatchEngine::new(rule, MatchOptions::default());
            // every sentence of up to three words over the vocabulary
            for n in 0..=3u32 {
                for code in 0..vocabulary.len().pow(n) {
                    let mut code = code;
                    let items: Vec<&str> = (0..n)
                        .map(|_| {
                            let word = vocabulary[code % vocabulary.len()];
                            code /= vocabulary.len();
                            word
                        })
                        .collect();
                    let sentence = words(&items);
                    if engine.can_be_ignored(&sentence) {
                        assert!(
                            engine.find_matches(&sentence).unwrap().is_empty(),
                            "{items:?} was skipped but matches"
                        );
                    }
                }
            }
        }
    }
}
