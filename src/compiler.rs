//! Rule compilation
//!
//! This module compiles rule definitions into executable [`CompiledRule`]s.
//! Phrase references are expanded inline (one sibling rule per combination
//! of phrase alternatives), marker and unification blocks are flattened
//! into per-element flags, and every backreference, quantifier, regex and
//! disambiguation action is validated. A definition that fails validation
//! never produces a rule.

use crate::disambig::{DisambiguationAction, DisambiguationRule, RemoveTarget};
use crate::element::{Exception, PatternElement, StringMatcher, TokenCondition};
use crate::pattern::{
    ActionKind, Bound, ConditionDef, DisambiguationDef, ExampleDef, PatternDef, PatternItem,
    PhraseDef, RuleDef, RuleFile, SourceLocation, TokenGroupDef, ValueDef,
};
use crate::reference::{Reference, Template, TemplateError};
use crate::token::Reading;
use crate::unify::{Feature, MAX_FEATURE_TYPES, Unifier, UnifySpec};
use once_cell::sync::OnceCell;
use rustc_hash::{FxHashMap, FxHashSet};
use std::ops::Range;
use std::sync::Arc;
use thiserror::Error;

/// Maximum phrase nesting depth
const MAX_PHRASE_DEPTH: usize = 16;

/// A rule definition that cannot be compiled
#[derive(Debug, Error)]
#[error("{location}: rule {rule_id}: {kind}")]
pub struct CompileError {
    pub location: SourceLocation,
    pub rule_id: String,
    pub kind: CompileErrorKind,
}

#[derive(Debug, Error)]
pub enum CompileErrorKind {
    #[error("backreference to position {position} must point to an earlier position (1..={max})")]
    BadReference { position: usize, max: usize },

    #[error("invalid regex: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("invalid template: {0}")]
    Template(#[from] TemplateError),

    #[error("min={min} exceeds max={max}")]
    MinExceedsMax { min: usize, max: usize },

    #[error("max must be greater than zero")]
    ZeroMax,

    #[error("occurrence and skip attributes belong on the first token of an AND group")]
    AndGroupQuantifier,

    #[error("unknown phrase {0}")]
    UnknownPhrase(String),

    #[error("phrase {0} is nested too deeply or refers to itself")]
    RecursivePhrase(String),

    #[error("unknown unification feature {0}")]
    UnknownFeature(String),

    #[error("feature {name} declares {count} types; at most {MAX_FEATURE_TYPES} are supported")]
    TooManyTypes { name: String, count: usize },

    #[error("unification groups cannot be nested")]
    NestedUnify,

    #[error("a pattern takes at most one marker, outside phrases")]
    MisplacedMarker,

    #[error("{action} declares {readings} readings but the marker matches {tokens} tokens")]
    ReadingCountMismatch {
        action: &'static str,
        readings: usize,
        tokens: usize,
    },

    #[error("{action} applies to a single token but the marker matches {tokens} tokens")]
    MultiTokenAction { action: &'static str, tokens: usize },

    #[error("unify declares {unified} unified tokens but the marker has {tokens} elements")]
    UnifyCountMismatch { unified: usize, tokens: usize },

    #[error("{0} needs readings or a POS target")]
    MissingTarget(&'static str),
}

/// An executable pattern rule
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub id: String,
    pub sub_id: String,
    pub description: String,
    pub elements: Vec<PatternElement>,
    /// Number of elements contributed by each declared position
    pub element_no: Vec<usize>,
    /// Element indices whose tokens form the reported span
    pub marker: Range<usize>,
    pub message: Template,
    pub short_message: Option<Template>,
    pub suggestions_out_msg: Vec<Template>,
    /// Sibling of other rules expanded from the same phrase alternatives
    pub disjunctive: bool,
    pub allow_overlap: bool,
    pub unifier: Arc<Unifier>,
    pub examples: Vec<ExampleDef>,
    pub location: SourceLocation,
    simple_tokens: OnceCell<FxHashSet<String>>,
    inflected_tokens: OnceCell<FxHashSet<String>>,
}

impl CompiledRule {
    /// Lowercase surface literals every match must contain
    pub fn simple_tokens(&self) -> &FxHashSet<String> {
        self.simple_tokens.get_or_init(|| self.required_literals(false))
    }

    /// Lowercase lemma literals every match must contain
    pub fn inflected_tokens(&self) -> &FxHashSet<String> {
        self.inflected_tokens.get_or_init(|| self.required_literals(true))
    }

    fn required_literals(&self, inflected: bool) -> FxHashSet<String> {
        self.elements
            .iter()
            .filter_map(PatternElement::fast_reject_literal)
            .filter(|(_, is_inflected)| *is_inflected == inflected)
            .map(|(literal, _)| literal)
            .collect()
    }

    pub fn is_member_of_disjunctive_set(&self) -> bool {
        self.disjunctive
    }

    /// Number of declared pattern positions
    pub fn position_count(&self) -> usize {
        self.element_no.len()
    }

    /// "ID[sub]" identifier used in logs
    pub fn full_id(&self) -> String {
        format!("{}[{}]", self.id, self.sub_id)
    }

    /// Token count of the marker span if it cannot vary between matches
    pub fn fixed_marker_len(&self) -> Option<usize> {
        fixed_span(&self.elements[self.marker.clone()])
    }

    /// Number of marker elements inside unification groups
    pub fn marker_unified_count(&self) -> usize {
        self.elements[self.marker.clone()]
            .iter()
            .filter(|e| e.unify.is_some())
            .count()
    }
}

fn fixed_span(elements: &[PatternElement]) -> Option<usize> {
    let mut total = 0;
    for (i, element) in elements.iter().enumerate() {
        match element.max {
            Bound::Limited(max) if max == element.min => total += max,
            _ => return None,
        }
        if i + 1 < elements.len() && element.skip_next != Bound::Limited(0) {
            return None;
        }
    }
    Some(total)
}

/// A pattern after flattening, before messages and actions are attached
#[derive(Debug)]
struct CompiledPattern {
    elements: Vec<PatternElement>,
    element_no: Vec<usize>,
    marker: Range<usize>,
}

/// One element of a flattened pattern, still referring to its definition
#[derive(Debug, Clone)]
struct Planned<'a> {
    group: &'a TokenGroupDef,
    position: usize,
    in_marker: bool,
    unify: Option<usize>,
}

#[derive(Debug, Clone)]
struct UnifyGroupPlan {
    features: Vec<usize>,
    negate: bool,
}

/// Context threaded through pattern flattening
#[derive(Debug, Clone, Copy)]
struct Scope<'p> {
    in_marker: bool,
    unify: Option<usize>,
    /// Set inside a phrase: every token shares this declared position
    phrase_position: Option<usize>,
    phrase_name: Option<&'p str>,
    depth: usize,
}

/// Compiles rule definitions against a file's phrases and features
#[derive(Debug, Clone)]
pub struct RuleCompiler {
    phrases: FxHashMap<String, PhraseDef>,
    unifier: Arc<Unifier>,
}

impl RuleCompiler {
    /// Build a compiler from the phrases and unification features of a file
    pub fn new(file: &RuleFile) -> Result<Self, CompileError> {
        let mut unifier = Unifier::new();
        for feature in &file.features {
            let fail = |kind| CompileError {
                location: feature.location,
                rule_id: format!("unification {}", feature.name),
                kind,
            };
            if feature.types.len() > MAX_FEATURE_TYPES {
                return Err(fail(CompileErrorKind::TooManyTypes {
                    name: feature.name.clone(),
                    count: feature.types.len(),
                }));
            }
            let mut types = Vec::with_capacity(feature.types.len());
            for (name, def) in &feature.types {
                types.push((name.clone(), compile_condition(def, false).map_err(fail)?));
            }
            unifier.add_feature(Feature {
                name: feature.name.clone(),
                types,
            });
        }

        let phrases = file
            .phrases
            .iter()
            .map(|p| (p.name.clone(), p.clone()))
            .collect();

        Ok(Self {
            phrases,
            unifier: Arc::new(unifier),
        })
    }

    pub fn unifier(&self) -> &Arc<Unifier> {
        &self.unifier
    }

    /// Compile a grammar rule; phrase alternatives yield several siblings
    pub fn compile_rule(&self, def: &RuleDef) -> Result<Vec<CompiledRule>, CompileError> {
        let patterns = self.compile_pattern(&def.id, &def.pattern)?;
        let disjunctive = patterns.len() > 1;
        let fail = |kind| CompileError {
            location: def.location,
            rule_id: def.id.clone(),
            kind,
        };

        let positions = patterns.first().map_or(0, |p| p.element_no.len());
        let message = checked_template(&def.message, positions).map_err(fail)?;
        let short_message = match &def.short_message {
            Some(s) => Some(checked_template(s, positions).map_err(fail)?),
            None => None,
        };
        let suggestions_out_msg = def
            .suggestions
            .iter()
            .map(|s| checked_template(s, positions))
            .collect::<Result<Vec<_>, _>>()
            .map_err(fail)?;

        Ok(patterns
            .into_iter()
            .map(|pattern| CompiledRule {
                id: def.id.clone(),
                sub_id: def.sub_id.clone(),
                description: def.description.clone(),
                elements: pattern.elements,
                element_no: pattern.element_no,
                marker: pattern.marker,
                message: message.clone(),
                short_message: short_message.clone(),
                suggestions_out_msg: suggestions_out_msg.clone(),
                disjunctive,
                allow_overlap: def.allow_overlap,
                unifier: Arc::clone(&self.unifier),
                examples: def.examples.clone(),
                location: def.location,
                simple_tokens: OnceCell::new(),
                inflected_tokens: OnceCell::new(),
            })
            .collect())
    }

    /// Compile a disambiguation rule and validate its action
    pub fn compile_disambiguation(
        &self,
        def: &DisambiguationDef,
    ) -> Result<Vec<DisambiguationRule>, CompileError> {
        let patterns = self.compile_pattern(&def.id, &def.pattern)?;
        let disjunctive = patterns.len() > 1;
        let fail = |kind| CompileError {
            location: def.action.location,
            rule_id: def.id.clone(),
            kind,
        };

        let mut rules = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let rule = CompiledRule {
                id: def.id.clone(),
                sub_id: "1".to_string(),
                description: def.description.clone(),
                elements: pattern.elements,
                element_no: pattern.element_no,
                marker: pattern.marker,
                message: Template::default(),
                short_message: None,
                suggestions_out_msg: Vec::new(),
                disjunctive,
                allow_overlap: false,
                unifier: Arc::clone(&self.unifier),
                examples: Vec::new(),
                location: def.location,
                simple_tokens: OnceCell::new(),
                inflected_tokens: OnceCell::new(),
            };
            let action = compile_action(def, &rule).map_err(fail)?;
            rules.push(DisambiguationRule {
                rule,
                action,
                examples: def.examples.clone(),
            });
        }
        Ok(rules)
    }

    /// Flatten and compile a pattern into one element list per combination
    /// of phrase alternatives
    fn compile_pattern(
        &self,
        rule_id: &str,
        pattern: &PatternDef,
    ) -> Result<Vec<CompiledPattern>, CompileError> {
        let mut flattener = Flattener {
            compiler: self,
            rule_id,
            groups: Vec::new(),
            marker_seen: false,
            positions: 0,
        };
        let scope = Scope {
            in_marker: false,
            unify: None,
            phrase_position: None,
            phrase_name: None,
            depth: 0,
        };
        let plans = flattener.expand(&pattern.items, scope, vec![Vec::new()])?;

        if flattener.positions == 0 {
            return Ok(Vec::new());
        }

        plans
            .into_iter()
            .map(|plan| {
                self.build_pattern(
                    rule_id,
                    &plan,
                    &flattener.groups,
                    flattener.positions,
                    pattern.case_sensitive,
                )
            })
            .collect()
    }

    fn build_pattern(
        &self,
        rule_id: &str,
        plan: &[Planned],
        groups: &[UnifyGroupPlan],
        positions: usize,
        case_sensitive: bool,
    ) -> Result<CompiledPattern, CompileError> {
        let mut elements = Vec::with_capacity(plan.len());
        let mut element_no = vec![0; positions];

        for planned in plan {
            let fail = |kind| CompileError {
                location: planned.group.first.location,
                rule_id: rule_id.to_string(),
                kind,
            };
            let mut element =
                compile_token_group(planned.group, planned.position, case_sensitive).map_err(fail)?;
            element.unify = planned.unify.and_then(|g| {
                groups.get(g).map(|group| UnifySpec {
                    group: g,
                    features: group.features.clone(),
                    negate: group.negate,
                    last: false,
                })
            });
            element_no[planned.position] += 1;
            elements.push(element);
        }

        // close each unification group at its last element
        for i in 0..elements.len() {
            let group = elements[i].unify.as_ref().map(|u| u.group);
            let next_group = elements
                .get(i + 1)
                .and_then(|e| e.unify.as_ref())
                .map(|u| u.group);
            if let Some(spec) = elements[i].unify.as_mut()
                && group != next_group
            {
                spec.last = true;
            }
        }

        let marker = match (
            plan.iter().position(|p| p.in_marker),
            plan.iter().rposition(|p| p.in_marker),
        ) {
            (Some(first), Some(last)) => first..last + 1,
            _ => 0..elements.len(),
        };

        Ok(CompiledPattern {
            elements,
            element_no,
            marker,
        })
    }
}

/// Expands phrase references and records marker/unification membership
struct Flattener<'c> {
    compiler: &'c RuleCompiler,
    rule_id: &'c str,
    groups: Vec<UnifyGroupPlan>,
    marker_seen: bool,
    positions: usize,
}

impl<'c> Flattener<'c> {
    fn error(&self, location: SourceLocation, kind: CompileErrorKind) -> CompileError {
        CompileError {
            location,
            rule_id: self.rule_id.to_string(),
            kind,
        }
    }

    /// Append `items` to every partial plan in `prefixes`
    fn expand<'a>(
        &mut self,
        items: &'a [PatternItem],
        scope: Scope<'a>,
        mut prefixes: Vec<Vec<Planned<'a>>>,
    ) -> Result<Vec<Vec<Planned<'a>>>, CompileError>
    where
        'c: 'a,
    {
        let compiler = self.compiler;
        for item in items {
            prefixes = match item {
                PatternItem::Token(group) => {
                    let position = self.next_position(scope);
                    for prefix in prefixes.iter_mut() {
                        prefix.push(Planned {
                            group,
                            position,
                            in_marker: scope.in_marker,
                            unify: scope.unify,
                        });
                    }
                    prefixes
                }
                PatternItem::Phrase(name, location) => {
                    let Some(phrase) = compiler.phrases.get(name) else {
                        return Err(self.error(*location, CompileErrorKind::UnknownPhrase(name.clone())));
                    };
                    if scope.depth >= MAX_PHRASE_DEPTH || scope.phrase_name == Some(name.as_str()) {
                        return Err(self.error(*location, CompileErrorKind::RecursivePhrase(name.clone())));
                    }
                    let position = self.next_position(scope);
                    let inner = Scope {
                        phrase_position: Some(position),
                        phrase_name: Some(phrase.name.as_str()),
                        depth: scope.depth + 1,
                        ..scope
                    };
                    let mut expanded = Vec::new();
                    for alternative in &phrase.alternatives {
                        expanded.extend(self.expand(alternative, inner, prefixes.clone())?);
                    }
                    expanded
                }
                PatternItem::Marker(inner_items, location) => {
                    if self.marker_seen || scope.phrase_position.is_some() {
                        return Err(self.error(*location, CompileErrorKind::MisplacedMarker));
                    }
                    self.marker_seen = true;
                    let inner = Scope {
                        in_marker: true,
                        ..scope
                    };
                    self.expand(inner_items, inner, prefixes)?
                }
                PatternItem::Unify(group) => {
                    if scope.unify.is_some() {
                        return Err(self.error(group.location, CompileErrorKind::NestedUnify));
                    }
                    let mut features = Vec::with_capacity(group.features.len());
                    for name in &group.features {
                        let Some(index) = compiler.unifier.feature_index(name) else {
                            return Err(self.error(group.location, CompileErrorKind::UnknownFeature(name.clone())));
                        };
                        features.push(index);
                    }
                    self.groups.push(UnifyGroupPlan {
                        features,
                        negate: group.negate,
                    });
                    let inner = Scope {
                        unify: Some(self.groups.len() - 1),
                        ..scope
                    };
                    self.expand(&group.items, inner, prefixes)?
                }
            };
        }
        Ok(prefixes)
    }

    fn next_position(&mut self, scope: Scope) -> usize {
        match scope.phrase_position {
            Some(position) => position,
            None => {
                self.positions += 1;
                self.positions - 1
            }
        }
    }
}

/// Compile a template and check its references against the position count
fn checked_template(source: &str, positions: usize) -> Result<Template, CompileErrorKind> {
    let template = Template::parse(source)?;
    for reference in template.references() {
        if reference.position == 0 || reference.position > positions {
            return Err(CompileErrorKind::BadReference {
                position: reference.position,
                max: positions,
            });
        }
    }
    Ok(template)
}

fn compile_value(value: &ValueDef, case_sensitive: bool) -> Result<StringMatcher, regex::Error> {
    match value {
        ValueDef::Literal(s) => Ok(StringMatcher::literal(s, case_sensitive)),
        ValueDef::Regex(s) => StringMatcher::regex(s, case_sensitive),
    }
}

fn compile_condition(def: &ConditionDef, pattern_case: bool) -> Result<TokenCondition, CompileErrorKind> {
    let case_sensitive = def.case_sensitive || pattern_case;
    let text = match &def.text {
        Some(value) => Some(compile_value(value, case_sensitive)?),
        None => None,
    };
    let pos = match &def.pos {
        Some(value) => Some(compile_value(value, true)?),
        None => None,
    };
    let reference = match &def.reference {
        Some(reference) => Some(Reference::from_def(reference)?),
        None => None,
    };
    Ok(TokenCondition {
        text,
        inflected: def.inflected,
        pos,
        negate_pos: def.negate_pos,
        negate: def.negate,
        case_sensitive,
        space_before: def.space_before,
        reference,
    })
}

/// Check that a backreference in a condition points strictly backwards
fn check_backward(condition: &TokenCondition, position: usize) -> Result<(), CompileErrorKind> {
    if let Some(reference) = &condition.reference
        && (reference.position == 0 || reference.position > position)
    {
        return Err(CompileErrorKind::BadReference {
            position: reference.position,
            max: position,
        });
    }
    Ok(())
}

fn compile_token_group(
    group: &TokenGroupDef,
    position: usize,
    case_sensitive: bool,
) -> Result<PatternElement, CompileErrorKind> {
    let first = &group.first;
    match first.max {
        Bound::Limited(0) => return Err(CompileErrorKind::ZeroMax),
        Bound::Limited(max) if max < first.min => {
            return Err(CompileErrorKind::MinExceedsMax {
                min: first.min,
                max,
            });
        }
        _ => {}
    }

    let condition = compile_condition(&first.condition, case_sensitive)?;
    check_backward(&condition, position)?;
    let mut element = PatternElement::new(condition);
    element.min = first.min;
    element.max = first.max;
    element.skip_next = first.skip;
    element.position = position;

    for token in std::iter::once(first).chain(group.and_group.iter()) {
        for exception in &token.exceptions {
            let condition = compile_condition(&exception.condition, case_sensitive)?;
            check_backward(&condition, position)?;
            element.exceptions.push(Exception {
                condition,
                scope: exception.scope,
            });
        }
    }

    for sibling in &group.and_group {
        if !sibling.has_default_quantifiers() {
            return Err(CompileErrorKind::AndGroupQuantifier);
        }
        let condition = compile_condition(&sibling.condition, case_sensitive)?;
        check_backward(&condition, position)?;
        element.and_group.push(condition);
    }

    Ok(element)
}

fn check_reading_count(
    action: &'static str,
    readings: usize,
    tokens: Option<usize>,
) -> Result<(), CompileErrorKind> {
    match tokens {
        Some(tokens) if tokens != readings => Err(CompileErrorKind::ReadingCountMismatch {
            action,
            readings,
            tokens,
        }),
        _ => Ok(()),
    }
}

fn check_single_token(action: &'static str, tokens: Option<usize>) -> Result<(), CompileErrorKind> {
    match tokens {
        Some(tokens) if tokens != 1 => Err(CompileErrorKind::MultiTokenAction { action, tokens }),
        _ => Ok(()),
    }
}

fn compile_action(
    def: &DisambiguationDef,
    rule: &CompiledRule,
) -> Result<DisambiguationAction, CompileErrorKind> {
    let tokens = rule.fixed_marker_len();
    let readings: Vec<Reading> = def
        .readings
        .iter()
        .map(|r| Reading {
            lemma: r.lemma.clone(),
            pos: r.pos.clone(),
        })
        .collect();

    let action = match def.action.kind {
        ActionKind::Replace => {
            if readings.is_empty() {
                check_single_token("replace", tokens)?;
            } else {
                check_reading_count("replace", readings.len(), tokens)?;
            }
            DisambiguationAction::Replace {
                readings,
                pos: def.action.pos.as_ref().map(|p| p.as_str().to_string()),
            }
        }
        ActionKind::Add => {
            if readings.is_empty() {
                return Err(CompileErrorKind::MissingTarget("add"));
            }
            check_reading_count("add", readings.len(), tokens)?;
            DisambiguationAction::Add(readings)
        }
        ActionKind::Remove => {
            if !readings.is_empty() {
                check_reading_count("remove", readings.len(), tokens)?;
                DisambiguationAction::Remove(RemoveTarget::PerToken(readings))
            } else if def.action.pos.is_some() || def.action.lemma.is_some() {
                let pos = match &def.action.pos {
                    Some(value) => Some(compile_value(value, true)?),
                    None => None,
                };
                DisambiguationAction::Remove(RemoveTarget::Matching {
                    lemma: def.action.lemma.clone(),
                    pos,
                })
            } else {
                return Err(CompileErrorKind::MissingTarget("remove"));
            }
        }
        ActionKind::Filter => {
            check_single_token("filter", tokens)?;
            let Some(pos) = &def.action.pos else {
                return Err(CompileErrorKind::MissingTarget("filter"));
            };
            let position = rule
                .elements
                .get(rule.marker.start)
                .map_or(1, |e| e.position + 1);
            let mut reference = Reference::to_position(position);
            reference.pos_filter = Some(compile_value(pos, true)?);
            reference.pos_replace = def.action.pos_replace.clone();
            DisambiguationAction::Filter(reference)
        }
        ActionKind::Unify => {
            let unified = rule.marker_unified_count();
            let marker_elements = rule.marker.len();
            if unified != marker_elements {
                return Err(CompileErrorKind::UnifyCountMismatch {
                    unified,
                    tokens: marker_elements,
                });
            }
            DisambiguationAction::Unify
        }
        ActionKind::Immunize => DisambiguationAction::Immunize,
        ActionKind::IgnoreSpelling => DisambiguationAction::IgnoreSpelling,
    };
    Ok(action)
}
