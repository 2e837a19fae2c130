//! Rule file parser
//!
//! Parses rule files into the definition tree of [`crate::pattern`] using a
//! pest grammar. Parsing is purely structural: regexes, phrase names and
//! backreferences are checked later by the compiler.

use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;
use thiserror::Error;

use crate::pattern::{
    ActionDef, ActionKind, Bound, ConditionDef, DisambiguationDef, DisambiguationExampleDef,
    ExampleDef, ExceptionDef, ExceptionScope, FeatureDef, PatternDef, PatternItem, PhraseDef,
    ReadingDef, ReferenceDef, RuleDef, RuleFile, SourceLocation, TokenDef, TokenGroupDef,
    UnifyGroupDef, ValueDef,
};

#[derive(Parser)]
#[grammar = "rules.pest"]
struct RuleFileParser;

/// Error type for rule file parsing failures
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Rule file error: {0}")]
    Syntax(#[from] pest::error::Error<Rule>),

    #[error("Rule file error at {location}: {message}")]
    Invalid {
        location: SourceLocation,
        message: String,
    },
}

fn invalid(pair: &Pair<Rule>, message: impl Into<String>) -> ParseError {
    ParseError::Invalid {
        location: location(pair),
        message: message.into(),
    }
}

fn location(pair: &Pair<Rule>) -> SourceLocation {
    let (line, column) = pair.as_span().start_pos().line_col();
    SourceLocation::new(line, column)
}

/// Strip the quotes of a string literal and resolve `\"`
fn string_value(pair: Pair<Rule>) -> String {
    let inner = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
    inner.replace("\\\"", "\"")
}

/// Parse a rule file into its definition tree
pub fn parse_rules(input: &str) -> Result<RuleFile, ParseError> {
    let mut pairs = RuleFileParser::parse(Rule::file, input)?;
    let mut file = RuleFile::default();

    let Some(file_pair) = pairs.next() else {
        return Ok(file);
    };

    for definition in file_pair.into_inner() {
        match definition.as_rule() {
            Rule::unification => file.features.push(parse_unification(definition)?),
            Rule::phrase => file.phrases.push(parse_phrase(definition)?),
            Rule::group => parse_group(definition, &mut file.rules)?,
            Rule::rule => {
                let rule = parse_rule(definition, None, None, 1)?;
                file.rules.push(rule);
            }
            Rule::disambig => file.disambiguations.push(parse_disambig(definition)?),
            Rule::EOI => {}
            _ => return Err(invalid(&definition, "Unexpected definition")),
        }
    }

    Ok(file)
}

/// Parse a unification feature: name { type = conditions; ... }
fn parse_unification(pair: Pair<Rule>) -> Result<FeatureDef, ParseError> {
    let loc = location(&pair);
    let mut inner = pair.into_inner();
    let name = inner.next().map(|p| p.as_str().to_string()).unwrap_or_default();

    let mut types = Vec::new();
    for feature_type in inner {
        let mut parts = feature_type.into_inner();
        let Some(type_name) = parts.next() else {
            continue;
        };
        let mut condition = ConditionDef::default();
        for attr in parts {
            if !apply_condition_attr(attr.clone(), &mut condition)? {
                return Err(invalid(&attr, "Only token conditions are allowed in a unification type"));
            }
        }
        types.push((type_name.as_str().to_string(), condition));
    }

    Ok(FeatureDef {
        name,
        types,
        location: loc,
    })
}

fn parse_phrase(pair: Pair<Rule>) -> Result<PhraseDef, ParseError> {
    let loc = location(&pair);
    let mut inner = pair.into_inner();
    let name = inner.next().map(|p| p.as_str().to_string()).unwrap_or_default();

    let alternatives = inner
        .map(|alternative| parse_items(alternative.into_inner()))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PhraseDef {
        name,
        alternatives,
        location: loc,
    })
}

/// Parse a rule group; member rules share the id and get running sub ids
fn parse_group(pair: Pair<Rule>, rules: &mut Vec<RuleDef>) -> Result<(), ParseError> {
    let mut id = String::new();
    let mut description = None;
    let mut sub_id = 1;

    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::ident => id = part.as_str().to_string(),
            Rule::string => description = Some(string_value(part)),
            Rule::rule => {
                rules.push(parse_rule(part, Some(&id), description.as_deref(), sub_id)?);
                sub_id += 1;
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_rule(
    pair: Pair<Rule>,
    group_id: Option<&str>,
    group_description: Option<&str>,
    sub_id: usize,
) -> Result<RuleDef, ParseError> {
    let loc = location(&pair);
    let mut id = group_id.map(str::to_string);
    let mut description = group_description.map(str::to_string);
    let mut pattern = None;
    let mut message = String::new();
    let mut short_message = None;
    let mut suggestions = Vec::new();
    let mut allow_overlap = false;
    let mut examples = Vec::new();

    for part in pair.clone().into_inner() {
        match part.as_rule() {
            Rule::ident => {
                if group_id.is_some() {
                    return Err(invalid(&part, "Rules inside a group take the group id"));
                }
                id = Some(part.as_str().to_string());
            }
            Rule::string => description = Some(string_value(part)),
            Rule::pattern => pattern = Some(parse_pattern(part)?),
            Rule::message => message = first_string(part),
            Rule::short => short_message = Some(first_string(part)),
            Rule::suggestion => suggestions.push(first_string(part)),
            Rule::overlap => allow_overlap = true,
            Rule::example => examples.push(parse_rule_example(part)?),
            _ => {}
        }
    }

    let Some(id) = id else {
        return Err(invalid(&pair, "Rule without id"));
    };
    let Some(pattern) = pattern else {
        return Err(invalid(&pair, format!("Rule {id} has no pattern")));
    };

    Ok(RuleDef {
        id,
        sub_id: sub_id.to_string(),
        description: description.unwrap_or_default(),
        pattern,
        message,
        short_message,
        suggestions,
        allow_overlap,
        examples,
        location: loc,
    })
}

fn first_string(pair: Pair<Rule>) -> String {
    pair.into_inner()
        .find(|p| p.as_rule() == Rule::string)
        .map(string_value)
        .unwrap_or_default()
}

fn parse_pattern(pair: Pair<Rule>) -> Result<PatternDef, ParseError> {
    let mut case_sensitive = false;
    let mut items = Vec::new();

    for part in pair.into_inner() {
        if part.as_rule() == Rule::case_flag {
            case_sensitive = true;
        } else {
            items.push(parse_item(part)?);
        }
    }

    Ok(PatternDef {
        case_sensitive,
        items,
    })
}

fn parse_items(pairs: pest::iterators::Pairs<Rule>) -> Result<Vec<PatternItem>, ParseError> {
    pairs.map(parse_item).collect()
}

/// Parse one pattern item: token group, phrase reference, marker or unify block
fn parse_item(pair: Pair<Rule>) -> Result<PatternItem, ParseError> {
    let loc = location(&pair);
    match pair.as_rule() {
        Rule::token_group => {
            let mut tokens = pair
                .into_inner()
                .map(parse_token)
                .collect::<Result<Vec<_>, _>>()?
                .into_iter();
            let Some(first) = tokens.next() else {
                return Err(ParseError::Invalid {
                    location: loc,
                    message: "Empty token group".to_string(),
                });
            };
            Ok(PatternItem::Token(TokenGroupDef {
                first,
                and_group: tokens.collect(),
            }))
        }
        Rule::phrase_ref => {
            let name = pair
                .into_inner()
                .next()
                .map(|p| p.as_str().to_string())
                .unwrap_or_default();
            Ok(PatternItem::Phrase(name, loc))
        }
        Rule::marker => Ok(PatternItem::Marker(parse_items(pair.into_inner())?, loc)),
        Rule::unify_block => {
            let mut negate = false;
            let mut features = Vec::new();
            let mut items = Vec::new();
            for part in pair.into_inner() {
                match part.as_rule() {
                    Rule::unify_kw => negate = part.as_str() == "unify!",
                    Rule::ident => features.push(part.as_str().to_string()),
                    _ => items.push(parse_item(part)?),
                }
            }
            Ok(PatternItem::Unify(UnifyGroupDef {
                features,
                negate,
                items,
                location: loc,
            }))
        }
        _ => Err(invalid(&pair, "Unexpected pattern item")),
    }
}

/// Parse a bracketed token: [attr, attr, ...]
fn parse_token(pair: Pair<Rule>) -> Result<TokenDef, ParseError> {
    let mut token = TokenDef::new(ConditionDef::default());
    token.location = location(&pair);

    for attr in pair.into_inner() {
        match attr.as_rule() {
            Rule::exception => token.exceptions.push(parse_exception(attr)?),
            Rule::key_value => {
                let (key, op, value) = key_value_parts(attr.clone())?;
                match key.as_str() {
                    "min" => token.min = parse_count(&attr, &op, &value)?,
                    "max" => token.max = parse_bound(&attr, &op, &value)?,
                    "skip" => token.skip = parse_bound(&attr, &op, &value)?,
                    _ => {
                        apply_condition_attr(attr, &mut token.condition)?;
                    }
                }
            }
            _ => {
                apply_condition_attr(attr, &mut token.condition)?;
            }
        }
    }

    Ok(token)
}

fn parse_exception(pair: Pair<Rule>) -> Result<ExceptionDef, ParseError> {
    let mut scope = ExceptionScope::Current;
    let mut condition = ConditionDef::default();

    for part in pair.into_inner() {
        if part.as_rule() == Rule::except_kw {
            scope = match part.as_str() {
                "except_next" => ExceptionScope::Next,
                "except_prev" => ExceptionScope::Previous,
                _ => ExceptionScope::Current,
            };
        } else if !apply_condition_attr(part.clone(), &mut condition)? {
            return Err(invalid(&part, "Only token conditions are allowed in an exception"));
        }
    }

    Ok(ExceptionDef { condition, scope })
}

/// Split a key_value pair into (key, op, value text)
fn key_value_parts(pair: Pair<Rule>) -> Result<(String, String, String), ParseError> {
    let loc = location(&pair);
    let mut inner = pair.into_inner();
    let (Some(key), Some(op), Some(value)) = (inner.next(), inner.next(), inner.next()) else {
        return Err(ParseError::Invalid {
            location: loc,
            message: "Incomplete attribute".to_string(),
        });
    };
    let value = match value.as_rule() {
        Rule::string => string_value(value),
        _ => value.as_str().to_string(),
    };
    Ok((key.as_str().to_string(), op.as_str().to_string(), value))
}

/// Apply a condition attribute; returns false for quantifier attributes
/// and exceptions, which conditions cannot carry
fn apply_condition_attr(attr: Pair<Rule>, condition: &mut ConditionDef) -> Result<bool, ParseError> {
    match attr.as_rule() {
        Rule::flag => {
            match attr.as_str() {
                "not" => condition.negate = true,
                _ => condition.case_sensitive = true,
            }
            Ok(true)
        }
        Rule::bare_text => {
            let text = attr
                .into_inner()
                .next()
                .map(string_value)
                .unwrap_or_default();
            set_text(condition, ValueDef::Literal(text), false);
            Ok(true)
        }
        Rule::key_value => {
            let (key, op, value) = key_value_parts(attr.clone())?;
            let negated = op.starts_with('!');
            let value_def = if op.ends_with('~') {
                ValueDef::Regex(value.clone())
            } else {
                ValueDef::Literal(value.clone())
            };
            match key.as_str() {
                "text" | "lemma" => {
                    if condition.text.is_some() {
                        return Err(invalid(&attr, "A token takes one text or lemma condition; use & for more"));
                    }
                    set_text(condition, value_def, key == "lemma");
                    // `!=` and `!~` negate the whole token, like `not`
                    if negated {
                        condition.negate = true;
                    }
                }
                "pos" => {
                    condition.pos = Some(value_def);
                    condition.negate_pos = negated;
                }
                "ref" => {
                    let position = parse_count(&attr, &op, &value)?;
                    condition.reference = Some(ReferenceDef::to_position(position));
                }
                "space" => {
                    condition.space_before = match value.as_str() {
                        "yes" | "true" => Some(true),
                        "no" | "false" => Some(false),
                        _ => return Err(invalid(&attr, format!("Bad space value: {value}"))),
                    };
                }
                _ => return Ok(false),
            }
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn set_text(condition: &mut ConditionDef, value: ValueDef, inflected: bool) {
    condition.text = Some(value);
    condition.inflected = inflected;
}

fn parse_count(pair: &Pair<Rule>, op: &str, value: &str) -> Result<usize, ParseError> {
    if op != "=" {
        return Err(invalid(pair, format!("Expected '=' but found '{op}'")));
    }
    value
        .parse()
        .map_err(|_| invalid(pair, format!("Expected a number but found '{value}'")))
}

fn parse_bound(pair: &Pair<Rule>, op: &str, value: &str) -> Result<Bound, ParseError> {
    if value == "*" {
        return Ok(Bound::Unbounded);
    }
    Ok(Bound::Limited(parse_count(pair, op, value)?))
}

fn parse_rule_example(pair: Pair<Rule>) -> Result<ExampleDef, ParseError> {
    let (kind, text, attrs) = example_parts(pair.clone());
    match kind.as_str() {
        "incorrect" => Ok(ExampleDef::Incorrect {
            text,
            correction: attrs
                .into_iter()
                .find(|(k, _)| k == "correction")
                .map(|(_, v)| v),
        }),
        "correct" => Ok(ExampleDef::Correct(text)),
        _ => Err(invalid(&pair, format!("Example kind '{kind}' is for disambiguation rules"))),
    }
}

fn example_parts(pair: Pair<Rule>) -> (String, String, Vec<(String, String)>) {
    let mut kind = String::new();
    let mut text = String::new();
    let mut attrs = Vec::new();
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::example_kind => kind = part.as_str().to_string(),
            Rule::string => text = string_value(part),
            Rule::example_attr => {
                let mut inner = part.into_inner();
                if let (Some(key), Some(value)) = (inner.next(), inner.next()) {
                    attrs.push((key.as_str().to_string(), string_value(value)));
                }
            }
            _ => {}
        }
    }
    (kind, text, attrs)
}

/// Parse "lemma/POS|lemma/POS" reading lists used by ambiguous examples
pub fn parse_reading_list(list: &str) -> Vec<ReadingDef> {
    list.split('|')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|item| {
            let (lemma, pos) = item.rsplit_once('/').unwrap_or((item, ""));
            ReadingDef {
                lemma: (!lemma.is_empty()).then(|| lemma.to_string()),
                pos: (!pos.is_empty()).then(|| pos.to_string()),
            }
        })
        .collect()
}

fn parse_disambig(pair: Pair<Rule>) -> Result<DisambiguationDef, ParseError> {
    let loc = location(&pair);
    let mut id = String::new();
    let mut description = String::new();
    let mut pattern = None;
    let mut action = None;
    let mut readings = Vec::new();
    let mut examples = Vec::new();

    for part in pair.clone().into_inner() {
        match part.as_rule() {
            Rule::ident => id = part.as_str().to_string(),
            Rule::string => description = string_value(part),
            Rule::pattern => pattern = Some(parse_pattern(part)?),
            Rule::action => {
                if action.is_some() {
                    return Err(invalid(&part, format!("Rule {id} declares more than one action")));
                }
                action = Some(parse_action(part)?);
            }
            Rule::wd => {
                let mut reading = ReadingDef::default();
                for attr in part.into_inner() {
                    let mut inner = attr.into_inner();
                    if let (Some(key), Some(value)) = (inner.next(), inner.next()) {
                        let value = string_value(value);
                        match key.as_str() {
                            "lemma" => reading.lemma = Some(value),
                            _ => reading.pos = Some(value),
                        }
                    }
                }
                readings.push(reading);
            }
            Rule::example => {
                let (kind, text, attrs) = example_parts(part.clone());
                let lookup = |key: &str| {
                    attrs
                        .iter()
                        .find(|(k, _)| k == key)
                        .map(|(_, v)| parse_reading_list(v))
                        .unwrap_or_default()
                };
                let example = match kind.as_str() {
                    "untouched" => DisambiguationExampleDef::Untouched(text),
                    "ambiguous" => DisambiguationExampleDef::Ambiguous {
                        input: lookup("in"),
                        output: lookup("out"),
                        text,
                    },
                    _ => {
                        return Err(invalid(&part, format!("Example kind '{kind}' is for grammar rules")));
                    }
                };
                examples.push(example);
            }
            _ => {}
        }
    }

    let Some(pattern) = pattern else {
        return Err(invalid(&pair, format!("Rule {id} has no pattern")));
    };
    let Some(action) = action else {
        return Err(invalid(&pair, format!("Rule {id} has no action")));
    };

    Ok(DisambiguationDef {
        id,
        description,
        pattern,
        action,
        readings,
        examples,
        location: loc,
    })
}

fn parse_action(pair: Pair<Rule>) -> Result<ActionDef, ParseError> {
    let loc = location(&pair);
    let mut kind = ActionKind::Replace;
    let mut pos = None;
    let mut lemma = None;
    let mut pos_replace = None;

    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::action_kind => {
                kind = match part.as_str() {
                    "add" => ActionKind::Add,
                    "remove" => ActionKind::Remove,
                    "filter" => ActionKind::Filter,
                    "unify" => ActionKind::Unify,
                    "immunize" => ActionKind::Immunize,
                    "ignore_spelling" => ActionKind::IgnoreSpelling,
                    _ => ActionKind::Replace,
                }
            }
            Rule::action_attr => {
                let (key, op, value) = key_value_parts(part.clone())?;
                match key.as_str() {
                    "pos" if op == "~" => pos = Some(ValueDef::Regex(value)),
                    "pos" if op == "=" => pos = Some(ValueDef::Literal(value)),
                    "lemma" if op == "=" => lemma = Some(value),
                    "replace" if op == "=" => pos_replace = Some(value),
                    _ => return Err(invalid(&part, format!("Unsupported action attribute {key}{op}"))),
                }
            }
            _ => {}
        }
    }

    Ok(ActionDef {
        kind,
        pos,
        lemma,
        pos_replace,
        location: loc,
    })
}
