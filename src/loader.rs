//! Loading rule files
//!
//! Loading is strict: a syntax error, or any rule that fails to compile,
//! fails the whole file.

use crate::compiler::{CompileError, CompiledRule, RuleCompiler};
use crate::disambig::{DisambiguationRule, Disambiguator};
use crate::matcher::MatchOptions;
use crate::parser::{ParseError, parse_rules};
use crate::pattern::RuleFile;
use crate::selftest::{ExampleFailure, validate_disambiguation_examples, validate_grammar_examples};
use crate::tokenizer::Analyzer;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

/// Error type for rule loading
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read rule file: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("{} rule examples failed", .0.len())]
    Examples(Vec<ExampleFailure>),
}

/// Compiled grammar and disambiguation rules, in declaration order
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub grammar: Vec<CompiledRule>,
    pub disambiguation: Vec<DisambiguationRule>,
}

impl RuleSet {
    pub fn compile(file: &RuleFile) -> Result<Self, CompileError> {
        let compiler = RuleCompiler::new(file)?;
        let mut set = Self::default();
        for def in &file.rules {
            set.grammar.extend(compiler.compile_rule(def)?);
        }
        for def in &file.disambiguations {
            set.disambiguation.extend(compiler.compile_disambiguation(def)?);
        }
        Ok(set)
    }

    /// Number of compiled rules of both kinds
    pub fn len(&self) -> usize {
        self.grammar.len() + self.disambiguation.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grammar.is_empty() && self.disambiguation.is_empty()
    }

    /// Append the rules of another set, keeping order
    pub fn extend(&mut self, other: RuleSet) {
        self.grammar.extend(other.grammar);
        self.disambiguation.extend(other.disambiguation);
    }
}

/// Parse and compile rule source
pub fn load_rules(source: &str) -> Result<RuleSet, LoadError> {
    let file = parse_rules(source).inspect_err(|e| warn!(error = %e, "rule file rejected"))?;
    let set = RuleSet::compile(&file).inspect_err(|e| warn!(error = %e, "rule file rejected"))?;
    debug!(
        grammar = set.grammar.len(),
        disambiguation = set.disambiguation.len(),
        "rules loaded"
    );
    Ok(set)
}

pub fn load_rule_file(path: &Path) -> Result<RuleSet, LoadError> {
    let source = std::fs::read_to_string(path)?;
    load_rules(&source)
}

/// Load rules and run their examples
///
/// Grammar examples are checked after the file's own disambiguation rules
/// have run.
pub fn load_validated(
    source: &str,
    analyzer: &dyn Analyzer,
    options: MatchOptions,
) -> Result<RuleSet, LoadError> {
    let set = load_rules(source)?;

    let mut failures = validate_disambiguation_examples(&set.disambiguation, analyzer, options);
    let disambiguator = Disambiguator::new(set.disambiguation.clone(), options);
    failures.extend(validate_grammar_examples(&set.grammar, &disambiguator, analyzer, options));

    if failures.is_empty() {
        Ok(set)
    } else {
        for failure in &failures {
            warn!(%failure, "rule example failed");
        }
        Err(LoadError::Examples(failures))
    }
}
