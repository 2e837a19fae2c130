//! Tokenrules: pattern rules over tagged sentences
//!
//! A rule language for grammar checking and POS disambiguation. Rule files
//! are parsed and compiled into token patterns, matched against analyzed
//! sentences by a backtracking engine, and either reported as rule matches
//! or applied as disambiguation actions.

mod macros; // regex! helper

// Data model
pub mod index; // Per-sentence lookup sets for fast rejection
pub mod token; // Tokens, readings and sentences

// Rule language
pub mod compiler; // Rule compilation and validation
pub mod element; // Compiled pattern elements
pub mod parser; // Rule file parser
pub mod pattern; // Rule definition AST
pub mod reference; // Backreferences and message templates
pub mod unify; // Feature unification

// Execution
pub mod checker; // Grammar checking over text
pub mod disambig; // Disambiguation actions
pub mod matcher; // Backtracking match engine
pub mod sentence_start;

// Analysis and loading
pub mod loader; // Rule file loading
pub mod selftest; // Rule example validation
pub mod tagger; // Dictionary tagger
pub mod tokenizer; // Sentence splitting and tokenization

// Re-exports for convenience
pub use checker::{Checker, CheckerOptions, RuleMatch, TextLevelRule};
pub use compiler::{CompileError, CompiledRule, RuleCompiler};
pub use disambig::{DisambiguationAction, DisambiguationRule, Disambiguator};
pub use element::PatternElement;
pub use loader::{LoadError, RuleSet, load_rule_file, load_rules, load_validated};
pub use matcher::{MatchEngine, MatchError, MatchOptions, MatchResult, can_be_ignored};
pub use parser::{ParseError, parse_rules};
pub use reference::{Reference, Template};
pub use sentence_start::UppercaseSentenceStartRule;
pub use tagger::ManualTagger;
pub use token::{Reading, Sentence, Token};
pub use tokenizer::{Analyzer, SimpleAnalyzer};
pub use unify::Unifier;
