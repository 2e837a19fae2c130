//! Grammatical feature unification
//!
//! A unification group requires tokens to agree on one or more features
//! (number, gender, ...). Each feature has up to 64 named types, each
//! recognised by a token condition; a token's admissible types for a feature
//! form a bit mask, and agreement across a span is a non-empty intersection
//! of masks for every feature.

use crate::element::TokenCondition;
use crate::token::Token;

/// Maximum number of types per feature (one bit each)
pub const MAX_FEATURE_TYPES: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub name: String,
    pub types: Vec<(String, TokenCondition)>,
}

impl Feature {
    /// Bit mask of the types `token` is compatible with
    pub fn mask(&self, token: &Token) -> u64 {
        self.types
            .iter()
            .enumerate()
            .filter(|(_, (_, condition))| condition.is_match(token, None))
            .fold(0u64, |mask, (i, _)| mask | (1u64 << i))
    }
}

/// The feature table shared by every rule of a rule set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Unifier {
    features: Vec<Feature>,
}

impl Unifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a feature, returning its index
    ///
    /// Callers guarantee at most [`MAX_FEATURE_TYPES`] types.
    pub fn add_feature(&mut self, feature: Feature) -> usize {
        debug_assert!(feature.types.len() <= MAX_FEATURE_TYPES);
        self.features.push(feature);
        self.features.len() - 1
    }

    pub fn feature_index(&self, name: &str) -> Option<usize> {
        self.features.iter().position(|f| f.name == name)
    }

    pub fn feature(&self, index: usize) -> Option<&Feature> {
        self.features.get(index)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Unification membership of a pattern element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnifySpec {
    /// Group number within the rule
    pub group: usize,
    /// Indices into the [`Unifier`] feature table
    pub features: Vec<usize>,
    pub negate: bool,
    /// The group closes after this element
    pub last: bool,
}

/// Per-attempt accumulator of admissible feature types across a span
///
/// Cloned into every search branch; never shared between attempts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnificationContext {
    masks: Vec<u64>,
    tokens: usize,
}

impl UnificationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intersect the accumulator with `token`'s admissible types
    ///
    /// Returns whether the tokens seen so far still agree.
    pub fn unify_token(&mut self, unifier: &Unifier, features: &[usize], token: &Token) -> bool {
        let masks = features
            .iter()
            .map(|&f| unifier.feature(f).map_or(0, |feature| feature.mask(token)));
        if self.tokens == 0 {
            self.masks = masks.collect();
        } else {
            for (acc, mask) in self.masks.iter_mut().zip(masks) {
                *acc &= mask;
            }
        }
        self.tokens += 1;
        self.agrees()
    }

    /// True while every feature still has at least one admissible type
    pub fn agrees(&self) -> bool {
        self.masks.iter().all(|&m| m != 0)
    }

    /// Final verdict for a closing group
    ///
    /// An empty group vacuously agrees, so it satisfies a plain group and
    /// fails a negated one.
    pub fn is_satisfied(&self, negate: bool) -> bool {
        if self.tokens == 0 {
            return !negate;
        }
        self.agrees() != negate
    }

    /// Number of tokens unified so far
    pub fn token_count(&self) -> usize {
        self.tokens
    }

    pub fn reset(&mut self) {
        self.masks.clear();
        self.tokens = 0;
    }
}
