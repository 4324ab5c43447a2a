//! Rule Engine
//!
//! Evaluates a request URL against the rule sets stored for its host and the
//! host's parents. The first rule that produces a different, well-formed URL
//! wins. Broken rules and bad rewrites are never fatal: they are logged and
//! evaluation moves on.

use log::{debug, trace, warn};
use regex::Regex;

use crate::host::lookup_keys;
use crate::store::{RuleSource, StoreError};
use crate::translate::{compile_pattern, translate_replacement, RuleParseError};
use crate::types::{HostRules, RewriteOutcome, RuleDef};
use crate::url::{canonicalize_candidate, RequestUrl};

/// A rule matched but its output cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchApplicationError {
    #[error("rewrite left the URL unchanged")]
    Unchanged,
    #[error("rewrite produced an invalid URL '{candidate}'")]
    InvalidUrl { candidate: String },
}

// =============================================================================
// Rule
// =============================================================================

/// A compiled rewrite rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pattern: Regex,
    replacement: String,
    exclusions: Vec<Regex>,
}

impl Rule {
    /// Compile a stored rule. Fails if the pattern or any exclusion is unusable.
    pub fn compile(def: &RuleDef) -> Result<Self, RuleParseError> {
        let pattern = compile_pattern(&def.from)?;
        let exclusions = def
            .exclusions
            .iter()
            .map(|e| compile_pattern(e))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            replacement: translate_replacement(&def.to, &pattern),
            pattern,
            exclusions,
        })
    }

    pub fn is_excluded(&self, url: &str) -> bool {
        self.exclusions.iter().any(|re| re.is_match(url))
    }

    /// Apply the rule to a canonical URL.
    ///
    /// `None` when the pattern does not match. Exclusions are not consulted.
    pub fn apply(&self, url: &str) -> Option<Result<String, MatchApplicationError>> {
        if !self.pattern.is_match(url) {
            return None;
        }

        let rewritten = self.pattern.replace(url, self.replacement.as_str());
        let Some(candidate) = canonicalize_candidate(&rewritten) else {
            return Some(Err(MatchApplicationError::InvalidUrl {
                candidate: rewritten.into_owned(),
            }));
        };
        if candidate == url {
            return Some(Err(MatchApplicationError::Unchanged));
        }
        Some(Ok(candidate.into_owned()))
    }
}

// =============================================================================
// RuleSet
// =============================================================================

/// The compiled rules stored under one host key, in priority order.
#[derive(Debug, Clone)]
pub struct RuleSet {
    host: String,
    rules: Vec<Rule>,
    skipped: usize,
}

impl RuleSet {
    /// Compile every rule of `source`, skipping (and logging) unusable ones.
    pub fn compile(source: &HostRules) -> Self {
        let mut rules = Vec::with_capacity(source.rules.len());
        let mut skipped = 0;

        for (idx, def) in source.rules.iter().enumerate() {
            match Rule::compile(def) {
                Ok(rule) => rules.push(rule),
                Err(e) => {
                    warn!("skipping rule #{idx} for '{}': {e}", source.host);
                    skipped += 1;
                }
            }
        }

        Self {
            host: source.host.clone(),
            rules,
            skipped,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules dropped at compile time.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// First usable rewrite of `url`, trying rules in order.
    pub fn rewrite(&self, url: &str) -> Option<String> {
        for (idx, rule) in self.rules.iter().enumerate() {
            if rule.is_excluded(url) {
                trace!("rule #{idx} for '{}' excluded for {url}", self.host);
                continue;
            }
            match rule.apply(url) {
                None => {}
                Some(Ok(rewritten)) => return Some(rewritten),
                Some(Err(e)) => debug!("rule #{idx} for '{}' ignored: {e}", self.host),
            }
        }
        None
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Resolves URLs to rewrite outcomes through a [`RuleSource`].
#[derive(Debug)]
pub struct RuleEngine<S> {
    source: S,
}

impl<S: RuleSource> RuleEngine<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Evaluate `url` against the stored rules.
    ///
    /// Keys are tried most specific first (see [`lookup_keys`]); a rule set
    /// that yields nothing does not stop the walk. Only store failures are
    /// reported as errors.
    pub fn evaluate(&self, url: &RequestUrl) -> Result<RewriteOutcome, StoreError> {
        if !url.is_upgradeable() {
            return Ok(RewriteOutcome::NoRule);
        }

        for key in lookup_keys(url.host_key()) {
            let Some(ruleset) = self.source.lookup_host(&key)? else {
                continue;
            };
            if let Some(rewritten) = ruleset.rewrite(url.as_str()) {
                trace!("{} -> {rewritten} via '{key}'", url.as_str());
                return Ok(RewriteOutcome::Rewrite(rewritten));
            }
        }

        Ok(RewriteOutcome::NoRule)
    }
}
