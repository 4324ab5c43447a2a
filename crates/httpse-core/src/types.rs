//! Core type definitions shared by the store, the engine and the service.

use serde::{Deserialize, Serialize};

/// Opaque per-request identifier assigned by the caller.
///
/// The engine never interprets it; it only keys the redirect guard.
pub type RequestId = u64;

// =============================================================================
// Rule Definitions (uncompiled, as stored)
// =============================================================================

/// A rewrite rule in its stored, source-dialect form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleDef {
    /// Matching pattern (source regex dialect)
    pub from: String,
    /// Replacement template (source dialect, `$1` back-references)
    pub to: String,
    /// Patterns that veto this rule when any of them matches the URL
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclusions: Vec<String>,
}

impl RuleDef {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            exclusions: Vec::new(),
        }
    }

    /// Add an exclusion pattern, builder style.
    pub fn with_exclusion(mut self, pattern: impl Into<String>) -> Self {
        self.exclusions.push(pattern.into());
        self
    }
}

/// The ordered rules stored under one host key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRules {
    /// Host key: a hostname or a `*.`-prefixed wildcard
    pub host: String,
    /// Rules in priority order
    pub rules: Vec<RuleDef>,
}

impl HostRules {
    pub fn new(host: impl Into<String>, rules: Vec<RuleDef>) -> Self {
        Self {
            host: host.into(),
            rules,
        }
    }
}

// =============================================================================
// Rewrite Outcome
// =============================================================================

/// Result of evaluating a URL against the rule store.
///
/// Both variants are cached: a negative answer is as valuable as a positive one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome {
    /// A rule produced this upgraded URL
    Rewrite(String),
    /// No rule applies to the URL
    NoRule,
}

impl RewriteOutcome {
    /// The rewritten URL, if any.
    pub fn rewritten_url(&self) -> Option<&str> {
        match self {
            Self::Rewrite(url) => Some(url),
            Self::NoRule => None,
        }
    }

    pub fn is_rewrite(&self) -> bool {
        matches!(self, Self::Rewrite(_))
    }
}
