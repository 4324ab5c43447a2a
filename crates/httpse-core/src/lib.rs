//! HTTPS Upgrade Core Library
//!
//! This crate decides whether a requested URL should be rewritten to an HTTPS
//! (or otherwise upgraded) equivalent, using a persisted, host-indexed rule store.
//!
//! # Architecture
//!
//! Rules live in a binary snapshot (HXS format) that is validated once at open
//! and then read without locks. Each lookup walks the request host's suffixes,
//! evaluates the matching rule sets in stored order, and caches the outcome.
//! A per-request guard bounds how many times one logical request may be
//! rewritten so that pathological rule interactions cannot loop forever.
//!
//! # Modules
//!
//! - `hash`: Murmur3 host-key hashing and CRC32
//! - `host`: host normalization and suffix-walk key expansion
//! - `url`: URL normalization and rewrite eligibility
//! - `translate`: rule dialect translation (pure functions)
//! - `store`: HXS snapshot format, loader, writer and the `RuleStore`
//! - `engine`: rule evaluation
//! - `cache`: bounded LRU of rewrite outcomes
//! - `guard`: per-request redirect counters
//! - `config`: service configuration
//! - `service`: the caller-facing façade
//! - `types`: shared type definitions

pub mod cache;
pub mod config;
pub mod engine;
pub mod guard;
pub mod hash;
pub mod host;
pub mod service;
pub mod store;
pub mod translate;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use cache::{CacheStats, RecencyCache};
pub use config::{ConfigError, ServiceConfig};
pub use engine::{MatchApplicationError, Rule, RuleEngine, RuleSet};
pub use guard::RedirectGuard;
pub use service::{HttpsUpgradeService, ServiceError};
pub use store::{MemoryRuleSource, RuleSource, RuleStore, StoreError, StoreStats};
pub use translate::RuleParseError;
pub use types::{HostRules, RequestId, RewriteOutcome, RuleDef};
