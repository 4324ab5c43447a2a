//! Ruleset source parser.
//!
//! Input is JSON: either one ruleset object or an array of them.
//!
//! ```json
//! [{
//!   "name": "Example",
//!   "target": ["example.com", "*.example.com"],
//!   "rule": [{"from": "^http:", "to": "https:"}],
//!   "exclusion": ["^http://example\\.com/insecure/"]
//! }]
//! ```
//!
//! Each target becomes its own host entry carrying every rule of the ruleset;
//! ruleset-level exclusions are attached to each of those rules.

use log::{debug, warn};
use serde::Deserialize;

use httpse_core::host::normalize_host;
use httpse_core::{HostRules, RuleDef};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid ruleset JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SourceDocument {
    Many(Vec<RulesetSource>),
    One(RulesetSource),
}

#[derive(Debug, Deserialize)]
struct RulesetSource {
    #[serde(default)]
    name: String,
    #[serde(default)]
    target: Vec<String>,
    #[serde(default)]
    rule: Vec<RuleEntry>,
    #[serde(default)]
    exclusion: Vec<String>,
    /// Present (and not `false`/`null`) when the ruleset ships disabled.
    #[serde(default)]
    default_off: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RuleEntry {
    from: String,
    to: String,
}

impl RulesetSource {
    fn is_default_off(&self) -> bool {
        match &self.default_off {
            None | Some(serde_json::Value::Null) | Some(serde_json::Value::Bool(false)) => false,
            Some(_) => true,
        }
    }
}

/// Parse one ruleset source document into host entries.
pub fn parse_ruleset_source(text: &str) -> Result<Vec<HostRules>, ParseError> {
    let rulesets = match serde_json::from_str::<SourceDocument>(text)? {
        SourceDocument::Many(rulesets) => rulesets,
        SourceDocument::One(ruleset) => vec![ruleset],
    };

    let mut entries = Vec::new();
    for ruleset in rulesets {
        if ruleset.is_default_off() {
            debug!("skipping default-off ruleset '{}'", ruleset.name);
            continue;
        }
        if ruleset.rule.is_empty() {
            warn!("ruleset '{}' has no rules", ruleset.name);
            continue;
        }

        let rules: Vec<RuleDef> = ruleset
            .rule
            .iter()
            .map(|entry| RuleDef {
                from: entry.from.clone(),
                to: entry.to.clone(),
                exclusions: ruleset.exclusion.clone(),
            })
            .collect();

        for target in &ruleset.target {
            match parse_target(target) {
                Some(host) => entries.push(HostRules::new(host, rules.clone())),
                None => warn!("ruleset '{}': unsupported target '{target}'", ruleset.name),
            }
        }
    }

    Ok(entries)
}

/// Normalize a target into a host key. Only left-most wildcards are supported.
fn parse_target(target: &str) -> Option<String> {
    let host = normalize_host(target.trim());
    let bare = host.strip_prefix("*.").unwrap_or(&host);
    let valid = !bare.is_empty()
        && !bare.starts_with('.')
        && !bare.ends_with('.')
        && !bare.contains("..")
        && bare
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '[' | ']' | ':'));
    valid.then(|| host.into_owned())
}
