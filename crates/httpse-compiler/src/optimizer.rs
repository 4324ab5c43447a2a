use std::collections::{HashMap, HashSet};

use log::warn;

use httpse_core::host::normalize_host;
use httpse_core::{HostRules, Rule, RuleDef};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizeStats {
    pub hosts_before: usize,
    pub hosts_after: usize,
    pub rules_before: usize,
    pub rules_after: usize,
    pub merged_hosts: usize,
    pub deduped: usize,
    pub invalid_rules: usize,
    pub empty_hosts: usize,
}

/// Merge entries sharing a host key, drop duplicate and unusable rules, and
/// drop hosts left without rules. First-seen order is kept throughout.
pub fn optimize_rules(entries: &mut Vec<HostRules>) -> OptimizeStats {
    let hosts_before = entries.len();
    let rules_before = entries.iter().map(|e| e.rules.len()).sum();

    let mut merged: Vec<HostRules> = Vec::with_capacity(entries.len());
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut merged_hosts = 0usize;

    for entry in entries.drain(..) {
        let key = normalize_host(entry.host.trim()).into_owned();
        match positions.get(&key) {
            Some(&idx) => {
                merged[idx].rules.extend(entry.rules);
                merged_hosts += 1;
            }
            None => {
                positions.insert(key.clone(), merged.len());
                merged.push(HostRules::new(key, entry.rules));
            }
        }
    }

    let mut deduped = 0usize;
    let mut invalid_rules = 0usize;
    for entry in &mut merged {
        let mut seen: HashSet<RuleDef> = HashSet::new();
        let host = entry.host.as_str();
        entry.rules.retain(|rule| {
            if seen.contains(rule) {
                deduped += 1;
                return false;
            }
            seen.insert(rule.clone());
            if let Err(e) = Rule::compile(rule) {
                warn!("dropping rule for '{host}': {e}");
                invalid_rules += 1;
                return false;
            }
            true
        });
    }

    let with_rules = merged.len();
    merged.retain(|entry| !entry.rules.is_empty());
    let empty_hosts = with_rules - merged.len();

    *entries = merged;

    OptimizeStats {
        hosts_before,
        hosts_after: entries.len(),
        rules_before,
        rules_after: entries.iter().map(|e| e.rules.len()).sum(),
        merged_hosts,
        deduped,
        invalid_rules,
        empty_hosts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn https() -> RuleDef {
        RuleDef::new("^http:", "https:")
    }

    #[test]
    fn test_merges_same_host_in_order() {
        let mut entries = vec![
            HostRules::new("example.com", vec![https()]),
            HostRules::new("other.com", vec![https()]),
            HostRules::new("Example.com.", vec![RuleDef::new("^http://example\\.com/", "https://example.com/")]),
        ];
        let stats = optimize_rules(&mut entries);

        assert_eq!(stats.merged_hosts, 1);
        assert_eq!(stats.hosts_after, 2);
        assert_eq!(entries[0].host, "example.com");
        assert_eq!(entries[0].rules.len(), 2);
        assert_eq!(entries[0].rules[0], https());
        assert_eq!(entries[1].host, "other.com");
    }

    #[test]
    fn test_removes_duplicate_rules() {
        let mut entries = vec![
            HostRules::new("a.test", vec![https(), https().with_exclusion("/x"), https()]),
            HostRules::new("a.test", vec![https()]),
        ];
        let stats = optimize_rules(&mut entries);

        assert_eq!(stats.deduped, 2);
        assert_eq!(entries[0].rules.len(), 2);
        assert_eq!(stats.rules_before, 4);
        assert_eq!(stats.rules_after, 2);
    }

    #[test]
    fn test_drops_invalid_rules_and_empty_hosts() {
        let mut entries = vec![
            HostRules::new("bad.test", vec![RuleDef::new("^http://(?=x)", "https://")]),
            HostRules::new(
                "mixed.test",
                vec![RuleDef::new("(", "https://"), https().with_exclusion("[")],
            ),
            HostRules::new("good.test", vec![https()]),
        ];
        let stats = optimize_rules(&mut entries);

        assert_eq!(stats.invalid_rules, 3);
        assert_eq!(stats.empty_hosts, 2);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].host, "good.test");
    }
}
