//! Host key utilities
//!
//! The store only answers exact-key lookups. Suffix reduction lives here: a
//! request host expands into the ordered list of keys the engine tries.
//!
//! # Examples
//!
//! ```
//! use httpse_core::host::lookup_keys;
//!
//! let keys: Vec<_> = lookup_keys("www.example.com").collect();
//! assert_eq!(keys, ["www.example.com", "*.example.com", "example.com", "*.com", "com"]);
//! ```

use std::borrow::Cow;
use std::net::IpAddr;

/// Lowercase a host and strip a trailing root dot.
pub fn normalize_host(host: &str) -> Cow<'_, str> {
    let trimmed = host.strip_suffix('.').unwrap_or(host);
    if trimmed.bytes().any(|b| b.is_ascii_uppercase()) {
        Cow::Owned(trimmed.to_ascii_lowercase())
    } else {
        Cow::Borrowed(trimmed)
    }
}

/// Get the parent domain (strip leftmost label).
pub fn get_parent_domain(host: &str) -> Option<&str> {
    match host.find('.') {
        Some(idx) if idx < host.len() - 1 => Some(&host[idx + 1..]),
        _ => None,
    }
}

/// True for IPv4 literals and (bracketed or bare) IPv6 literals.
pub fn is_ip_literal(host: &str) -> bool {
    let bare = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    bare.parse::<IpAddr>().is_ok()
}

/// Iterator over store keys for a host, most specific first.
///
/// Yields the host itself, then for every parent obtained by stripping the
/// leftmost label: the wildcard key `*.<parent>` followed by `<parent>`.
/// IP literals yield only themselves.
pub struct HostKeys<'a> {
    host: &'a str,
    next_parent: Option<&'a str>,
    pending_exact: Option<&'a str>,
    started: bool,
}

impl<'a> Iterator for HostKeys<'a> {
    type Item = Cow<'a, str>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.started {
            self.started = true;
            if self.host.is_empty() {
                return None;
            }
            return Some(Cow::Borrowed(self.host));
        }

        if let Some(exact) = self.pending_exact.take() {
            return Some(Cow::Borrowed(exact));
        }

        let parent = self.next_parent?;
        self.next_parent = get_parent_domain(parent);
        self.pending_exact = Some(parent);
        Some(Cow::Owned(format!("*.{parent}")))
    }
}

/// Expand a normalized host into its ordered lookup keys.
pub fn lookup_keys(host: &str) -> HostKeys<'_> {
    let next_parent = if is_ip_literal(host) {
        None
    } else {
        get_parent_domain(host)
    };
    HostKeys {
        host,
        next_parent,
        pending_exact: None,
        started: false,
    }
}
