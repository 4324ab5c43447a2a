//! URL normalization for the lookup path
//!
//! Parsing goes through the `url` crate so that the cache key, the rule input
//! and the host key all agree on one canonical spelling of the request.

use std::borrow::Cow;

use url::{Host, Url};

use crate::host::normalize_host;

/// Schemes the engine will try to upgrade.
pub const UPGRADEABLE_SCHEMES: &[&str] = &["http"];

/// A parsed request URL in the key space the store expects.
#[derive(Debug, Clone)]
pub struct RequestUrl {
    url: Url,
    host_key: String,
}

impl RequestUrl {
    /// Parse and normalize. Returns `None` for unparsable or host-less URLs.
    pub fn parse(raw: &str) -> Option<Self> {
        let url = Url::parse(raw.trim()).ok()?;
        let host_key = match url.host()? {
            Host::Domain(domain) => normalize_host(domain).into_owned(),
            Host::Ipv4(addr) => addr.to_string(),
            Host::Ipv6(addr) => format!("[{addr}]"),
        };
        if host_key.is_empty() {
            return None;
        }
        Some(Self { url, host_key })
    }

    /// Canonical serialization; used as cache key and rule input.
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Lowercased host without the trailing root dot.
    pub fn host_key(&self) -> &str {
        &self.host_key
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Whether rules should be consulted for this URL at all.
    pub fn is_upgradeable(&self) -> bool {
        UPGRADEABLE_SCHEMES.contains(&self.url.scheme())
    }
}

/// Check that rewrite output is a usable absolute URL.
///
/// Returns the canonical form so equality with the input is judged on the
/// normalized spelling rather than on incidental differences.
pub fn canonicalize_candidate(candidate: &str) -> Option<Cow<'_, str>> {
    let parsed = Url::parse(candidate).ok()?;
    if parsed.cannot_be_a_base() || parsed.host().is_none() {
        return None;
    }
    if parsed.as_str() == candidate {
        Some(Cow::Borrowed(candidate))
    } else {
        Some(Cow::Owned(parsed.into()))
    }
}
