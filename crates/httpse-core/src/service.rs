//! Service Façade
//!
//! The two caller operations, [`HttpsUpgradeService::get_https_url`] and
//! [`HttpsUpgradeService::get_https_url_from_cache_only`], plus lifecycle.
//! Nothing here returns an error to the request path: every failure becomes
//! "no rewrite" and a log line.

use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, info, trace};

use crate::cache::{CacheStats, RecencyCache};
use crate::config::{ConfigError, ServiceConfig};
use crate::engine::RuleEngine;
use crate::guard::RedirectGuard;
use crate::store::{RuleSource, RuleStore, StoreError, StoreStats};
use crate::types::{RequestId, RewriteOutcome};
use crate::url::RequestUrl;

/// Error type for service construction and maintenance.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// HTTPS upgrade service over a rule source.
#[derive(Debug)]
pub struct HttpsUpgradeService<S: RuleSource = RuleStore> {
    config: ServiceConfig,
    engine: RuleEngine<S>,
    cache: RecencyCache,
    guard: RedirectGuard,
    active: AtomicBool,
    /// Set after the first store failure; full lookups then behave as cache-only.
    store_failed: AtomicBool,
}

impl HttpsUpgradeService<RuleStore> {
    /// Open the configured rule store and start the service.
    pub fn init(config: ServiceConfig) -> Result<Self, ServiceError> {
        config.validate()?;
        let store = RuleStore::open(&config.store_path)?;
        Self::with_source(config, store)
    }

    /// Re-read the rule store and drop every cached outcome.
    pub fn reload_rules(&self) -> Result<(), ServiceError> {
        self.engine.source().reload()?;
        self.cache.clear();
        if self.store_failed.swap(false, Ordering::AcqRel) {
            info!("rule store recovered after reload");
        }
        Ok(())
    }

    pub fn store_stats(&self) -> Result<StoreStats, StoreError> {
        self.engine.source().stats()
    }
}

impl<S: RuleSource> HttpsUpgradeService<S> {
    /// Start the service over any rule source.
    pub fn with_source(config: ServiceConfig, source: S) -> Result<Self, ServiceError> {
        config.validate()?;
        let cache = RecencyCache::new(config.cache_capacity);
        let guard = RedirectGuard::new(config.max_rewrites_per_request, config.guard_idle_timeout())
            .with_max_tracked(config.max_tracked_requests);

        debug!(
            "https upgrade service started (cache {}, max rewrites {})",
            config.cache_capacity, config.max_rewrites_per_request
        );
        Ok(Self {
            config,
            engine: RuleEngine::new(source),
            cache,
            guard,
            active: AtomicBool::new(true),
            store_failed: AtomicBool::new(false),
        })
    }

    /// Full lookup: cache, then store and engine on a miss, then the guard.
    pub fn get_https_url(&self, url: &str, request_id: RequestId) -> Option<String> {
        let request = self.prepare(url)?;

        let outcome = match self.cache.get(request.as_str()) {
            Some(outcome) => outcome,
            None => self.resolve(&request)?,
        };
        self.admit(outcome, request_id)
    }

    /// Like [`get_https_url`](Self::get_https_url) but never consults the store.
    pub fn get_https_url_from_cache_only(&self, url: &str, request_id: RequestId) -> Option<String> {
        let request = self.prepare(url)?;
        let outcome = self.cache.get(request.as_str())?;
        self.admit(outcome, request_id)
    }

    /// The caller is done with `request_id`.
    pub fn request_completed(&self, request_id: RequestId) {
        self.guard.forget(request_id);
    }

    /// Close the store and drop all cache and guard state.
    pub fn cleanup(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        self.engine.source().close();
        self.cache.clear();
        self.guard.clear();
        info!("https upgrade service stopped");
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Whether a store failure has switched full lookups to cache-only.
    pub fn is_store_failed(&self) -> bool {
        self.store_failed.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        self.engine.source()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn tracked_requests(&self) -> usize {
        self.guard.tracked()
    }

    /// Apply the URL override and normalize. `None` when nothing can be upgraded.
    fn prepare(&self, url: &str) -> Option<RequestUrl> {
        if !self.is_active() {
            return None;
        }
        let raw = self.config.url_override.as_deref().unwrap_or(url);
        let Some(request) = RequestUrl::parse(raw) else {
            debug!("ignoring unparsable URL '{raw}'");
            return None;
        };
        request.is_upgradeable().then_some(request)
    }

    /// Evaluate through the engine and cache the outcome.
    ///
    /// The outcome is not cached if a reload or cleanup cleared the cache
    /// while the engine was running.
    fn resolve(&self, request: &RequestUrl) -> Option<RewriteOutcome> {
        if self.is_store_failed() {
            return None;
        }
        let generation = self.cache.generation();
        match self.engine.evaluate(request) {
            Ok(outcome) => {
                if !self.cache.put_if_current(generation, request.as_str(), outcome.clone()) {
                    trace!("not caching {}: cache cleared during lookup", request.as_str());
                }
                Some(outcome)
            }
            Err(e) if !self.is_active() => {
                debug!("lookup for {} interrupted by shutdown: {e}", request.as_str());
                None
            }
            Err(e) => {
                if !self.store_failed.swap(true, Ordering::AcqRel) {
                    error!("rule store lookup failed, continuing from cache only: {e}");
                }
                None
            }
        }
    }

    /// Guard check on a rewrite outcome.
    fn admit(&self, outcome: RewriteOutcome, request_id: RequestId) -> Option<String> {
        let RewriteOutcome::Rewrite(rewritten) = outcome else {
            return None;
        };
        if self.guard.try_rewrite(request_id) {
            Some(rewritten)
        } else {
            debug!(
                "request {request_id} reached {} rewrites; leaving URL unchanged",
                self.guard.max_rewrites()
            );
            None
        }
    }
}

impl<S: RuleSource> Drop for HttpsUpgradeService<S> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{build_snapshot_with_id, MemoryRuleSource};
    use crate::types::{HostRules, RuleDef};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    fn rules() -> Vec<HostRules> {
        vec![
            HostRules::new(
                "example.com",
                vec![RuleDef::new("http://example.com/*", "https://example.com/")
                    .with_exclusion("http://example.com/login")],
            ),
            HostRules::new("*.example.org", vec![RuleDef::new("^http:", "https:")]),
        ]
    }

    fn config() -> ServiceConfig {
        ServiceConfig::new("unused.hxs")
    }

    fn service_with(config: ServiceConfig) -> HttpsUpgradeService<MemoryRuleSource> {
        HttpsUpgradeService::with_source(config, MemoryRuleSource::new(rules())).unwrap()
    }

    fn service() -> HttpsUpgradeService<MemoryRuleSource> {
        service_with(config())
    }

    #[test]
    fn test_unmatched_host_is_cached_negative() {
        let service = service();
        assert_eq!(service.get_https_url("http://nomatch.test/", 1), None);
        let lookups = service.source().lookups();
        assert!(lookups > 0);

        assert_eq!(service.get_https_url("http://nomatch.test/", 1), None);
        assert_eq!(service.source().lookups(), lookups);
        assert_eq!(service.cache_stats().hits, 1);
    }

    #[test]
    fn test_rewrite_is_cached() {
        let service = service();
        let first = service.get_https_url("http://example.com/page", 1);
        assert_eq!(first.as_deref(), Some("https://example.com/page"));
        let lookups = service.source().lookups();

        let second = service.get_https_url("http://example.com/page", 1);
        assert_eq!(second, first);
        assert_eq!(service.source().lookups(), lookups);
    }

    #[test]
    fn test_exclusion_precedence() {
        let service = service();
        assert_eq!(service.get_https_url("http://example.com/login", 1), None);
        assert_eq!(
            service.get_https_url("http://example.com/page", 1).as_deref(),
            Some("https://example.com/page")
        );
    }

    #[test]
    fn test_redirect_guard_bound() {
        let service = service_with(ServiceConfig {
            max_rewrites_per_request: 2,
            ..config()
        });
        let url = "http://www.example.org/";
        assert!(service.get_https_url(url, 77).is_some());
        assert!(service.get_https_url(url, 77).is_some());
        assert_eq!(service.get_https_url(url, 77), None);

        // A different request is unaffected; completion resets the counter.
        assert!(service.get_https_url(url, 78).is_some());
        service.request_completed(77);
        assert!(service.get_https_url(url, 77).is_some());
    }

    #[test]
    fn test_cache_only_never_touches_store() {
        let service = service();
        let url = "http://example.com/page";
        assert_eq!(service.get_https_url_from_cache_only(url, 1), None);
        assert_eq!(service.source().lookups(), 0);

        assert!(service.get_https_url(url, 1).is_some());
        assert_eq!(
            service.get_https_url_from_cache_only(url, 2).as_deref(),
            Some("https://example.com/page")
        );
    }

    #[test]
    fn test_cache_only_respects_guard() {
        let service = service_with(ServiceConfig {
            max_rewrites_per_request: 1,
            ..config()
        });
        let url = "http://a.example.org/";
        assert!(service.get_https_url(url, 3).is_some());
        assert_eq!(service.get_https_url_from_cache_only(url, 3), None);
    }

    #[test]
    fn test_cache_eviction_through_service() {
        let service = service_with(ServiceConfig {
            cache_capacity: 2,
            ..config()
        });
        service.get_https_url("http://a.example.org/", 1);
        service.get_https_url("http://b.example.org/", 1);
        service.get_https_url("http://a.example.org/", 1);
        service.get_https_url("http://c.example.org/", 1);

        assert!(service.get_https_url_from_cache_only("http://b.example.org/", 2).is_none());
        assert!(service.get_https_url_from_cache_only("http://a.example.org/", 2).is_some());
        assert!(service.get_https_url_from_cache_only("http://c.example.org/", 2).is_some());
    }

    #[test]
    fn test_non_http_and_garbage_are_ignored() {
        let service = service();
        assert_eq!(service.get_https_url("https://example.com/page", 1), None);
        assert_eq!(service.get_https_url("not a url", 1), None);
        assert_eq!(service.source().lookups(), 0);
    }

    #[test]
    fn test_url_override() {
        let service = service_with(ServiceConfig {
            url_override: Some("http://example.com/override".into()),
            ..config()
        });
        assert_eq!(
            service.get_https_url("http://unrelated.test/", 1).as_deref(),
            Some("https://example.com/override")
        );
    }

    #[test]
    fn test_store_failure_latches_cache_only() {
        let service = service();
        assert!(service.get_https_url("http://example.com/page", 1).is_some());

        service.source().close();
        assert_eq!(service.get_https_url("http://x.example.org/", 1), None);
        assert!(service.is_store_failed());
        let lookups = service.source().lookups();

        // Cached answers still work; new URLs no longer reach the store.
        assert!(service.get_https_url("http://example.com/page", 2).is_some());
        assert_eq!(service.get_https_url("http://y.example.org/", 1), None);
        assert_eq!(service.source().lookups(), lookups);
    }

    #[test]
    fn test_cleanup() {
        let service = service();
        assert!(service.get_https_url("http://example.com/page", 1).is_some());
        service.cleanup();

        assert!(!service.is_active());
        assert_eq!(service.get_https_url("http://example.com/page", 1), None);
        assert_eq!(service.get_https_url_from_cache_only("http://example.com/page", 1), None);
        assert_eq!(service.tracked_requests(), 0);
        assert_eq!(service.cache_stats().len, 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = HttpsUpgradeService::with_source(
            ServiceConfig {
                max_rewrites_per_request: 0,
                ..config()
            },
            MemoryRuleSource::default(),
        );
        assert!(matches!(result, Err(ServiceError::Config(_))));
    }

    #[test]
    fn test_concurrent_same_request() {
        let max = 4;
        let service = Arc::new(service_with(ServiceConfig {
            max_rewrites_per_request: max,
            ..config()
        }));
        let granted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..24)
            .map(|i| {
                let service = Arc::clone(&service);
                let granted = Arc::clone(&granted);
                thread::spawn(move || {
                    let url = format!("http://h{}.example.org/", i % 3);
                    if service.get_https_url(&url, 500).is_some() {
                        granted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(granted.load(Ordering::SeqCst), max as usize);
    }

    #[test]
    fn test_init_creates_store_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.hxs");
        let service = HttpsUpgradeService::init(ServiceConfig::new(&path)).unwrap();
        assert!(path.exists());
        assert_eq!(service.get_https_url("http://example.com/page", 1), None);

        std::fs::write(&path, build_snapshot_with_id(&rules(), 9)).unwrap();
        service.reload_rules().unwrap();
        assert_eq!(service.store_stats().unwrap().build_id, 9);
        // The negative answer cached before the reload is gone.
        assert_eq!(
            service.get_https_url("http://example.com/page", 1).as_deref(),
            Some("https://example.com/page")
        );
    }

    #[test]
    fn test_shutdown_does_not_latch_store_failure() {
        let service = service();
        service.active.store(false, Ordering::Release);
        service.source().close();

        let request = RequestUrl::parse("http://a.example.org/").unwrap();
        assert_eq!(service.resolve(&request), None);
        assert!(!service.is_store_failed());
    }

    #[test]
    fn test_outcome_from_before_clear_is_not_cached() {
        let service = service();
        let request = RequestUrl::parse("http://a.example.org/").unwrap();
        let generation = service.cache.generation();
        let outcome = service.engine.evaluate(&request).unwrap();

        service.cache.clear();
        assert!(!service.cache.put_if_current(generation, request.as_str(), outcome));
        assert_eq!(service.cache_stats().len, 0);
    }

    #[test]
    fn test_reload_discards_in_flight_answers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.hxs");
        let upgraded = vec![HostRules::new("*.example.com", vec![RuleDef::new("^http:", "https:")])];
        let hosts = 50u64;

        for round in 0..40u32 {
            std::fs::write(&path, build_snapshot_with_id(&[], round)).unwrap();
            let service = Arc::new(HttpsUpgradeService::init(ServiceConfig::new(&path)).unwrap());

            let worker = {
                let service = Arc::clone(&service);
                thread::spawn(move || {
                    for i in 0..hosts {
                        service.get_https_url(&format!("http://h{i}.example.com/"), 0);
                    }
                })
            };
            std::fs::write(&path, build_snapshot_with_id(&upgraded, round + 1000)).unwrap();
            service.reload_rules().unwrap();
            worker.join().unwrap();

            for i in 0..hosts {
                assert!(
                    service.get_https_url(&format!("http://h{i}.example.com/"), i + 1).is_some(),
                    "round {round}: h{i} kept a pre-reload answer"
                );
            }
        }
    }

    #[test]
    fn test_init_fails_on_corrupt_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.hxs");
        std::fs::write(&path, b"HXS1 but not really").unwrap();
        assert!(matches!(
            HttpsUpgradeService::init(ServiceConfig::new(&path)),
            Err(ServiceError::Store(StoreError::Unavailable { .. }))
        ));
    }
}
