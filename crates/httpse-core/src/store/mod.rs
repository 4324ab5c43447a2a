//! Rule Store
//!
//! The store maps host keys to ordered rule sets. On disk it is a single HXS
//! snapshot file; in memory it is one validated [`Snapshot`] behind an
//! [`ArcSwapOption`], so readers never take a lock and a reload replaces the
//! whole image at once.

mod format;
mod loader;
mod writer;

pub use format::{HeaderFlags, SectionId, HXS_MAGIC, HXS_VERSION};
pub use loader::{snapshot_crc32, SectionInfo, Snapshot, SnapshotError};
pub use writer::{build_snapshot, build_snapshot_with_id};

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwapOption;
use log::{debug, info};

use crate::engine::RuleSet;
use crate::host::normalize_host;
use crate::types::HostRules;

/// Error type for rule store access.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("rule store at '{}' is unavailable: {reason}", .path.display())]
    Unavailable { path: PathBuf, reason: String },
    #[error("rule store is closed")]
    Closed,
}

impl StoreError {
    fn unavailable(path: &Path, reason: impl ToString) -> Self {
        Self::Unavailable {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// Read side of a rule store: exact host-key lookups.
pub trait RuleSource: Send + Sync {
    /// Rule set stored under exactly `host`, if any.
    fn lookup_host(&self, host: &str) -> Result<Option<Arc<RuleSet>>, StoreError>;

    /// Release the source. Later lookups fail with [`StoreError::Closed`].
    fn close(&self) {}
}

// =============================================================================
// File-backed store
// =============================================================================

struct LoadedSnapshot {
    snapshot: Snapshot,
    /// Compiled rule sets, filled on first lookup of each record.
    compiled: Box<[OnceLock<Arc<RuleSet>>]>,
}

impl LoadedSnapshot {
    fn new(snapshot: Snapshot) -> Self {
        let compiled = (0..snapshot.ruleset_count()).map(|_| OnceLock::new()).collect();
        Self { snapshot, compiled }
    }

    fn lookup(&self, host: &str) -> Option<Arc<RuleSet>> {
        let id = self.snapshot.find_ruleset(host)?;
        let compiled = self.compiled.get(id)?.get_or_init(|| {
            let rules = self
                .snapshot
                .ruleset(id)
                .unwrap_or_else(|| HostRules::new(host, Vec::new()));
            Arc::new(RuleSet::compile(&rules))
        });
        Some(Arc::clone(compiled))
    }
}

/// Summary of the installed snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub build_id: u32,
    pub rulesets: usize,
    pub rules: usize,
    pub exclusions: usize,
    pub bytes: usize,
}

/// The on-disk rule store.
pub struct RuleStore {
    path: PathBuf,
    current: ArcSwapOption<LoadedSnapshot>,
}

impl RuleStore {
    /// Open the store at `path`, creating an empty one if the file is missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            create_empty(&path)?;
        }

        let loaded = read_snapshot(&path)?;
        info!(
            "opened rule store '{}' (build {}, {} rulesets, {} rules)",
            path.display(),
            loaded.snapshot.build_id,
            loaded.snapshot.ruleset_count(),
            loaded.snapshot.rule_count()
        );

        Ok(Self {
            path,
            current: ArcSwapOption::from_pointee(loaded),
        })
    }

    /// Re-read the store file and install it atomically.
    ///
    /// On failure the previous snapshot stays installed.
    pub fn reload(&self) -> Result<(), StoreError> {
        if !self.is_open() {
            return Err(StoreError::Closed);
        }
        let fresh = Arc::new(read_snapshot(&self.path)?);
        let build_id = fresh.snapshot.build_id;

        let previous = self
            .current
            .rcu(|current| current.as_ref().map(|_| Arc::clone(&fresh)));
        if previous.is_none() {
            return Err(StoreError::Closed);
        }

        info!("reloaded rule store '{}' (build {build_id})", self.path.display());
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.current.load().is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let loaded = self.current.load_full().ok_or(StoreError::Closed)?;
        let snapshot = &loaded.snapshot;
        Ok(StoreStats {
            build_id: snapshot.build_id,
            rulesets: snapshot.ruleset_count(),
            rules: snapshot.rule_count(),
            exclusions: snapshot.exclusion_count(),
            bytes: snapshot.byte_len(),
        })
    }
}

impl RuleSource for RuleStore {
    fn lookup_host(&self, host: &str) -> Result<Option<Arc<RuleSet>>, StoreError> {
        match &*self.current.load() {
            Some(loaded) => Ok(loaded.lookup(host)),
            None => Err(StoreError::Closed),
        }
    }

    fn close(&self) {
        if self.current.swap(None).is_some() {
            debug!("closed rule store '{}'", self.path.display());
        }
    }
}

impl std::fmt::Debug for RuleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleStore")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}

fn read_snapshot(path: &Path) -> Result<LoadedSnapshot, StoreError> {
    let bytes = fs::read(path).map_err(|e| StoreError::unavailable(path, e))?;
    let snapshot = Snapshot::load(bytes).map_err(|e| StoreError::unavailable(path, e))?;
    Ok(LoadedSnapshot::new(snapshot))
}

/// Write an empty store next to `path`, then rename it into place.
fn create_empty(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| StoreError::unavailable(path, e))?;
    }
    let tmp = path.with_extension("hxs.tmp");
    fs::write(&tmp, build_snapshot(&[])).map_err(|e| StoreError::unavailable(path, e))?;
    fs::rename(&tmp, path).map_err(|e| StoreError::unavailable(path, e))?;
    info!("created empty rule store at '{}'", path.display());
    Ok(())
}

// =============================================================================
// In-memory source
// =============================================================================

/// A rule source held entirely in memory.
///
/// Rule sets are compiled up front. The lookup counter makes it easy to check
/// how often the engine actually reached the store.
#[derive(Debug, Default)]
pub struct MemoryRuleSource {
    rulesets: HashMap<String, Arc<RuleSet>>,
    closed: AtomicBool,
    lookups: AtomicUsize,
}

impl MemoryRuleSource {
    pub fn new(entries: impl IntoIterator<Item = HostRules>) -> Self {
        let mut rulesets = HashMap::new();
        for entry in entries {
            let key = normalize_host(entry.host.trim()).into_owned();
            rulesets
                .entry(key)
                .or_insert_with(|| Arc::new(RuleSet::compile(&entry)));
        }
        Self {
            rulesets,
            ..Self::default()
        }
    }

    /// Number of `lookup_host` calls served so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.rulesets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rulesets.is_empty()
    }
}

impl RuleSource for MemoryRuleSource {
    fn lookup_host(&self, host: &str) -> Result<Option<Arc<RuleSet>>, StoreError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(self.rulesets.get(host).cloned())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl<S: RuleSource + ?Sized> RuleSource for Arc<S> {
    fn lookup_host(&self, host: &str) -> Result<Option<Arc<RuleSet>>, StoreError> {
        (**self).lookup_host(host)
    }

    fn close(&self) {
        (**self).close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RuleDef;

    fn sample() -> Vec<HostRules> {
        vec![
            HostRules::new("example.com", vec![RuleDef::new("^http:", "https:")]),
            HostRules::new("*.example.org", vec![RuleDef::new("^http:", "https:")]),
        ]
    }

    #[test]
    fn test_open_creates_missing_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rules.hxs");

        let store = RuleStore::open(&path).expect("open should create the store");
        assert!(path.exists());
        assert!(store.is_open());
        assert_eq!(store.stats().unwrap().rulesets, 0);
        assert!(store.lookup_host("example.com").unwrap().is_none());
    }

    #[test]
    fn test_open_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.hxs");
        fs::write(&path, build_snapshot_with_id(&sample(), 7)).unwrap();

        let store = RuleStore::open(&path).unwrap();
        assert_eq!(store.stats().unwrap().build_id, 7);

        let set = store.lookup_host("example.com").unwrap().expect("rule set");
        assert_eq!(set.host(), "example.com");
        assert_eq!(set.len(), 1);
        assert!(store.lookup_host("*.example.org").unwrap().is_some());
        assert!(store.lookup_host("www.example.org").unwrap().is_none());
    }

    #[test]
    fn test_compiled_rulesets_are_memoized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.hxs");
        fs::write(&path, build_snapshot(&sample())).unwrap();

        let store = RuleStore::open(&path).unwrap();
        let first = store.lookup_host("example.com").unwrap().unwrap();
        let second = store.lookup_host("example.com").unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_corrupt_store_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.hxs");
        let mut bytes = build_snapshot(&sample());
        let last = bytes.len() - 1;
        bytes[last] ^= 0x5a;
        fs::write(&path, bytes).unwrap();

        match RuleStore::open(&path) {
            Err(StoreError::Unavailable { path: p, reason }) => {
                assert_eq!(p, path);
                assert!(reason.contains("CRC32"), "{reason}");
            }
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }

    #[test]
    fn test_closed_store_rejects_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuleStore::open(dir.path().join("rules.hxs")).unwrap();
        store.close();

        assert!(!store.is_open());
        assert!(matches!(store.lookup_host("example.com"), Err(StoreError::Closed)));
        assert_eq!(store.reload(), Err(StoreError::Closed));
        assert_eq!(store.stats(), Err(StoreError::Closed));
    }

    #[test]
    fn test_reload_swaps_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.hxs");
        let store = RuleStore::open(&path).unwrap();
        assert!(store.lookup_host("example.com").unwrap().is_none());

        fs::write(&path, build_snapshot_with_id(&sample(), 2)).unwrap();
        store.reload().unwrap();
        assert_eq!(store.stats().unwrap().build_id, 2);
        assert!(store.lookup_host("example.com").unwrap().is_some());
    }

    #[test]
    fn test_failed_reload_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.hxs");
        fs::write(&path, build_snapshot_with_id(&sample(), 3)).unwrap();
        let store = RuleStore::open(&path).unwrap();

        fs::write(&path, b"garbage").unwrap();
        assert!(matches!(store.reload(), Err(StoreError::Unavailable { .. })));
        assert_eq!(store.stats().unwrap().build_id, 3);
        assert!(store.lookup_host("example.com").unwrap().is_some());
    }

    #[test]
    fn test_memory_source_counts_lookups() {
        let source = MemoryRuleSource::new(sample());
        assert_eq!(source.len(), 2);
        assert!(source.lookup_host("example.com").unwrap().is_some());
        assert!(source.lookup_host("other.com").unwrap().is_none());
        assert_eq!(source.lookups(), 2);

        source.close();
        assert_eq!(source.lookup_host("example.com").unwrap_err(), StoreError::Closed);
    }

    #[test]
    fn test_shared_sources_delegate() {
        let shared = Arc::new(MemoryRuleSource::new(sample()));
        let source: Box<dyn RuleSource> = Box::new(Arc::clone(&shared));
        assert!(source.lookup_host("*.example.org").unwrap().is_some());
        source.close();
        assert_eq!(shared.lookups(), 1);
        assert!(shared.lookup_host("example.com").is_err());
    }
}
