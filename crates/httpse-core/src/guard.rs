//! Redirect Guard
//!
//! Counts rewrites per caller-supplied request id so one logical request can
//! be upgraded at most `max_rewrites` times. Counters are dropped when the
//! caller reports completion, when they sit idle past the timeout, or when the
//! tracked-request cap forces out the least recently touched one.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::Mutex;

use crate::types::RequestId;

/// Default cap on simultaneously tracked request ids.
pub const DEFAULT_MAX_TRACKED: usize = 10_000;

/// Minimum spacing between tracked-cap warnings.
const CAP_WARNING_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u32,
    last_touched: Instant,
}

#[derive(Debug)]
struct GuardState {
    counters: HashMap<RequestId, Counter>,
    last_sweep: Instant,
    /// Cap evictions not yet reported by a warning.
    unreported_evictions: u64,
    last_cap_warning: Option<Instant>,
}

/// Per-request rewrite bookkeeping.
#[derive(Debug)]
pub struct RedirectGuard {
    max_rewrites: u32,
    /// `Duration::ZERO` disables idle reclamation.
    idle_timeout: Duration,
    max_tracked: usize,
    state: Mutex<GuardState>,
}

impl RedirectGuard {
    pub fn new(max_rewrites: u32, idle_timeout: Duration) -> Self {
        Self {
            max_rewrites,
            idle_timeout,
            max_tracked: DEFAULT_MAX_TRACKED,
            state: Mutex::new(GuardState {
                counters: HashMap::new(),
                last_sweep: Instant::now(),
                unreported_evictions: 0,
                last_cap_warning: None,
            }),
        }
    }

    /// Set the tracked-request cap (at least 1).
    pub fn with_max_tracked(mut self, max_tracked: usize) -> Self {
        self.max_tracked = max_tracked.max(1);
        self
    }

    pub fn max_rewrites(&self) -> u32 {
        self.max_rewrites
    }

    /// Whether `request_id` may be rewritten again.
    pub fn should_rewrite(&self, request_id: RequestId) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        self.maybe_sweep(&mut state, now);
        self.live_count(&state, request_id, now) < self.max_rewrites
    }

    /// Count one rewrite for `request_id`, creating its counter on first use.
    ///
    /// Never moves a counter past the maximum; returns `false` when the
    /// rewrite could not be recorded for that reason.
    pub fn record_rewrite(&self, request_id: RequestId) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        self.maybe_sweep(&mut state, now);
        self.record_locked(&mut state, request_id, now)
    }

    /// Check and record in one step.
    ///
    /// Equivalent to `should_rewrite` followed by `record_rewrite`, except that
    /// no other call on the same id can interleave between the two.
    pub fn try_rewrite(&self, request_id: RequestId) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        self.maybe_sweep(&mut state, now);
        if self.live_count(&state, request_id, now) >= self.max_rewrites {
            return false;
        }
        self.record_locked(&mut state, request_id, now)
    }

    /// Drop the counter for a completed request.
    pub fn forget(&self, request_id: RequestId) -> bool {
        self.state.lock().counters.remove(&request_id).is_some()
    }

    /// Current rewrite count; idle counters read as zero.
    pub fn count(&self, request_id: RequestId) -> u32 {
        let state = self.state.lock();
        self.live_count(&state, request_id, Instant::now())
    }

    /// Number of counters currently held.
    pub fn tracked(&self) -> usize {
        self.state.lock().counters.len()
    }

    /// Remove every counter idle at `now`. Returns how many were removed.
    pub fn reclaim_idle(&self, now: Instant) -> usize {
        let mut state = self.state.lock();
        self.sweep(&mut state, now)
    }

    pub fn clear(&self) {
        self.state.lock().counters.clear();
    }

    fn is_expired(&self, counter: &Counter, now: Instant) -> bool {
        !self.idle_timeout.is_zero()
            && now.saturating_duration_since(counter.last_touched) >= self.idle_timeout
    }

    fn live_count(&self, state: &GuardState, request_id: RequestId, now: Instant) -> u32 {
        match state.counters.get(&request_id) {
            Some(counter) if !self.is_expired(counter, now) => counter.count,
            _ => 0,
        }
    }

    fn record_locked(&self, state: &mut GuardState, request_id: RequestId, now: Instant) -> bool {
        if !state.counters.contains_key(&request_id) && state.counters.len() >= self.max_tracked {
            if !self.idle_timeout.is_zero() {
                self.sweep(state, now);
            }
            if state.counters.len() >= self.max_tracked {
                self.evict_least_recent(state, now);
            }
        }

        let idle_timeout = self.idle_timeout;
        let counter = state.counters.entry(request_id).or_insert(Counter {
            count: 0,
            last_touched: now,
        });
        if !idle_timeout.is_zero() && now.saturating_duration_since(counter.last_touched) >= idle_timeout {
            counter.count = 0;
        }
        counter.last_touched = now;

        if counter.count >= self.max_rewrites {
            return false;
        }
        counter.count += 1;
        debug_assert!(counter.count <= self.max_rewrites);
        true
    }

    fn evict_least_recent(&self, state: &mut GuardState, now: Instant) {
        let oldest = state
            .counters
            .iter()
            .min_by_key(|(_, counter)| counter.last_touched)
            .map(|(id, _)| *id);
        let Some(id) = oldest else {
            return;
        };
        state.counters.remove(&id);
        state.unreported_evictions += 1;

        let due = state
            .last_cap_warning
            .map_or(true, |at| now.saturating_duration_since(at) >= CAP_WARNING_INTERVAL);
        if due {
            warn!(
                "redirect guard at its cap of {} requests; dropped {} least recent ids",
                self.max_tracked, state.unreported_evictions
            );
            state.unreported_evictions = 0;
            state.last_cap_warning = Some(now);
        }
    }

    fn maybe_sweep(&self, state: &mut GuardState, now: Instant) {
        if self.idle_timeout.is_zero()
            || now.saturating_duration_since(state.last_sweep) < self.idle_timeout
        {
            return;
        }
        self.sweep(state, now);
    }

    fn sweep(&self, state: &mut GuardState, now: Instant) -> usize {
        let before = state.counters.len();
        state
            .counters
            .retain(|_, counter| !self.is_expired(counter, now));
        state.last_sweep = now;

        let removed = before - state.counters.len();
        if removed > 0 {
            debug!("reclaimed {removed} idle redirect counters");
        }
        removed
    }
}
