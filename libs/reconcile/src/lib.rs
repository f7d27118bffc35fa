//! Reconciliation loop primitives.
//!
//! This library provides helpers for implementing reconciliation loops
//! that converge desired state to current state. Key concepts:
//!
//! - **Desired state**: What the system should look like (from the API).
//! - **Current state**: What the system actually looks like (from a listing).
//! - **Convergence**: The process of making current match desired.
//!
//! # Invariants
//!
//! - All operations are idempotent
//! - Decisions are deterministic given the same inputs
//! - At most one pass per key is in flight; re-triggers while a pass runs
//!   are coalesced into exactly one follow-up pass

use std::cmp::Reverse;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

mod queue;

pub use queue::WorkQueue;

/// Corrective action for one count-reconciled unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountAction {
    /// Observed matches desired.
    Converged,

    /// Create this many new members.
    Create(u32),

    /// Delete this many existing members.
    Delete(u32),
}

impl CountAction {
    /// Compare an observed count against a desired count.
    pub fn plan(observed: u32, desired: u32) -> Self {
        match observed.cmp(&desired) {
            std::cmp::Ordering::Less => Self::Create(desired - observed),
            std::cmp::Ordering::Greater => Self::Delete(observed - desired),
            std::cmp::Ordering::Equal => Self::Converged,
        }
    }

    /// Returns true if no action is needed.
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged)
    }
}

/// Select `count` members for removal, newest first.
///
/// `sort_key` returns the creation time (or anything ordered like one) and
/// a tie-breaker; members with the greatest key are selected first. Members
/// with no creation time sort as oldest.
pub fn select_newest<T, C, B, F>(members: Vec<T>, count: usize, sort_key: F) -> Vec<T>
where
    C: Ord,
    B: Ord,
    F: Fn(&T) -> (Option<C>, B),
{
    let mut keyed: Vec<_> = members
        .into_iter()
        .map(|m| {
            let key = sort_key(&m);
            (key, m)
        })
        .collect();

    // Option<C> orders None before Some, so None lands last after Reverse.
    keyed.sort_by(|(a, _), (b, _)| Reverse(a).cmp(&Reverse(b)));
    keyed.into_iter().take(count).map(|(_, m)| m).collect()
}

/// Per-key exponential requeue delay for failed passes.
///
/// The first failure waits `base`, each further consecutive failure doubles
/// the delay up to `max`. A success clears the key.
#[derive(Debug, Clone)]
pub struct FailureBackoff<K> {
    base: Duration,
    max: Duration,
    failures: HashMap<K, u32>,
}

impl<K: Eq + Hash> FailureBackoff<K> {
    /// Create a new backoff tracker.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: HashMap::new(),
        }
    }

    /// Record a failure for a key and return how long to wait before retrying.
    pub fn record_failure(&mut self, key: K) -> Duration {
        let count = self.failures.entry(key).or_insert(0);
        *count = count.saturating_add(1);

        let exponent = (*count - 1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |d| d.min(self.max))
    }

    /// Consecutive failures recorded for a key.
    pub fn failures(&self, key: &K) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }

    /// Clear failure tracking for a key (on success).
    pub fn forget(&mut self, key: &K) {
        self.failures.remove(key);
    }
}

impl<K: Eq + Hash> Default for FailureBackoff<K> {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_BASE_DELAY, DEFAULT_RETRY_MAX_DELAY)
    }
}

/// Default periodic resync interval.
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Default delay before retrying a failed pass.
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default cap on the retry delay.
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(5 * 60);
