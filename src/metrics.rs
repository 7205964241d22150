//! Security metrics collection.
//!
//! Lightweight atomic counters covering permission checks, cache behavior and
//! write-path invalidations. Counters are cheap enough to record on every
//! request path; a snapshot can be taken at any time for reporting.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for the authorization core.
#[derive(Debug, Default)]
pub struct SecurityMetrics {
    permission_checks: AtomicU64,
    permission_denials: AtomicU64,
    cache_invalidations: AtomicU64,
    group_writes: AtomicU64,
    policy_writes: AtomicU64,
    membership_writes: AtomicU64,
}

impl SecurityMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_permission_check(&self, allowed: bool) {
        self.permission_checks.fetch_add(1, Ordering::Relaxed);
        if !allowed {
            self.permission_denials.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_cache_invalidation(&self) {
        self.cache_invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_group_write(&self) {
        self.group_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_policy_write(&self) {
        self.policy_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_membership_write(&self) {
        self.membership_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            permission_checks: self.permission_checks.load(Ordering::Relaxed),
            permission_denials: self.permission_denials.load(Ordering::Relaxed),
            cache_invalidations: self.cache_invalidations.load(Ordering::Relaxed),
            group_writes: self.group_writes.load(Ordering::Relaxed),
            policy_writes: self.policy_writes.load(Ordering::Relaxed),
            membership_writes: self.membership_writes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the security counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub permission_checks: u64,
    pub permission_denials: u64,
    pub cache_invalidations: u64,
    pub group_writes: u64,
    pub policy_writes: u64,
    pub membership_writes: u64,
}
