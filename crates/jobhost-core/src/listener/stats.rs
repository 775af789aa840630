//! Per-listener counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct ListenerStats {
    polls: AtomicU64,
    empty_polls: AtomicU64,
    messages_dequeued: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    poisoned: AtomicU64,
    unroutable_poison: AtomicU64,
    lease_renewals: AtomicU64,
    leases_lost: AtomicU64,
    backend_errors: AtomicU64,
}

/// Point-in-time copy of [`ListenerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerStatsSnapshot {
    pub polls: u64,
    pub empty_polls: u64,
    pub messages_dequeued: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub poisoned: u64,
    pub unroutable_poison: u64,
    pub lease_renewals: u64,
    pub leases_lost: u64,
    pub backend_errors: u64,
}

impl ListenerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_poll(&self, dequeued: usize) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        if dequeued == 0 {
            self.empty_polls.fetch_add(1, Ordering::Relaxed);
        } else {
            self.messages_dequeued
                .fetch_add(dequeued as u64, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_poisoned(&self) {
        self.poisoned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unroutable_poison(&self) {
        self.unroutable_poison.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lease_renewal(&self) {
        self.lease_renewals.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lease_lost(&self) {
        self.leases_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_backend_error(&self) {
        self.backend_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ListenerStatsSnapshot {
        ListenerStatsSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
            messages_dequeued: self.messages_dequeued.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            poisoned: self.poisoned.load(Ordering::Relaxed),
            unroutable_poison: self.unroutable_poison.load(Ordering::Relaxed),
            lease_renewals: self.lease_renewals.load(Ordering::Relaxed),
            leases_lost: self.leases_lost.load(Ordering::Relaxed),
            backend_errors: self.backend_errors.load(Ordering::Relaxed),
        }
    }
}
