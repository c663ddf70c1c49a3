//! Process-wide federation statistics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::client::DispatchOutcome;

/// Monotonic counters, shared by every query of an engine.
#[derive(Debug, Default)]
pub struct FederationStats {
    queries: AtomicU64,
    queries_failed: AtomicU64,
    queries_degraded: AtomicU64,
    local_skipped: AtomicU64,
    registry_outages: AtomicU64,
    dispatches: AtomicU64,
    dispatch_success: AtomicU64,
    dispatch_partial: AtomicU64,
    dispatch_timeout: AtomicU64,
    dispatch_unreachable: AtomicU64,
    dispatch_error: AtomicU64,
}

/// Public statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub queries: u64,
    pub queries_failed: u64,
    pub queries_degraded: u64,
    pub local_skipped: u64,
    pub registry_outages: u64,
    pub dispatches: u64,
    pub dispatch_success: u64,
    pub dispatch_partial: u64,
    pub dispatch_timeout: u64,
    pub dispatch_unreachable: u64,
    pub dispatch_error: u64,
}

impl FederationStats {
    pub fn record_query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.queries_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_degraded(&self) {
        self.queries_degraded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_local_skipped(&self) {
        self.local_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_registry_outage(&self) {
        self.registry_outages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self, outcome: &DispatchOutcome) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            DispatchOutcome::Success => &self.dispatch_success,
            DispatchOutcome::Partial { .. } => &self.dispatch_partial,
            DispatchOutcome::Timeout => &self.dispatch_timeout,
            DispatchOutcome::Unreachable(_) => &self.dispatch_unreachable,
            DispatchOutcome::Error(_) => &self.dispatch_error,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            queries: self.queries.load(Ordering::Relaxed),
            queries_failed: self.queries_failed.load(Ordering::Relaxed),
            queries_degraded: self.queries_degraded.load(Ordering::Relaxed),
            local_skipped: self.local_skipped.load(Ordering::Relaxed),
            registry_outages: self.registry_outages.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
            dispatch_success: self.dispatch_success.load(Ordering::Relaxed),
            dispatch_partial: self.dispatch_partial.load(Ordering::Relaxed),
            dispatch_timeout: self.dispatch_timeout.load(Ordering::Relaxed),
            dispatch_unreachable: self.dispatch_unreachable.load(Ordering::Relaxed),
            dispatch_error: self.dispatch_error.load(Ordering::Relaxed),
        }
    }

    /// Share of remote dispatches that returned usable data, in percent.
    pub fn success_rate(&self) -> f64 {
        let dispatches = self.dispatches.load(Ordering::Relaxed);
        if dispatches == 0 {
            return 0.0;
        }
        let usable = self.dispatch_success.load(Ordering::Relaxed)
            + self.dispatch_partial.load(Ordering::Relaxed);
        (usable as f64 / dispatches as f64) * 100.0
    }
}
