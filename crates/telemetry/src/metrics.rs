//! Running totals for the assembly engine.
//!
//! Lock-free counters, cheap to update on every request and safe to share
//! between concurrent assemblies.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the engine as requests finish.
#[derive(Debug, Default)]
pub struct AssemblyMetrics {
    recorded: AtomicU64,
    budget_failures: AtomicU64,
    strict_failures: AtomicU64,
    absorbed_failures: AtomicU64,
    degraded: AtomicU64,
    tokens_assembled: AtomicU64,
    items_dropped: AtomicU64,
    items_truncated: AtomicU64,
}

/// A point-in-time copy of [`AssemblyMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub recorded: u64,
    pub budget_failures: u64,
    pub strict_failures: u64,
    pub absorbed_failures: u64,
    pub degraded: u64,
    pub tokens_assembled: u64,
    pub items_dropped: u64,
    pub items_truncated: u64,
}

impl MetricsSnapshot {
    /// Share of finished requests that failed (0.0–1.0).
    pub fn failure_rate(&self) -> f64 {
        let failed = self.budget_failures + self.strict_failures;
        let total = failed + self.recorded;
        if total == 0 {
            0.0
        } else {
            failed as f64 / total as f64
        }
    }
}

impl AssemblyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A successful, persisted assembly.
    pub fn record_success(&self, tokens: usize, dropped: usize, truncated: usize, degraded: bool) {
        self.recorded.fetch_add(1, Ordering::Relaxed);
        self.tokens_assembled.fetch_add(tokens as u64, Ordering::Relaxed);
        self.items_dropped.fetch_add(dropped as u64, Ordering::Relaxed);
        self.items_truncated.fetch_add(truncated as u64, Ordering::Relaxed);
        if degraded {
            self.degraded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_budget_failure(&self) {
        self.budget_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_strict_failure(&self) {
        self.strict_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Non-strict source failures absorbed into an outcome.
    pub fn record_absorbed_failures(&self, count: usize) {
        if count > 0 {
            self.absorbed_failures.fetch_add(count as u64, Ordering::Relaxed);
            tracing::debug!(count, "Absorbed non-strict source failures");
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            recorded: self.recorded.load(Ordering::Relaxed),
            budget_failures: self.budget_failures.load(Ordering::Relaxed),
            strict_failures: self.strict_failures.load(Ordering::Relaxed),
            absorbed_failures: self.absorbed_failures.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            tokens_assembled: self.tokens_assembled.load(Ordering::Relaxed),
            items_dropped: self.items_dropped.load(Ordering::Relaxed),
            items_truncated: self.items_truncated.load(Ordering::Relaxed),
        }
    }
}
